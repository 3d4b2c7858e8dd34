pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{DatabaseConfig, LogConfig, LogFormat, MigrateConfig, MigrationsConfig};

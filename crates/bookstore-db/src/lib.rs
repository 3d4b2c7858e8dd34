//! Versioned schema migrations for the bookstore database.
//!
//! A [`Registry`] holds the [`MigrationDefinition`]s, a [`SchemaStore`]
//! executes DDL and keeps the applied-version bookkeeping, and a
//! [`Migrator`] reconciles the two.

pub mod error;
pub mod migrations;
pub mod registry;
pub mod runner;
pub mod schema;
pub mod sqlite_store;
pub mod store;

pub use error::{MigrationError, MigrationResult};
pub use migrations::{MigrationDefinition, bookstore_registry, create_books, create_publishers};
pub use registry::Registry;
pub use runner::{MigrationReport, MigrationStatus, Migrator, PlannedMigration};
pub use schema::{ColumnKind, ColumnSpec, Dialect, SchemaOperation, TableDefinition};
pub use sqlite_store::{SqliteOptions, SqliteStore};
pub use store::{AppliedVersion, LockAttempt, MigrationLock, SchemaStore, StoreTransaction};

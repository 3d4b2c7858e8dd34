use std::path::{Path, PathBuf};

use bookstore_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigrateConfig;

const ENV_DATABASE_PATH: &str = "BOOKSTORE_DATABASE_PATH";
const ENV_BUSY_TIMEOUT_MS: &str = "BOOKSTORE_BUSY_TIMEOUT_MS";
const ENV_MIGRATIONS_TABLE: &str = "BOOKSTORE_MIGRATIONS_TABLE";
const ENV_LOG_LEVEL: &str = "BOOKSTORE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "BOOKSTORE_LOG_FORMAT";

/// Builds a [`MigrateConfig`] from defaults, an optional config file and
/// `BOOKSTORE_*` environment variables, in that order of precedence.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    dotenv: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            dotenv: true,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Do not read a `.env` file from the working directory.
    pub fn without_dotenv(mut self) -> Self {
        self.dotenv = false;
        self
    }

    pub fn load(&self) -> Result<MigrateConfig> {
        if self.dotenv {
            match dotenvy::dotenv() {
                Ok(path) => debug!("loaded environment from {}", path.display()),
                Err(e) if e.not_found() => {}
                Err(e) => return Err(Error::Config(format!("failed to read .env: {e}"))),
            }
        }
        self.load_with_env(|key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) but reads overrides through `env`
    /// instead of the process environment.
    pub fn load_with_env<F>(&self, env: F) -> Result<MigrateConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.path {
            Some(path) => {
                let config = read_config_file(path)?;
                info!("loaded config from {}", path.display());
                config
            }
            None => MigrateConfig::default(),
        };

        apply_env_overrides(&mut config, env)?;
        config.validate()?;
        Ok(config)
    }
}

fn read_config_file(path: &Path) -> Result<MigrateConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    parse_config(path, &contents)
}

/// Parse `contents` using the format implied by the extension of `path`.
pub fn parse_config(path: &Path, contents: &str) -> Result<MigrateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
        "toml" => {
            toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
        }
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}

fn apply_env_overrides<F>(config: &mut MigrateConfig, env: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = env(ENV_DATABASE_PATH) {
        config.database.path = PathBuf::from(path);
    }
    if let Some(ms) = env(ENV_BUSY_TIMEOUT_MS) {
        config.database.busy_timeout_ms = ms
            .parse()
            .map_err(|_| Error::Config(format!("{ENV_BUSY_TIMEOUT_MS}: not a number: {ms}")))?;
    }
    if let Some(table) = env(ENV_MIGRATIONS_TABLE) {
        config.migrations.table = table;
    }
    if let Some(level) = env(ENV_LOG_LEVEL) {
        config.log.level = level;
    }
    if let Some(format) = env(ENV_LOG_FORMAT) {
        config.log.format = format.parse()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;
    use crate::model::LogFormat;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parses_yaml() {
        let yaml = "
database:
  path: /var/lib/bookstore/app.db
migrations:
  table: applied_versions
log:
  format: json
";
        let config = parse_config(Path::new("config.yml"), yaml).unwrap();
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/bookstore/app.db")
        );
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.migrations.table, "applied_versions");
        assert_eq!(config.migrations.lock_table, "schema_migrations_lock");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn parses_toml() {
        let toml = r#"
[database]
busy_timeout_ms = 250

[log]
level = "debug"
"#;
        let config = parse_config(Path::new("config.toml"), toml).unwrap();
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = parse_config(Path::new("config.ini"), "").unwrap_err();
        assert!(err.to_string().contains("unsupported config extension"));
    }

    #[test]
    fn loads_file_then_env_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "database:\n  path: from-file.db\nlog:\n  level: warn").unwrap();

        let env: HashMap<&str, &str> = [
            (ENV_DATABASE_PATH, "from-env.db"),
            (ENV_LOG_FORMAT, "json"),
        ]
        .into_iter()
        .collect();

        let config = ConfigLoader::new()
            .without_dotenv()
            .with_file(file.path())
            .load_with_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database.path, PathBuf::from("from-env.db"));
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = ConfigLoader::new()
            .without_dotenv()
            .with_file("/nonexistent/bookstore.yml")
            .load_with_env(no_env)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_env_override_is_rejected() {
        let err = ConfigLoader::new()
            .without_dotenv()
            .load_with_env(|k| (k == ENV_MIGRATIONS_TABLE).then(|| "bad-name".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("invalid table name"));

        let err = ConfigLoader::new()
            .without_dotenv()
            .load_with_env(|k| (k == ENV_BUSY_TIMEOUT_MS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }
}

mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use bookstore_common::Version;
use bookstore_config::{ConfigLoader, LogConfig, LogFormat, MigrateConfig};
use bookstore_db::{
    Dialect, MigrationError, Migrator, SchemaStore, SqliteOptions, SqliteStore,
    bookstore_registry,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "bookstore-migrate",
    version,
    about = "Apply, revert and inspect bookstore schema migrations"
)]
struct Cli {
    /// Config file (.yml, .yaml or .toml)
    #[arg(long, global = true, env = "BOOKSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overrides the config
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending migrations
    Up {
        /// Stop after this version
        #[arg(long = "to", value_name = "VERSION")]
        to: Option<Version>,

        /// Print the DDL that would run instead of running it
        #[arg(long)]
        dry_run: bool,

        /// SQL dialect for --dry-run output
        #[arg(long, requires = "dry_run")]
        dialect: Option<Dialect>,
    },
    /// Revert the most recently applied migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Show every migration and whether it is applied
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Clear a migration lock left by a crashed run
    Unlock,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error[config]: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match (e.downcast_ref::<MigrationError>(), error_kind(&e)) {
                // its message already names the failing source
                (Some(err), Some(kind)) => eprintln!("error[{kind}]: {err}"),
                (None, Some(kind)) => eprintln!("error[{kind}]: {e:#}"),
                (_, None) => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<MigrateConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let mut config = loader.load()?;

    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn open_migrator(config: &MigrateConfig, read_only: bool) -> Result<Migrator<SqliteStore>> {
    let options = SqliteOptions {
        migrations_table: config.migrations.table.clone(),
        lock_table: config.migrations.lock_table.clone(),
        busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
    };
    let path = &config.database.path;
    let opened = if !read_only {
        SqliteStore::open(path, options)
    } else if path.exists() {
        SqliteStore::open_read_only(path, options)
    } else {
        // nothing applied yet; inspect an empty schema instead of creating the file
        SqliteStore::in_memory(options)
    };
    let store = opened.with_context(|| format!("cannot open {}", path.display()))?;
    Ok(Migrator::new(bookstore_registry()?, store))
}

/// Commands that only inspect the database.
fn is_read_only(command: &Command) -> bool {
    matches!(
        command,
        Command::Status { .. } | Command::Up { dry_run: true, .. }
    )
}

/// The `error[<kind>]` tag for a failed command, if it has one.
fn error_kind(e: &anyhow::Error) -> Option<&'static str> {
    if let Some(err) = e.downcast_ref::<MigrationError>() {
        return Some(err.kind());
    }
    e.downcast_ref::<bookstore_common::Error>().map(|err| match err {
        bookstore_common::Error::Config(_) => "config",
        _ => "store",
    })
}

fn run(command: Command, config: &MigrateConfig) -> Result<()> {
    let migrator = open_migrator(config, is_read_only(&command))?;

    match command {
        Command::Up {
            to,
            dry_run: true,
            dialect,
        } => {
            let dialect = dialect.unwrap_or_else(|| migrator.store().dialect());
            let plan = migrator.plan_up(to.as_ref(), dialect)?;
            report::print_plan(&plan);
        }
        Command::Up { to, .. } => {
            let report = migrator.migrate_up(to.as_ref())?;
            report::print_report(&report);
        }
        Command::Down { steps } => {
            let report = migrator.migrate_down(steps)?;
            report::print_report(&report);
        }
        Command::Status { json } => {
            let status = migrator.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                report::print_status(&status);
            }
        }
        Command::Unlock => match migrator.force_unlock()? {
            Some(holder) => println!("released lock held by {holder}"),
            None => println!("no lock was held"),
        },
    }

    info!("done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_up_with_target() {
        let cli = Cli::try_parse_from(["bookstore-migrate", "up", "--to", "20211210001402"]).unwrap();
        match cli.command {
            Command::Up { to, dry_run, .. } => {
                assert_eq!(to.unwrap().as_str(), "20211210001402");
                assert!(!dry_run);
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn rejects_malformed_version() {
        assert!(Cli::try_parse_from(["bookstore-migrate", "up", "--to", "latest"]).is_err());
    }

    #[test]
    fn down_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["bookstore-migrate", "down"]).unwrap();
        assert!(matches!(cli.command, Command::Down { steps: 1 }));
    }

    #[test]
    fn only_inspection_commands_open_read_only() {
        let read_only = |args: &[&str]| {
            let cli = Cli::try_parse_from(args).unwrap();
            is_read_only(&cli.command)
        };
        assert!(read_only(&["bookstore-migrate", "status"]));
        assert!(read_only(&["bookstore-migrate", "up", "--dry-run"]));
        assert!(!read_only(&["bookstore-migrate", "up"]));
        assert!(!read_only(&["bookstore-migrate", "down"]));
        assert!(!read_only(&["bookstore-migrate", "unlock"]));
    }

    #[test]
    fn store_errors_are_tagged_through_context() {
        let err = anyhow::Error::from(bookstore_common::Error::Database(
            "unable to open database file".into(),
        ))
        .context("cannot open /nonexistent/dir/bookstore.db");
        assert_eq!(error_kind(&err), Some("store"));

        let err = anyhow::Error::from(MigrationError::UnknownVersion(
            Version::parse("1").unwrap(),
        ));
        assert_eq!(error_kind(&err), Some("unknown_version"));

        assert_eq!(error_kind(&anyhow::anyhow!("plain failure")), None);
    }

    #[test]
    fn status_on_missing_database_does_not_create_it() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = MigrateConfig::default();
        config.database.path = dir.path().join("bookstore.db");

        let migrator = open_migrator(&config, true).unwrap();
        assert!(migrator.status().unwrap().iter().all(|s| !s.applied));
        assert!(!config.database.path.exists());
    }

    #[test]
    fn dialect_requires_dry_run() {
        assert!(Cli::try_parse_from(["bookstore-migrate", "up", "--dialect", "mysql"]).is_err());
        let cli = Cli::try_parse_from([
            "bookstore-migrate",
            "--database",
            "/tmp/x.db",
            "up",
            "--dry-run",
            "--dialect",
            "mysql",
        ])
        .unwrap();
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(
            cli.command,
            Command::Up {
                dry_run: true,
                dialect: Some(Dialect::Mysql),
                ..
            }
        ));
    }
}

use bookstore_common::{Error, Version};
use thiserror::Error;

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Failures surfaced by the registry and the runner.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("migration version {0} is registered twice")]
    DuplicateVersion(Version),

    #[error("migration name {0:?} is registered twice")]
    DuplicateName(String),

    #[error("migration {version} failed: {source}")]
    MigrationFailed {
        version: Version,
        #[source]
        source: Error,
    },

    #[error("revert of migration {version} failed: {source}")]
    RevertFailed {
        version: Version,
        #[source]
        source: Error,
    },

    #[error("cannot revert {requested} migration(s): only {applied} applied")]
    NoMigrationsApplied { requested: usize, applied: usize },

    #[error("no migration with version {0} is registered")]
    UnknownVersion(Version),

    #[error("store records version {0} but no such migration is registered")]
    UnknownAppliedVersion(Version),

    #[error("migration lock is held by {owner}")]
    LockHeld { owner: String },

    #[error(transparent)]
    Store(#[from] Error),
}

impl MigrationError {
    /// Stable label for reporting, e.g. on the command line.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateVersion(_) => "duplicate_version",
            Self::DuplicateName(_) => "duplicate_name",
            Self::MigrationFailed { .. } => "migration_failed",
            Self::RevertFailed { .. } => "revert_failed",
            Self::NoMigrationsApplied { .. } => "no_migrations_applied",
            Self::UnknownVersion(_) => "unknown_version",
            Self::UnknownAppliedVersion(_) => "unknown_applied_version",
            Self::LockHeld { .. } => "lock_held",
            Self::Store(_) => "store",
        }
    }

    /// The migration version the failure concerns, if any.
    pub fn version(&self) -> Option<&Version> {
        match self {
            Self::DuplicateVersion(v)
            | Self::UnknownVersion(v)
            | Self::UnknownAppliedVersion(v)
            | Self::MigrationFailed { version: v, .. }
            | Self::RevertFailed { version: v, .. } => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_names_the_version() {
        let v = Version::parse("20211210001412").unwrap();
        let e = MigrationError::MigrationFailed {
            version: v.clone(),
            source: Error::Database("table books already exists".into()),
        };
        assert_eq!(
            e.to_string(),
            "migration 20211210001412 failed: database error: table books already exists"
        );
        assert_eq!(e.kind(), "migration_failed");
        assert_eq!(e.version(), Some(&v));
    }

    #[test]
    fn kinds_are_distinct_per_variant() {
        let e = MigrationError::NoMigrationsApplied {
            requested: 3,
            applied: 2,
        };
        assert_eq!(e.kind(), "no_migrations_applied");
        assert_eq!(e.to_string(), "cannot revert 3 migration(s): only 2 applied");
        assert!(e.version().is_none());

        let e = MigrationError::from(Error::Database("locked".into()));
        assert_eq!(e.kind(), "store");
        assert_eq!(e.to_string(), "database error: locked");
    }
}

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bookstore_common::{Error, Result, Version};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info};

use crate::schema::Dialect;
use crate::store::{AppliedVersion, LockAttempt, SchemaStore};

const LOCK_ATTEMPTS: usize = 5;

/// Table names and connection settings for [`SqliteStore`].
///
/// Table names are spliced into SQL and must already be validated.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub migrations_table: String,
    pub lock_table: String,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            migrations_table: "schema_migrations".to_string(),
            lock_table: "schema_migrations_lock".to_string(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// [`SchemaStore`] backed by a SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    options: SqliteOptions,
}

impl SqliteStore {
    pub fn open(db_path: &Path, options: SqliteOptions) -> Result<Self> {
        info!("opening schema store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::with_connection(conn, options)
    }

    /// Open an existing database without write access. Used by commands
    /// that only inspect the store; a missing file is an error, not created.
    pub fn open_read_only(db_path: &Path, options: SqliteOptions) -> Result<Self> {
        info!("opening schema store at {} (read-only)", db_path.display());
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        Self::with_connection(conn, options)
    }

    pub fn in_memory(options: SqliteOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::with_connection(conn, options)
    }

    fn with_connection(conn: Connection, options: SqliteOptions) -> Result<Self> {
        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            options,
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("schema store lock poisoned".into()))
    }

    fn batch(&self, sql: &str, what: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(sql)
            .map_err(|e| Error::Database(format!("{what}: {e}")))
    }
}

impl SchemaStore for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn ensure_bookkeeping(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{migrations}\" (
                version TEXT PRIMARY KEY NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS \"{lock}\" (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );",
            migrations = self.options.migrations_table,
            lock = self.options.lock_table,
        );
        self.batch(&sql, "failed to create bookkeeping tables")
    }

    fn applied_versions(&self) -> Result<Vec<AppliedVersion>> {
        if !self.table_exists(&self.options.migrations_table)? {
            return Ok(Vec::new());
        }

        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT version, applied_at FROM \"{}\"",
                self.options.migrations_table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| Error::Database(format!("failed to query applied versions: {e}")))?;

        let mut applied = Vec::new();
        for row in rows {
            let (version, applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read version row: {e}")))?;
            applied.push(AppliedVersion {
                version: Version::parse(version)?,
                applied_at: parse_datetime(&applied_at)?,
            });
        }
        applied.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(applied)
    }

    fn begin(&self) -> Result<()> {
        self.batch("BEGIN IMMEDIATE", "failed to begin transaction")
    }

    fn execute(&self, ddl: &str) -> Result<()> {
        debug!(%ddl, "executing");
        self.batch(ddl, "statement failed")
    }

    fn record_applied(&self, version: &Version, applied_at: DateTime<Utc>) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "INSERT INTO \"{}\" (version, applied_at) VALUES (?1, ?2)",
                self.options.migrations_table
            ),
            params![version.as_str(), applied_at.to_rfc3339()],
        )
        .map_err(|e| Error::Database(format!("failed to record version {version}: {e}")))?;
        Ok(())
    }

    fn remove_applied(&self, version: &Version) -> Result<()> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                &format!(
                    "DELETE FROM \"{}\" WHERE version = ?1",
                    self.options.migrations_table
                ),
                params![version.as_str()],
            )
            .map_err(|e| Error::Database(format!("failed to remove version {version}: {e}")))?;
        if removed == 0 {
            return Err(Error::Database(format!("version {version} is not recorded")));
        }
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.batch("COMMIT", "failed to commit")
    }

    fn rollback(&self) -> Result<()> {
        self.batch("ROLLBACK", "failed to roll back")
    }

    fn try_lock(&self, owner: &str) -> Result<LockAttempt> {
        let conn = self.connection()?;
        for _ in 0..LOCK_ATTEMPTS {
            let inserted = conn
                .execute(
                    &format!(
                        "INSERT OR IGNORE INTO \"{}\" (id, owner, acquired_at) VALUES (1, ?1, ?2)",
                        self.options.lock_table
                    ),
                    params![owner, Utc::now().to_rfc3339()],
                )
                .map_err(|e| Error::Database(format!("failed to acquire migration lock: {e}")))?;
            if inserted == 1 {
                return Ok(LockAttempt::Acquired);
            }

            let holder: Option<String> = conn
                .query_row(
                    &format!("SELECT owner FROM \"{}\" WHERE id = 1", self.options.lock_table),
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| Error::Database(format!("failed to read migration lock: {e}")))?;

            if let Some(attempt) = lock_outcome(holder, owner) {
                return Ok(attempt);
            }
            debug!(%owner, "migration lock released during acquisition, retrying");
        }
        Err(Error::Database(format!(
            "migration lock kept changing hands; gave up after {LOCK_ATTEMPTS} attempts"
        )))
    }

    fn unlock(&self, owner: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!(
                "DELETE FROM \"{}\" WHERE id = 1 AND owner = ?1",
                self.options.lock_table
            ),
            params![owner],
        )
        .map_err(|e| Error::Database(format!("failed to release migration lock: {e}")))?;
        Ok(())
    }

    fn force_unlock(&self) -> Result<Option<String>> {
        if !self.table_exists(&self.options.lock_table)? {
            return Ok(None);
        }
        let conn = self.connection()?;
        let holder: Option<String> = conn
            .query_row(
                &format!("SELECT owner FROM \"{}\" WHERE id = 1", self.options.lock_table),
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to read migration lock: {e}")))?;
        conn.execute(&format!("DELETE FROM \"{}\"", self.options.lock_table), [])
            .map_err(|e| Error::Database(format!("failed to clear migration lock: {e}")))?;
        Ok(holder)
    }

    fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.connection()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to inspect schema: {e}")))?;
        Ok(count > 0)
    }
}

/// Interpret the lock row seen after an ignored insert. `None` means the row
/// vanished in between and the insert must be retried.
fn lock_outcome(holder: Option<String>, owner: &str) -> Option<LockAttempt> {
    match holder {
        Some(holder) if holder == owner => Some(LockAttempt::Acquired),
        Some(holder) => Some(LockAttempt::HeldBy(holder)),
        None => None,
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // rows written by hand with datetime('now') use "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
        })
        .map_err(|e| Error::Database(format!("invalid applied_at {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::store::{MigrationLock, StoreTransaction};

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory(SqliteOptions::default()).unwrap();
        store.ensure_bookkeeping().unwrap();
        store
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn applied_versions_empty_without_bookkeeping_table() {
        let store = SqliteStore::in_memory(SqliteOptions::default()).unwrap();
        assert!(store.applied_versions().unwrap().is_empty());
        assert!(!store.table_exists("schema_migrations").unwrap());
    }

    #[test]
    fn record_and_remove_versions() {
        let store = store();
        store.record_applied(&v("10"), Utc::now()).unwrap();
        store.record_applied(&v("9"), Utc::now()).unwrap();

        let applied: Vec<_> = store
            .applied_versions()
            .unwrap()
            .into_iter()
            .map(|a| a.version)
            .collect();
        assert_eq!(applied, [v("9"), v("10")]);

        store.remove_applied(&v("9")).unwrap();
        assert_eq!(store.applied_versions().unwrap().len(), 1);
        assert!(store.remove_applied(&v("9")).is_err());
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = store();
        {
            let _tx = StoreTransaction::begin(&store).unwrap();
            store.execute("CREATE TABLE publishers (id INTEGER)").unwrap();
            store.record_applied(&v("1"), Utc::now()).unwrap();
        }
        assert!(!store.table_exists("publishers").unwrap());
        assert!(store.applied_versions().unwrap().is_empty());

        let tx = StoreTransaction::begin(&store).unwrap();
        store.execute("CREATE TABLE publishers (id INTEGER)").unwrap();
        tx.commit().unwrap();
        assert!(store.table_exists("publishers").unwrap());
    }

    #[test]
    fn lock_excludes_other_owners_until_released() {
        let store = store();
        {
            let _lock = MigrationLock::acquire(&store, "runner-a").unwrap();
            assert_eq!(
                store.try_lock("runner-b").unwrap(),
                LockAttempt::HeldBy("runner-a".into())
            );
            let err = MigrationLock::acquire(&store, "runner-b").err().unwrap();
            assert!(matches!(err, MigrationError::LockHeld { owner } if owner == "runner-a"));
        }
        assert_eq!(store.try_lock("runner-b").unwrap(), LockAttempt::Acquired);
    }

    #[test]
    fn force_unlock_reports_previous_holder() {
        let store = store();
        assert_eq!(store.try_lock("crashed").unwrap(), LockAttempt::Acquired);
        assert_eq!(store.force_unlock().unwrap().as_deref(), Some("crashed"));
        assert_eq!(store.force_unlock().unwrap(), None);
    }

    #[test]
    fn lock_row_vanishing_mid_acquire_is_retried() {
        assert_eq!(lock_outcome(None, "runner-a"), None);
        assert_eq!(
            lock_outcome(Some("runner-a".into()), "runner-a"),
            Some(LockAttempt::Acquired)
        );
        assert_eq!(
            lock_outcome(Some("runner-b".into()), "runner-a"),
            Some(LockAttempt::HeldBy("runner-b".into()))
        );
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let dt = parse_datetime("2021-12-10 00:14:02").unwrap();
        assert_eq!(dt.to_rfc3339(), "2021-12-10T00:14:02+00:00");
        assert!(parse_datetime("yesterday").is_err());
    }
}

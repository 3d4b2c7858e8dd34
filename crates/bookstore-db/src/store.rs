use bookstore_common::{Result, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MigrationError, MigrationResult};
use crate::schema::Dialect;

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedVersion {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of [`SchemaStore::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    HeldBy(String),
}

/// Blocking capability the runner needs from a relational store.
///
/// Connection management is the implementor's business. Calls between
/// [`begin`](Self::begin) and [`commit`](Self::commit)/[`rollback`](Self::rollback)
/// must land in the same transaction.
pub trait SchemaStore {
    fn dialect(&self) -> Dialect;

    /// Create the bookkeeping and lock tables if they are missing.
    fn ensure_bookkeeping(&self) -> Result<()>;

    /// Applied versions in ascending version order. Empty if the bookkeeping
    /// table does not exist yet.
    fn applied_versions(&self) -> Result<Vec<AppliedVersion>>;

    fn begin(&self) -> Result<()>;
    fn execute(&self, ddl: &str) -> Result<()>;
    fn record_applied(&self, version: &Version, applied_at: DateTime<Utc>) -> Result<()>;
    fn remove_applied(&self, version: &Version) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    fn try_lock(&self, owner: &str) -> Result<LockAttempt>;
    fn unlock(&self, owner: &str) -> Result<()>;

    /// Clear the lock regardless of owner, returning whoever held it.
    fn force_unlock(&self) -> Result<Option<String>>;

    fn table_exists(&self, table: &str) -> Result<bool>;
}

/// Open transaction on a [`SchemaStore`]. Dropping it without a successful
/// [`commit`](Self::commit) rolls back.
pub struct StoreTransaction<'a, S: SchemaStore + ?Sized> {
    store: &'a S,
    finished: bool,
}

impl<'a, S: SchemaStore + ?Sized> StoreTransaction<'a, S> {
    pub fn begin(store: &'a S) -> Result<Self> {
        store.begin()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<()> {
        self.store.commit()?;
        self.finished = true;
        Ok(())
    }
}

impl<S: SchemaStore + ?Sized> Drop for StoreTransaction<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("rolling back open transaction");
        if let Err(e) = self.store.rollback() {
            warn!("rollback failed: {e}");
        }
    }
}

/// Exclusive advisory lock on the store, released on drop.
pub struct MigrationLock<'a, S: SchemaStore + ?Sized> {
    store: &'a S,
    owner: String,
}

impl<'a, S: SchemaStore + ?Sized> MigrationLock<'a, S> {
    pub fn acquire(store: &'a S, owner: impl Into<String>) -> MigrationResult<Self> {
        let owner = owner.into();
        match store.try_lock(&owner)? {
            LockAttempt::Acquired => {
                debug!(%owner, "migration lock acquired");
                Ok(Self { store, owner })
            }
            LockAttempt::HeldBy(holder) => Err(MigrationError::LockHeld { owner: holder }),
        }
    }
}

impl<S: SchemaStore + ?Sized> Drop for MigrationLock<'_, S> {
    fn drop(&mut self) {
        match self.store.unlock(&self.owner) {
            Ok(()) => debug!(owner = %self.owner, "migration lock released"),
            Err(e) => warn!(owner = %self.owner, "failed to release migration lock: {e}"),
        }
    }
}

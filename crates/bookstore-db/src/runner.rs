use std::collections::{BTreeMap, BTreeSet};

use bookstore_common::{Result, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{MigrationError, MigrationResult};
use crate::migrations::MigrationDefinition;
use crate::registry::Registry;
use crate::schema::Dialect;
use crate::store::{MigrationLock, SchemaStore, StoreTransaction};

/// One line of [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: Version,
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

/// A pending migration and the DDL its `up` would run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMigration {
    pub version: Version,
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub applied: Vec<Version>,
    pub reverted: Vec<Version>,
    /// Unapplied versions older than the newest applied one. They stay pending.
    pub skipped: Vec<Version>,
}

struct Pending<'r> {
    run: Vec<&'r MigrationDefinition>,
    skipped: Vec<Version>,
}

/// Reconciles the store's applied versions with a [`Registry`].
///
/// Every mutating call holds the store's migration lock for its whole
/// duration and runs each migration in its own transaction.
pub struct Migrator<S: SchemaStore> {
    registry: Registry,
    store: S,
    owner: String,
}

impl<S: SchemaStore> Migrator<S> {
    pub fn new(registry: Registry, store: S) -> Self {
        Self {
            registry,
            store,
            owner: format!("migrator-{}", Uuid::new_v4()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Apply every pending migration up to and including `target`
    /// (default: the newest registered version), oldest first.
    ///
    /// Stops at the first failure; migrations committed before it stay applied.
    pub fn migrate_up(&self, target: Option<&Version>) -> MigrationResult<MigrationReport> {
        let target = self.resolve_target(target)?;
        self.store.ensure_bookkeeping()?;
        let _lock = MigrationLock::acquire(&self.store, self.owner.as_str())?;

        let applied = self.load_applied()?;
        let pending = self.pending(&applied, target.as_ref());
        let mut report = MigrationReport {
            skipped: pending.skipped,
            ..Default::default()
        };
        for version in &report.skipped {
            warn!(%version, "unapplied migration is older than the latest applied one; leaving it pending");
        }

        if pending.run.is_empty() {
            info!("schema is up to date");
            return Ok(report);
        }

        for def in pending.run {
            info!(version = %def.version, name = %def.name, "applying migration");
            self.apply(def)
                .map_err(|source| MigrationError::MigrationFailed {
                    version: def.version.clone(),
                    source,
                })?;
            report.applied.push(def.version.clone());
        }

        info!(count = report.applied.len(), "migrations applied");
        Ok(report)
    }

    /// Revert the `steps` most recent migrations, newest first.
    pub fn migrate_down(&self, steps: usize) -> MigrationResult<MigrationReport> {
        let mut report = MigrationReport::default();
        if steps == 0 {
            return Ok(report);
        }

        // checked before bookkeeping exists so a refused call leaves no trace
        let recorded = self.store.applied_versions()?.len();
        if steps > recorded {
            return Err(MigrationError::NoMigrationsApplied {
                requested: steps,
                applied: recorded,
            });
        }

        self.store.ensure_bookkeeping()?;
        let _lock = MigrationLock::acquire(&self.store, self.owner.as_str())?;

        let applied = self.load_applied()?;
        if steps > applied.len() {
            return Err(MigrationError::NoMigrationsApplied {
                requested: steps,
                applied: applied.len(),
            });
        }

        for version in applied.keys().rev().take(steps) {
            let def = self
                .registry
                .find(version)
                .ok_or_else(|| MigrationError::UnknownAppliedVersion(version.clone()))?;
            info!(version = %def.version, name = %def.name, "reverting migration");
            self.revert(def, version)
                .map_err(|source| MigrationError::RevertFailed {
                    version: def.version.clone(),
                    source,
                })?;
            report.reverted.push(def.version.clone());
        }

        info!(count = report.reverted.len(), "migrations reverted");
        Ok(report)
    }

    /// Registered migrations in version order with their applied state.
    /// Read-only.
    pub fn status(&self) -> MigrationResult<Vec<MigrationStatus>> {
        let applied: BTreeMap<Version, DateTime<Utc>> = self
            .store
            .applied_versions()?
            .into_iter()
            .map(|a| (a.version, a.applied_at))
            .collect();

        for version in applied.keys().filter(|v| !self.registry.contains(v)) {
            warn!(%version, "store records a version with no registered migration");
        }

        Ok(self
            .registry
            .list_ordered()
            .map(|def| {
                let applied_at = applied.get(&def.version).copied();
                MigrationStatus {
                    version: def.version.clone(),
                    name: def.name.clone(),
                    applied: applied_at.is_some(),
                    applied_at,
                }
            })
            .collect())
    }

    /// What [`migrate_up`](Self::migrate_up) would run, rendered for
    /// `dialect`, without changing the store.
    pub fn plan_up(
        &self,
        target: Option<&Version>,
        dialect: Dialect,
    ) -> MigrationResult<Vec<PlannedMigration>> {
        let target = self.resolve_target(target)?;
        let applied = self.load_applied()?;
        Ok(self
            .pending(&applied, target.as_ref())
            .run
            .into_iter()
            .map(|def| PlannedMigration {
                version: def.version.clone(),
                name: def.name.clone(),
                sql: def.up.to_sql(dialect),
            })
            .collect())
    }

    /// Clear a lock left behind by a crashed run. Returns the previous holder.
    pub fn force_unlock(&self) -> MigrationResult<Option<String>> {
        let holder = self.store.force_unlock()?;
        if let Some(holder) = &holder {
            warn!(%holder, "migration lock forcibly released");
        }
        Ok(holder)
    }

    fn resolve_target(&self, target: Option<&Version>) -> MigrationResult<Option<Version>> {
        match target {
            Some(version) if !self.registry.contains(version) => {
                Err(MigrationError::UnknownVersion(version.clone()))
            }
            Some(version) => Ok(Some(version.clone())),
            None => Ok(self.registry.latest().map(|def| def.version.clone())),
        }
    }

    fn load_applied(&self) -> MigrationResult<BTreeMap<Version, DateTime<Utc>>> {
        let applied = self.store.applied_versions()?;
        if let Some(orphan) = applied.iter().find(|a| !self.registry.contains(&a.version)) {
            return Err(MigrationError::UnknownAppliedVersion(orphan.version.clone()));
        }
        Ok(applied
            .into_iter()
            .map(|a| (a.version, a.applied_at))
            .collect())
    }

    fn pending(
        &self,
        applied: &BTreeMap<Version, DateTime<Utc>>,
        target: Option<&Version>,
    ) -> Pending<'_> {
        let applied: BTreeSet<&Version> = applied.keys().collect();
        let highest = applied.last().copied();
        let mut pending = Pending {
            run: Vec::new(),
            skipped: Vec::new(),
        };

        for def in self.registry.list_ordered() {
            if target.is_some_and(|t| def.version > *t) {
                break;
            }
            if applied.contains(&def.version) {
                continue;
            }
            match highest {
                Some(h) if def.version < *h => pending.skipped.push(def.version.clone()),
                _ => pending.run.push(def),
            }
        }
        pending
    }

    fn apply(&self, def: &MigrationDefinition) -> Result<()> {
        let tx = StoreTransaction::begin(&self.store)?;
        self.store.execute(&def.up.to_sql(self.store.dialect()))?;
        self.store.record_applied(&def.version, Utc::now())?;
        tx.commit()
    }

    /// `recorded` is the token as the store spelled it, which may differ in
    /// zero padding from `def.version`.
    fn revert(&self, def: &MigrationDefinition, recorded: &Version) -> Result<()> {
        let tx = StoreTransaction::begin(&self.store)?;
        self.store.execute(&def.down.to_sql(self.store.dialect()))?;
        self.store.remove_applied(recorded)?;
        tx.commit()
    }
}

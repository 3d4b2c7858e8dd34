use std::collections::BTreeMap;

use bookstore_common::Version;

use crate::error::{MigrationError, MigrationResult};
use crate::migrations::MigrationDefinition;

/// Ordered, explicitly populated set of migration definitions.
///
/// The registry never touches the store.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: BTreeMap<Version, MigrationDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(
        definitions: impl IntoIterator<Item = MigrationDefinition>,
    ) -> MigrationResult<Self> {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(def)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, def: MigrationDefinition) -> MigrationResult<()> {
        if self.definitions.contains_key(&def.version) {
            return Err(MigrationError::DuplicateVersion(def.version));
        }
        if self.definitions.values().any(|d| d.name == def.name) {
            return Err(MigrationError::DuplicateName(def.name));
        }
        self.definitions.insert(def.version.clone(), def);
        Ok(())
    }

    /// Definitions in ascending version order. The iterator is cheap to
    /// clone, so callers can walk it more than once.
    pub fn list_ordered(&self) -> impl Iterator<Item = &MigrationDefinition> + Clone + '_ {
        self.definitions.values()
    }

    pub fn find(&self, version: &Version) -> Option<&MigrationDefinition> {
        self.definitions.get(version)
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.definitions.contains_key(version)
    }

    pub fn latest(&self) -> Option<&MigrationDefinition> {
        self.definitions.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

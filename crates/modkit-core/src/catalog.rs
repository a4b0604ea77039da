//! In-memory extension registry.

use std::collections::BTreeMap;

use crate::model::GadgetId;
use crate::services::{ExtensionRegistry, RegistryEntry, RegistryError};

/// Catalog of registered contributions, keyed by `(kind, key)`.
///
/// Keys are unique per kind: a second registration of the same key is
/// rejected and leaves the existing entry untouched.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<(String, String), RegistryEntry>,
}

impl Catalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Look up an entry by kind and key.
    pub fn get(&self, kind: &str, key: &str) -> Option<&RegistryEntry> {
        self.entries.get(&(kind.to_string(), key.to_string()))
    }

    /// Check whether a key is registered under `kind`.
    pub fn contains(&self, kind: &str, key: &str) -> bool {
        self.get(kind, key).is_some()
    }

    /// List all keys registered under `kind` (sorted).
    pub fn keys(&self, kind: &str) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| e.kind == kind)
            .map(|e| e.key.as_str())
            .collect()
    }

    /// Iterate over every entry, sorted by kind then key.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ExtensionRegistry for Catalog {
    fn register(&mut self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let slot = (entry.kind.clone(), entry.key.clone());
        if let Some(existing) = self.entries.get(&slot) {
            return Err(RegistryError::Duplicate {
                kind: entry.kind,
                key: entry.key,
                owner: existing.owner.clone(),
            });
        }
        tracing::debug!(owner = %entry.owner, kind = %entry.kind, key = %entry.key, "Registered entry");
        self.entries.insert(slot, entry);
        Ok(())
    }

    fn unregister_all_from(&mut self, owner: &GadgetId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| &e.owner != owner);
        before - self.entries.len()
    }

    fn entries_from(&self, owner: &GadgetId) -> Vec<&RegistryEntry> {
        self.entries.values().filter(|e| &e.owner == owner).collect()
    }
}

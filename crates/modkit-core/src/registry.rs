//! Directories of loaded bundles and gadgets.
//!
//! The registry owns every loaded [`Bundle`] and [`Gadget`], the user's
//! enabled intent and the set of currently active gadgets. It performs no
//! lifecycle work itself; structural changes are queued as
//! [`RegistryEvent`]s the engine drains after each operation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::model::{Bundle, BundleHandle, Gadget, GadgetId};

/// A structural change recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    BundleAdded(String),
    BundleRemoved(String),
    Activated(GadgetId),
    Deactivated(GadgetId),
    EnabledChanged { key: String, enabled: bool },
}

impl RegistryEvent {
    /// Whether the event changes what [`GadgetRegistry::enabled_flags`]
    /// reports.
    pub fn changes_flags(&self) -> bool {
        matches!(
            self,
            Self::BundleAdded(_) | Self::BundleRemoved(_) | Self::EnabledChanged { .. }
        )
    }
}

#[derive(Debug, Default)]
pub struct GadgetRegistry {
    bundles: BTreeMap<String, Bundle>,
    by_origin: HashMap<BundleHandle, String>,
    by_module: HashMap<String, String>,
    gadgets: HashMap<GadgetId, Gadget>,
    /// Gadget name to every gadget carrying it, in load order.
    by_name: HashMap<String, Vec<GadgetId>>,
    active: BTreeSet<GadgetId>,
    /// Enabled intent keyed by bundle name or qualified gadget id. Kept for
    /// unloaded bundles so intent survives a reload.
    flags: BTreeMap<String, bool>,
    events: Vec<RegistryEvent>,
}

impl GadgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed enabled intent from persisted flags. Loaded entries are updated.
    pub fn seed_flags(&mut self, flags: BTreeMap<String, bool>) {
        for (key, enabled) in flags {
            if let Some(bundle) = self.bundles.get_mut(&key) {
                bundle.enabled = enabled;
            } else if let Some(gadget) = GadgetId::parse(&key).and_then(|id| self.gadgets.get_mut(&id)) {
                gadget.enabled = enabled;
            }
            self.flags.insert(key, enabled);
        }
    }

    pub(crate) fn bundle_intent(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(true)
    }

    pub(crate) fn gadget_intent(&self, id: &GadgetId) -> bool {
        self.flags.get(&id.to_string()).copied().unwrap_or(true)
    }

    /// Add a bundle and its gadgets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateBundle`] when the name or origin is taken,
    /// and [`Error::Structural`] when two gadgets share a name.
    pub fn insert_bundle(&mut self, bundle: Bundle, gadgets: Vec<Gadget>) -> Result<()> {
        if self.bundles.contains_key(&bundle.name) || self.by_origin.contains_key(&bundle.origin) {
            return Err(Error::DuplicateBundle {
                name: bundle.name.clone(),
                origin: bundle.origin.to_string(),
            });
        }
        let mut seen = BTreeSet::new();
        for gadget in &gadgets {
            if gadget.id.bundle != bundle.name || !seen.insert(gadget.id.gadget.as_str()) {
                return Err(Error::structural(
                    bundle.origin.as_str(),
                    format!("duplicate or foreign gadget '{}'", gadget.id),
                ));
            }
        }

        let name = bundle.name.clone();
        self.by_origin.insert(bundle.origin.clone(), name.clone());
        self.by_module.insert(bundle.module.key().to_string(), name.clone());
        for gadget in gadgets {
            self.by_name
                .entry(gadget.id.gadget.clone())
                .or_default()
                .push(gadget.id.clone());
            self.gadgets.insert(gadget.id.clone(), gadget);
        }
        self.bundles.insert(name.clone(), bundle);
        self.events.push(RegistryEvent::BundleAdded(name));
        Ok(())
    }

    /// Remove a bundle and its gadgets, returning them.
    pub fn remove_bundle(&mut self, name: &str) -> Option<(Bundle, Vec<Gadget>)> {
        let bundle = self.bundles.remove(name)?;
        self.by_origin.remove(&bundle.origin);
        if self.by_module.get(bundle.module.key()).map(String::as_str) == Some(name) {
            self.by_module.remove(bundle.module.key());
        }

        let mut gadgets = Vec::with_capacity(bundle.gadgets.len());
        for id in &bundle.gadgets {
            if self.active.remove(id) {
                self.events.push(RegistryEvent::Deactivated(id.clone()));
            }
            if let Some(ids) = self.by_name.get_mut(&id.gadget) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    self.by_name.remove(&id.gadget);
                }
            }
            if let Some(gadget) = self.gadgets.remove(id) {
                gadgets.push(gadget);
            }
        }
        self.events.push(RegistryEvent::BundleRemoved(name.to_string()));
        Some((bundle, gadgets))
    }

    pub fn contains_bundle(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }

    pub fn bundle(&self, name: &str) -> Option<&Bundle> {
        self.bundles.get(name)
    }

    pub(crate) fn bundle_mut(&mut self, name: &str) -> Option<&mut Bundle> {
        self.bundles.get_mut(name)
    }

    pub fn bundle_by_origin(&self, origin: &BundleHandle) -> Option<&Bundle> {
        self.by_origin.get(origin).and_then(|name| self.bundles.get(name))
    }

    pub fn bundle_by_module(&self, key: &str) -> Option<&Bundle> {
        self.by_module.get(key).and_then(|name| self.bundles.get(name))
    }

    /// Bundles in load order.
    pub fn bundles(&self) -> Vec<&Bundle> {
        let mut bundles: Vec<&Bundle> = self.bundles.values().collect();
        bundles.sort_by_key(|b| b.sequence);
        bundles
    }

    pub fn bundle_count(&self) -> usize {
        self.bundles.len()
    }

    pub fn gadget(&self, id: &GadgetId) -> Option<&Gadget> {
        self.gadgets.get(id)
    }

    pub(crate) fn gadget_mut(&mut self, id: &GadgetId) -> Option<&mut Gadget> {
        self.gadgets.get_mut(id)
    }

    /// Gadgets in load order: by bundle sequence, then declaration order.
    pub fn gadgets(&self) -> Vec<&Gadget> {
        self.bundles()
            .into_iter()
            .flat_map(|b| b.gadgets.iter())
            .filter_map(|id| self.gadgets.get(id))
            .collect()
    }

    pub fn gadget_count(&self) -> usize {
        self.gadgets.len()
    }

    /// `(bundle sequence, declaration index)`; lower loads first.
    pub(crate) fn rank(&self, id: &GadgetId) -> (u64, usize) {
        self.bundles
            .get(&id.bundle)
            .map(|b| {
                let index = b.gadgets.iter().position(|g| g == id).unwrap_or(usize::MAX);
                (b.sequence, index)
            })
            .unwrap_or((u64::MAX, usize::MAX))
    }

    /// Resolve a dependency target to a loaded gadget.
    ///
    /// A qualified `bundle:gadget` target resolves only to that gadget. A
    /// bare name prefers an active gadget of that name, then the first one
    /// loaded.
    pub fn resolve(&self, target: &str) -> Option<GadgetId> {
        if let Some(id) = GadgetId::parse(target) {
            return self.gadgets.contains_key(&id).then_some(id);
        }
        let candidates = self.by_name.get(target)?;
        candidates
            .iter()
            .find(|id| self.active.contains(*id))
            .or_else(|| candidates.first())
            .cloned()
    }

    /// Gadget intent and bundle intent both allow activation.
    pub fn is_runnable(&self, id: &GadgetId) -> bool {
        let Some(gadget) = self.gadgets.get(id) else {
            return false;
        };
        gadget.enabled && self.bundles.get(&id.bundle).is_some_and(|b| b.enabled)
    }

    pub fn is_active(&self, id: &GadgetId) -> bool {
        self.active.contains(id)
    }

    pub fn active(&self) -> &BTreeSet<GadgetId> {
        &self.active
    }

    pub(crate) fn activate(&mut self, id: &GadgetId) {
        if self.active.insert(id.clone()) {
            self.events.push(RegistryEvent::Activated(id.clone()));
        }
    }

    pub(crate) fn deactivate(&mut self, id: &GadgetId) {
        if self.active.remove(id) {
            self.events.push(RegistryEvent::Deactivated(id.clone()));
        }
    }

    /// Record enabled intent for one gadget. Returns whether it changed.
    pub fn set_gadget_enabled(&mut self, id: &GadgetId, enabled: bool) -> Result<bool> {
        let gadget = self
            .gadgets
            .get_mut(id)
            .ok_or_else(|| Error::UnknownGadget(id.to_string()))?;
        let changed = gadget.enabled != enabled;
        gadget.enabled = enabled;
        self.record_flag(id.to_string(), enabled, changed);
        Ok(changed)
    }

    /// Record enabled intent for a bundle. Returns whether it changed.
    pub fn set_bundle_enabled(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let bundle = self
            .bundles
            .get_mut(name)
            .ok_or_else(|| Error::UnknownBundle(name.to_string()))?;
        let changed = bundle.enabled != enabled;
        bundle.enabled = enabled;
        self.record_flag(name.to_string(), enabled, changed);
        Ok(changed)
    }

    fn record_flag(&mut self, key: String, enabled: bool, changed: bool) {
        self.flags.insert(key.clone(), enabled);
        if changed {
            self.events.push(RegistryEvent::EnabledChanged { key, enabled });
        }
    }

    /// Current intent for every known bundle and gadget, including intent
    /// remembered for bundles that are not loaded.
    pub fn enabled_flags(&self) -> BTreeMap<String, bool> {
        let mut flags = self.flags.clone();
        for bundle in self.bundles.values() {
            flags.insert(bundle.name.clone(), bundle.enabled);
        }
        for gadget in self.gadgets.values() {
            flags.insert(gadget.id.to_string(), gadget.enabled);
        }
        flags
    }

    /// Take every event recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }
}

//! Cascading operations: unload, reload, refresh and enable/disable.
//!
//! Each of them first finds everything that depends on its target by
//! flattening the dependency tree breadth-first from every affected gadget,
//! then tears the whole set down in reverse activation order: every
//! affected gadget is uninitialized before any is unregistered, and every
//! one is unregistered before any override is removed.

use std::collections::HashMap;
use std::fmt;

use super::{LoadOrderEngine, TreeNode};
use crate::Result;
use crate::error::Error;
use crate::model::{Bundle, BundleHandle, GadgetId, GadgetState, Stage};
use crate::report::{AdmissionFailure, GadgetFailure};

/// Target of [`LoadOrderEngine::set_enabled`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Toggle {
    Gadget(GadgetId),
    Bundle(String),
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gadget(id) => write!(f, "gadget {id}"),
            Self::Bundle(name) => write!(f, "bundle {name}"),
        }
    }
}

impl LoadOrderEngine {
    /// Every gadget reachable from `id` in the dependency tree, in
    /// activation order, excluding `id`.
    pub fn dependents_of(&self, id: &GadgetId) -> Vec<GadgetId> {
        let Some(&node) = self.nodes.get(id) else {
            return Vec::new();
        };
        self.tree
            .flatten_breadth_first(node, true)
            .unwrap_or_default()
            .into_iter()
            .skip(1)
            .filter_map(|n| self.tree.value(n).and_then(TreeNode::gadget).cloned())
            .collect()
    }

    /// `name` followed by every bundle that has to go down with it.
    ///
    /// A bundle is affected when one of its gadgets depends, directly or
    /// transitively, on a gadget of an affected bundle, or when it declares
    /// a bundle-level dependency on an affected bundle. Discovery recurses
    /// on each newly affected bundle.
    pub fn affected_bundles(&self, name: &str) -> Vec<String> {
        let mut affected = vec![name.to_string()];
        let mut next = 0;
        while next < affected.len() {
            let current = affected[next].clone();
            next += 1;
            let Some(bundle) = self.registry.bundle(&current) else {
                continue;
            };

            let mut found: Vec<String> = Vec::new();
            for id in bundle.gadgets() {
                found.extend(self.dependents_of(id).into_iter().map(|d| d.bundle));
            }
            for other in self.registry.bundles() {
                if other.dependencies().iter().any(|d| d == &current) {
                    found.push(other.name().to_string());
                }
            }
            for bundle in found {
                if !affected.contains(&bundle) {
                    affected.push(bundle);
                }
            }
        }
        affected
    }

    /// Gadgets of `bundles`, latest in activation order first.
    fn teardown_order(&self, bundles: &[String]) -> Vec<GadgetId> {
        let order = self.load_order();
        let position: HashMap<&GadgetId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut gadgets: Vec<GadgetId> = bundles
            .iter()
            .filter_map(|name| self.registry.bundle(name))
            .flat_map(|b| b.gadgets().iter().cloned())
            .collect();
        gadgets.sort_by_key(|id| std::cmp::Reverse(position.get(id).copied().unwrap_or(0)));
        gadgets
    }

    /// Tear down `gadgets` (already in teardown order) stage by stage.
    fn teardown_all(&mut self, gadgets: &[GadgetId]) {
        let states: Vec<(GadgetId, GadgetState)> = gadgets
            .iter()
            .filter_map(|id| self.registry.gadget(id).map(|g| (id.clone(), g.state())))
            .collect();

        for (id, state) in &states {
            if *state == GadgetState::Initialized {
                if let Some(gadget) = self.registry.gadget_mut(id) {
                    gadget.behavior.uninitialize();
                }
            }
        }
        for (id, state) in &states {
            if state.has_reached(GadgetState::Registered) {
                let removed = self.extensions.unregister_all_from(id);
                tracing::debug!(gadget = %id, removed, "Unregistered entries");
            }
        }
        for (id, state) in &states {
            if state.has_reached(GadgetState::Patched) {
                self.interception.remove_overrides(id);
            }
        }
        for (id, _) in &states {
            if let Some(gadget) = self.registry.gadget_mut(id) {
                gadget.state = GadgetState::Disabled;
            }
            self.registry.deactivate(id);
        }
    }

    /// Unload a bundle and every bundle depending on it.
    ///
    /// Returns the names of every unloaded bundle, `name` first. Enabled
    /// intent of the unloaded bundles is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBundle`] if no bundle has that name.
    pub fn unload(&mut self, name: &str) -> Result<Vec<String>> {
        if !self.registry.contains_bundle(name) {
            return Err(Error::UnknownBundle(name.to_string()));
        }
        let affected = self.affected_bundles(name);
        let gadgets = self.teardown_order(&affected);
        tracing::info!(bundle = %name, cascade = ?affected, gadgets = gadgets.len(), "Unloading");

        self.teardown_all(&gadgets);
        for id in &gadgets {
            if let Some(node) = self.nodes.remove(id) {
                self.tree.remove_from_tree(node, false, false)?;
            }
        }
        for bundle in &affected {
            self.registry.remove_bundle(bundle);
        }
        self.queue.retain(|id| !affected.contains(&id.bundle));

        self.rebuild_tree()?;
        self.drain_events();
        Ok(affected)
    }

    /// Unload `name` with its dependents, read all of them again from
    /// their origins and run one pass over the result.
    ///
    /// Dependents that fail to re-read are reported as pass warnings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBundle`] if `name` is not loaded, or the read
    /// error if `name` itself cannot be read again; it then stays unloaded.
    pub fn reload(&mut self, name: &str) -> Result<&Bundle> {
        if !self.registry.contains_bundle(name) {
            return Err(Error::UnknownBundle(name.to_string()));
        }
        let mut origins: Vec<(u64, String, BundleHandle)> = self
            .affected_bundles(name)
            .iter()
            .filter_map(|b| self.registry.bundle(b))
            .map(|b| (b.sequence(), b.name().to_string(), b.origin().clone()))
            .collect();
        origins.sort();

        self.unload(name)?;
        tracing::info!(bundle = %name, bundles = origins.len(), "Reloading");

        self.batched(|engine| {
            let mut target_error = None;
            for (_, bundle, origin) in &origins {
                if let Err(err) = engine.read_bundle(origin) {
                    if bundle == name {
                        target_error = Some(err);
                    } else {
                        tracing::warn!(bundle = %bundle, error = %err, "Dependent not reloaded");
                        engine
                            .pending_warnings
                            .push(format!("bundle '{bundle}' not reloaded: {err}"));
                    }
                }
            }
            target_error.map_or(Ok(()), Err)
        })?;

        self.registry
            .bundle(name)
            .ok_or_else(|| Error::UnknownBundle(name.to_string()))
    }

    /// Re-drive the gadgets of `name` and its dependents through the
    /// pipeline with fresh behavior instances, without re-reading anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownBundle`] if `name` is not loaded.
    pub fn refresh(&mut self, name: &str) -> Result<&Bundle> {
        if !self.registry.contains_bundle(name) {
            return Err(Error::UnknownBundle(name.to_string()));
        }
        let affected = self.affected_bundles(name);
        let gadgets = self.teardown_order(&affected);
        tracing::info!(bundle = %name, cascade = ?affected, "Refreshing");

        self.teardown_all(&gadgets);
        for id in gadgets.iter().rev() {
            if let Some(gadget) = self.registry.gadget_mut(id) {
                gadget.renew_behavior();
            }
            if self.registry.is_runnable(id) && !self.queue.contains(id) {
                self.queue.push(id.clone());
            }
        }

        self.batched(|_| Ok(()))?;
        self.registry
            .bundle(name)
            .ok_or_else(|| Error::UnknownBundle(name.to_string()))
    }

    /// Record enabled intent for a gadget or bundle and apply it.
    ///
    /// Disabling tears the target down together with every active
    /// dependent; the dependents keep their own intent and come back when
    /// the target is enabled again. Enabling queues the target and its
    /// dependents for a pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown, or if flags cannot be
    /// persisted after a disable.
    pub fn set_enabled(&mut self, target: &Toggle, enabled: bool) -> Result<()> {
        let gadgets = match target {
            Toggle::Gadget(id) => {
                self.registry.set_gadget_enabled(id, enabled)?;
                vec![id.clone()]
            }
            Toggle::Bundle(name) => {
                self.registry.set_bundle_enabled(name, enabled)?;
                self.registry
                    .bundle(name)
                    .map(|b| b.gadgets().to_vec())
                    .unwrap_or_default()
            }
        };
        tracing::info!(%target, enabled, "Changing enabled intent");

        if enabled {
            self.enable_gadgets(&gadgets)
        } else {
            self.disable_gadgets(&gadgets)
        }
    }

    fn enable_gadgets(&mut self, targets: &[GadgetId]) -> Result<()> {
        self.batched(|engine| {
            for target in targets {
                let mut candidates = vec![target.clone()];
                candidates.extend(engine.dependents_of(target));
                for id in candidates {
                    if engine.registry.is_runnable(&id)
                        && !engine.registry.is_active(&id)
                        && !engine.queue.contains(&id)
                    {
                        engine.queue.push(id);
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    fn disable_gadgets(&mut self, targets: &[GadgetId]) -> Result<()> {
        let mut cause: HashMap<GadgetId, GadgetId> = HashMap::new();
        for target in targets {
            if !self.registry.is_active(target) {
                continue;
            }
            for dependent in self.dependents_of(target) {
                if self.registry.is_active(&dependent) && !targets.contains(&dependent) {
                    cause.entry(dependent).or_insert_with(|| target.clone());
                }
            }
        }

        let order = self.load_order();
        let mut affected: Vec<GadgetId> = order
            .into_iter()
            .filter(|id| {
                cause.contains_key(id) || (targets.contains(id) && self.registry.is_active(id))
            })
            .collect();
        affected.reverse();
        self.teardown_all(&affected);

        for (dependent, target) in cause {
            tracing::warn!(gadget = %dependent, dependency = %target, "Disabled with its dependency");
            if let Some(gadget) = self.registry.gadget_mut(&dependent) {
                gadget.last_failure = Some(GadgetFailure::admission(
                    dependent.clone(),
                    Stage::Admission,
                    AdmissionFailure::DependencyInactive { target },
                ));
            }
        }
        for target in targets {
            if let Some(gadget) = self.registry.gadget_mut(target) {
                gadget.last_failure = None;
            }
        }
        self.queue.retain(|id| !targets.contains(id));

        self.drain_events();
        if self.config.persist_flags {
            let flags = self.registry.enabled_flags();
            self.config_store.persist_enabled_flags(&flags)?;
            self.flags_dirty = false;
        }
        Ok(())
    }
}

//! Declarative patches and the in-memory interception service that
//! installs them.
//!
//! Bundles described entirely by a manifest carry no code. Their payload
//! module holds [`DeclaredPatches`], and [`DeclaredInterception`] records
//! those patches as installed overrides so that ordering and conflict
//! detection can run over them.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::behavior::{GadgetBehavior, GadgetResult, Registrar};
use crate::model::GadgetId;
use crate::services::{
    Contributor, GadgetConfig, InstalledPoint, InterceptionError, InterceptionService,
    OrderingHints, PatchOutcome, PayloadModule, PointOutcome,
};

/// One override a gadget declares for an extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPatch {
    pub point: String,
    #[serde(default)]
    pub short_circuit: bool,
    #[serde(flatten)]
    pub hints: OrderingHints,
}

impl DeclaredPatch {
    pub fn new(point: impl Into<String>) -> Self {
        Self {
            point: point.into(),
            short_circuit: false,
            hints: OrderingHints::default(),
        }
    }

    pub fn short_circuiting(mut self) -> Self {
        self.short_circuit = true;
        self
    }
}

/// Payload module contents: declared patches keyed by gadget name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredPatches {
    by_gadget: BTreeMap<String, Vec<DeclaredPatch>>,
}

impl DeclaredPatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gadget: impl Into<String>, patches: Vec<DeclaredPatch>) -> Self {
        self.insert(gadget, patches);
        self
    }

    pub fn insert(&mut self, gadget: impl Into<String>, patches: Vec<DeclaredPatch>) {
        self.by_gadget.entry(gadget.into()).or_default().extend(patches);
    }

    pub fn patches_for(&self, gadget: &str) -> &[DeclaredPatch] {
        self.by_gadget.get(gadget).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Interception service that records declared patches in memory.
///
/// When constructed with a set of known points, patches on any other
/// point are reported as missing targets.
#[derive(Debug, Clone, Default)]
pub struct DeclaredInterception {
    known_points: Option<BTreeSet<String>>,
    installed: BTreeMap<String, Vec<Contributor>>,
}

impl DeclaredInterception {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known_points<I, S>(points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_points: Some(points.into_iter().map(Into::into).collect()),
            installed: BTreeMap::new(),
        }
    }

    /// Contributors currently installed on `point`.
    pub fn contributors(&self, point: &str) -> &[Contributor] {
        self.installed.get(point).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `gadget` has anything installed.
    pub fn has_overrides_from(&self, gadget: &GadgetId) -> bool {
        self.installed
            .values()
            .any(|contributors| contributors.iter().any(|c| &c.owner == gadget))
    }
}

impl InterceptionService for DeclaredInterception {
    fn install_overrides(
        &mut self,
        gadget: &GadgetId,
        module: &PayloadModule,
    ) -> Result<PatchOutcome, InterceptionError> {
        let patches = module
            .downcast_ref::<DeclaredPatches>()
            .ok_or_else(|| InterceptionError::UnsupportedPayload(module.key().to_string()))?;

        let mut outcome = PatchOutcome::default();
        for patch in patches.patches_for(&gadget.gadget) {
            let known = self
                .known_points
                .as_ref()
                .is_none_or(|points| points.contains(&patch.point));
            if !known {
                outcome.push(patch.point.clone(), PointOutcome::MissingTarget);
                continue;
            }
            self.installed
                .entry(patch.point.clone())
                .or_default()
                .push(Contributor {
                    owner: gadget.clone(),
                    short_circuits: patch.short_circuit,
                    hints: patch.hints.clone(),
                });
            outcome.push(patch.point.clone(), PointOutcome::Installed);
        }
        Ok(outcome)
    }

    fn remove_overrides(&mut self, gadget: &GadgetId) {
        for contributors in self.installed.values_mut() {
            contributors.retain(|c| &c.owner != gadget);
        }
        self.installed.retain(|_, contributors| !contributors.is_empty());
    }

    fn installed_points(&self) -> Vec<InstalledPoint> {
        self.installed
            .iter()
            .map(|(point, contributors)| InstalledPoint {
                point: point.clone(),
                contributors: contributors.clone(),
            })
            .collect()
    }
}

/// Behavior for gadgets with no code of their own; traces each hook.
#[derive(Debug, Clone)]
pub struct LoggingBehavior {
    id: GadgetId,
}

impl LoggingBehavior {
    pub fn new(id: GadgetId) -> Self {
        Self { id }
    }
}

impl GadgetBehavior for LoggingBehavior {
    fn load_config(&mut self, config: &GadgetConfig) -> GadgetResult {
        tracing::debug!(gadget = %self.id, keys = config.len(), "load_config");
        Ok(())
    }

    fn pre_patch(&mut self) -> GadgetResult {
        tracing::debug!(gadget = %self.id, "pre_patch");
        Ok(())
    }

    fn register(&mut self, registrar: &mut Registrar<'_>) -> GadgetResult {
        tracing::debug!(gadget = %registrar.owner(), "register");
        Ok(())
    }

    fn initialize(&mut self) -> GadgetResult {
        tracing::debug!(gadget = %self.id, "initialize");
        Ok(())
    }

    fn uninitialize(&mut self) {
        tracing::debug!(gadget = %self.id, "uninitialize");
    }
}

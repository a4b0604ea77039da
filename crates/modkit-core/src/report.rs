//! Pass results: activations, failures, patch statistics and conflicts.

use std::collections::BTreeMap;
use std::fmt;

use modkit_graph::{Version, VersionRequirement};
use serde::Serialize;

use crate::conflicts::ConflictReport;
use crate::model::{GadgetId, PatchStats, Stage};

/// Why a gadget was refused activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AdmissionFailure {
    #[error("dependency '{target}' is not loaded")]
    MissingDependency { target: String },

    #[error("dependency {target} is not active")]
    DependencyInactive { target: GadgetId },

    #[error("dependency {target} is version {actual}, which does not satisfy {required}")]
    IncompatibleVersion {
        target: GadgetId,
        required: VersionRequirement,
        actual: Version,
    },

    #[error("built for engine {required}, running {actual}")]
    IncompatibleEngine {
        required: VersionRequirement,
        actual: Version,
    },

    #[error("required bundle '{bundle}' is not loaded")]
    MissingBundle { bundle: String },

    #[error("required bundle '{bundle}' is disabled")]
    BundleDisabled { bundle: String },
}

impl AdmissionFailure {
    /// Whether a later pass could admit the gadget without its own bundle
    /// changing: the dependency was absent or inactive rather than present
    /// and incompatible.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. }
                | Self::DependencyInactive { .. }
                | Self::MissingBundle { .. }
                | Self::BundleDisabled { .. }
        )
    }
}

/// Category of a per-gadget failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum FailureKind {
    Admission(AdmissionFailure),
    /// A lifecycle hook or collaborator call returned an error.
    Stage(String),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admission(reason) => write!(f, "{reason}"),
            Self::Stage(message) => f.write_str(message),
        }
    }
}

/// A gadget that was disabled during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GadgetFailure {
    pub gadget: GadgetId,
    pub stage: Stage,
    #[serde(flatten)]
    pub kind: FailureKind,
}

impl GadgetFailure {
    pub fn admission(gadget: GadgetId, stage: Stage, reason: AdmissionFailure) -> Self {
        Self {
            gadget,
            stage,
            kind: FailureKind::Admission(reason),
        }
    }

    pub fn is_admission(&self) -> bool {
        matches!(self.kind, FailureKind::Admission(_))
    }
}

impl fmt::Display for GadgetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at {}: {}", self.gadget, self.stage, self.kind)
    }
}

/// Outcome of one pipeline pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Gadgets that reached `Initialized`, in activation order.
    pub activated: Vec<GadgetId>,
    pub failures: Vec<GadgetFailure>,
    pub patch_stats: BTreeMap<GadgetId, PatchStats>,
    pub conflicts: ConflictReport,
    /// Problems that did not disable anything, such as a failed flag write.
    pub warnings: Vec<String>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.conflicts.is_empty() && self.warnings.is_empty()
    }

    pub fn failure_for(&self, gadget: &GadgetId) -> Option<&GadgetFailure> {
        self.failures.iter().find(|f| &f.gadget == gadget)
    }

    pub fn was_activated(&self, gadget: &GadgetId) -> bool {
        self.activated.contains(gadget)
    }
}

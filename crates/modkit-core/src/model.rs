//! Domain model: bundles, gadgets, identities and lifecycle states.

use std::fmt;
use std::sync::Arc;

use modkit_graph::{Version, VersionRequirement};
use serde::{Deserialize, Serialize};

use crate::behavior::{GadgetBehavior, GadgetFactory};
use crate::report::GadgetFailure;
use crate::services::{PayloadModule, SymbolTable};

/// Identity of a gadget: its owning bundle plus its name in that bundle.
///
/// Displays and serializes as `bundle:gadget`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GadgetId {
    pub bundle: String,
    pub gadget: String,
}

impl GadgetId {
    pub fn new(bundle: impl Into<String>, gadget: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            gadget: gadget.into(),
        }
    }

    /// Parse the qualified `bundle:gadget` form.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (bundle, gadget) = qualified.split_once(':')?;
        if bundle.is_empty() || gadget.is_empty() || gadget.contains(':') {
            return None;
        }
        Some(Self::new(bundle, gadget))
    }

    /// Whether `key` names this gadget, its bundle, or the qualified id.
    pub fn matches(&self, key: &str) -> bool {
        key == self.gadget || key == self.bundle || Self::parse(key).as_ref() == Some(self)
    }
}

impl fmt::Display for GadgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bundle, self.gadget)
    }
}

impl TryFrom<String> for GadgetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("expected 'bundle:gadget', got '{value}'"))
    }
}

impl From<GadgetId> for String {
    fn from(id: GadgetId) -> Self {
        id.to_string()
    }
}

/// Opaque identity of the place a bundle was read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleHandle(String);

impl BundleHandle {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a gadget.
///
/// The active path runs `Queued` through `Initialized` in declaration
/// order; `Disabled` can be entered from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GadgetState {
    Queued,
    ConfigLoaded,
    PrePatched,
    Patched,
    Registered,
    Initialized,
    Disabled,
}

impl GadgetState {
    /// Whether the gadget is on the active path and at or beyond `state`.
    pub fn has_reached(self, state: GadgetState) -> bool {
        self != GadgetState::Disabled && self >= state
    }
}

impl fmt::Display for GadgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::ConfigLoaded => "config-loaded",
            Self::PrePatched => "pre-patched",
            Self::Patched => "patched",
            Self::Registered => "registered",
            Self::Initialized => "initialized",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Pipeline stage a gadget passes through during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Admission,
    Config,
    PrePatch,
    Patch,
    Register,
    Initialize,
}

impl Stage {
    /// State a gadget holds after completing this stage.
    pub fn completed_state(self) -> GadgetState {
        match self {
            Self::Admission => GadgetState::Queued,
            Self::Config => GadgetState::ConfigLoaded,
            Self::PrePatch => GadgetState::PrePatched,
            Self::Patch => GadgetState::Patched,
            Self::Register => GadgetState::Registered,
            Self::Initialize => GadgetState::Initialized,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Admission => "admission",
            Self::Config => "config",
            Self::PrePatch => "pre-patch",
            Self::Patch => "patch",
            Self::Register => "register",
            Self::Initialize => "initialize",
        };
        f.write_str(name)
    }
}

/// A declared dependency of a gadget on another gadget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GadgetDependency {
    /// Bare gadget name or qualified `bundle:gadget`.
    pub target: String,
    pub requirement: Option<VersionRequirement>,
}

/// Outcome counters of the patch stage for one gadget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchStats {
    pub patched: usize,
    pub skipped_missing: usize,
    pub skipped_error: usize,
}

impl PatchStats {
    pub fn total(&self) -> usize {
        self.patched + self.skipped_missing + self.skipped_error
    }
}

/// A loaded gadget.
pub struct Gadget {
    pub(crate) id: GadgetId,
    pub(crate) dependencies: Vec<GadgetDependency>,
    pub(crate) target_engine: Option<VersionRequirement>,
    pub(crate) enabled: bool,
    pub(crate) state: GadgetState,
    pub(crate) behavior: Box<dyn GadgetBehavior>,
    pub(crate) factory: GadgetFactory,
    pub(crate) patch_stats: PatchStats,
    pub(crate) last_failure: Option<GadgetFailure>,
}

impl Gadget {
    pub(crate) fn new(
        id: GadgetId,
        dependencies: Vec<GadgetDependency>,
        target_engine: Option<VersionRequirement>,
        factory: GadgetFactory,
    ) -> Self {
        let behavior = factory();
        Self {
            id,
            dependencies,
            target_engine,
            enabled: true,
            state: GadgetState::Disabled,
            behavior,
            factory,
            patch_stats: PatchStats::default(),
            last_failure: None,
        }
    }

    pub fn id(&self) -> &GadgetId {
        &self.id
    }

    pub fn bundle(&self) -> &str {
        &self.id.bundle
    }

    pub fn name(&self) -> &str {
        &self.id.gadget
    }

    pub fn dependencies(&self) -> &[GadgetDependency] {
        &self.dependencies
    }

    pub fn target_engine(&self) -> Option<&VersionRequirement> {
        self.target_engine.as_ref()
    }

    /// User intent; independent of whether the gadget is currently active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> GadgetState {
        self.state
    }

    pub fn patch_stats(&self) -> PatchStats {
        self.patch_stats
    }

    pub fn last_failure(&self) -> Option<&GadgetFailure> {
        self.last_failure.as_ref()
    }

    /// Replace the behavior with a fresh instance from the factory.
    pub(crate) fn renew_behavior(&mut self) {
        self.behavior = (self.factory)();
        self.patch_stats = PatchStats::default();
        self.last_failure = None;
    }
}

impl fmt::Debug for Gadget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gadget")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("target_engine", &self.target_engine)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("patch_stats", &self.patch_stats)
            .field("last_failure", &self.last_failure)
            .finish_non_exhaustive()
    }
}

/// A loaded bundle.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub(crate) name: String,
    pub(crate) origin: BundleHandle,
    pub(crate) version: Version,
    pub(crate) dependencies: Vec<String>,
    pub(crate) gadgets: Vec<GadgetId>,
    pub(crate) module: PayloadModule,
    pub(crate) enabled: bool,
    pub(crate) symbols: Option<Arc<SymbolTable>>,
    pub(crate) sequence: u64,
}

impl Bundle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &BundleHandle {
        &self.origin
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Names of bundles this bundle requires.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Owned gadgets in declaration order.
    pub fn gadgets(&self) -> &[GadgetId] {
        &self.gadgets
    }

    pub fn module(&self) -> &PayloadModule {
        &self.module
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_deref()
    }

    /// Monotonic load sequence number; later loads sort after earlier ones.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

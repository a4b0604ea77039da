//! Collaborator interfaces consumed by the engine.
//!
//! The engine never reads archives, rewrites code or stores settings
//! itself. Each of those concerns reaches it through one of the traits
//! below. `modkit-core` ships a directory-backed [`BundleSource`]
//! ([`DirectorySource`](crate::directory::DirectorySource)) and in-memory
//! implementations of the rest
//! ([`DeclaredInterception`](crate::declared::DeclaredInterception),
//! [`MemoryConfigStore`](crate::config::MemoryConfigStore),
//! [`Catalog`](crate::catalog::Catalog)).

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use modkit_graph::Specificity;
use serde::{Deserialize, Serialize};

use crate::behavior::GadgetFactory;
use crate::model::{BundleHandle, GadgetId, PatchStats};

// --- bundle discovery ---

/// Manifest data read from a bundle's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleManifest {
    pub name: String,
    pub version: String,
    /// Names of bundles that must be loaded and enabled first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Source-specific payload locator.
    #[serde(default)]
    pub payload: Option<String>,
}

/// Handle to a bundle's loaded code module.
///
/// The engine only uses the key for identity lookups; the contents are
/// opaque and passed through to the interception service and symbol
/// loader, which downcast them.
#[derive(Clone)]
pub struct PayloadModule {
    key: String,
    data: Arc<dyn Any + Send + Sync>,
}

impl PayloadModule {
    pub fn new<T: Any + Send + Sync>(key: impl Into<String>, data: T) -> Self {
        Self {
            key: key.into(),
            data: Arc::new(data),
        }
    }

    /// A module carrying no data.
    pub fn empty(key: impl Into<String>) -> Self {
        Self::new(key, ())
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl fmt::Debug for PayloadModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadModule")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// A dependency as declared by a gadget, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDecl {
    /// Bare gadget name or qualified `bundle:gadget`.
    pub gadget: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub specificity: Option<Specificity>,
}

impl DependencyDecl {
    pub fn on(gadget: impl Into<String>) -> Self {
        Self {
            gadget: gadget.into(),
            version: None,
            specificity: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_specificity(mut self, specificity: Specificity) -> Self {
        self.specificity = Some(specificity);
        self
    }
}

/// A gadget exposed by a payload.
#[derive(Clone)]
pub struct GadgetDeclaration {
    pub name: String,
    pub dependencies: Vec<DependencyDecl>,
    /// Engine version the gadget was built against.
    pub target_engine: Option<String>,
    pub target_specificity: Option<Specificity>,
    pub factory: GadgetFactory,
}

impl fmt::Debug for GadgetDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GadgetDeclaration")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("target_engine", &self.target_engine)
            .field("target_specificity", &self.target_specificity)
            .finish_non_exhaustive()
    }
}

/// A bundle's loaded code: its module plus the gadgets it declares.
#[derive(Debug, Clone)]
pub struct Payload {
    pub module: PayloadModule,
    pub gadgets: Vec<GadgetDeclaration>,
}

/// Errors raised by a [`BundleSource`] or [`SymbolLoader`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Bundle origin not found: {0}")]
    NotFound(String),

    #[error("Invalid manifest at {origin}: {reason}")]
    InvalidManifest { origin: String, reason: String },

    #[error("Failed to load payload from {origin}: {reason}")]
    Payload { origin: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Discovers bundles and reads their manifests and payloads.
pub trait BundleSource {
    /// Every bundle origin currently available, in discovery order.
    fn list_bundles(&self) -> Result<Vec<BundleHandle>, SourceError>;

    fn read_manifest(&self, handle: &BundleHandle) -> Result<BundleManifest, SourceError>;

    fn load_payload(
        &self,
        handle: &BundleHandle,
        manifest: &BundleManifest,
    ) -> Result<Payload, SourceError>;
}

/// A [`BundleSource`] with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

impl BundleSource for EmptySource {
    fn list_bundles(&self) -> Result<Vec<BundleHandle>, SourceError> {
        Ok(Vec::new())
    }

    fn read_manifest(&self, handle: &BundleHandle) -> Result<BundleManifest, SourceError> {
        Err(SourceError::NotFound(handle.to_string()))
    }

    fn load_payload(
        &self,
        handle: &BundleHandle,
        _manifest: &BundleManifest,
    ) -> Result<Payload, SourceError> {
        Err(SourceError::NotFound(handle.to_string()))
    }
}

// --- interception ---

/// Result of installing one extension point override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum PointOutcome {
    Installed,
    /// The point does not exist in this runtime; a soft skip.
    MissingTarget,
    Failed(String),
}

/// Per-point results of one `install_overrides` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub points: Vec<(String, PointOutcome)>,
}

impl PatchOutcome {
    pub fn push(&mut self, point: impl Into<String>, outcome: PointOutcome) {
        self.points.push((point.into(), outcome));
    }

    pub fn stats(&self) -> PatchStats {
        let mut stats = PatchStats::default();
        for (_, outcome) in &self.points {
            match outcome {
                PointOutcome::Installed => stats.patched += 1,
                PointOutcome::MissingTarget => stats.skipped_missing += 1,
                PointOutcome::Failed(_) => stats.skipped_error += 1,
            }
        }
        stats
    }
}

/// Ordering metadata a contributor declares for an extension point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderingHints {
    pub priority: i32,
    /// Owners (any [`GadgetId::matches`] key) this contributor runs before.
    pub before: Vec<String>,
    pub after: Vec<String>,
    /// Owners whose override this contributor knowingly replaces.
    pub overrides: Vec<String>,
    pub overridden_by: Vec<String>,
}

/// One override installed on an extension point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub owner: GadgetId,
    /// Whether the override can skip the implementation it wraps.
    pub short_circuits: bool,
    pub hints: OrderingHints,
}

/// An extension point and everything currently installed on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPoint {
    pub point: String,
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptionError {
    #[error("Payload module '{0}' is not understood by this interception service")]
    UnsupportedPayload(String),

    #[error("Interception failed for {gadget}: {reason}")]
    Failed { gadget: GadgetId, reason: String },
}

/// Installs and removes a gadget's extension point overrides.
pub trait InterceptionService {
    /// Install every override `gadget` declares in `module`.
    ///
    /// Per-point problems are reported in the outcome; an `Err` means the
    /// call as a whole failed and the engine disables the gadget.
    fn install_overrides(
        &mut self,
        gadget: &GadgetId,
        module: &PayloadModule,
    ) -> Result<PatchOutcome, InterceptionError>;

    /// Remove everything `gadget` installed. Idempotent.
    fn remove_overrides(&mut self, gadget: &GadgetId);

    fn installed_points(&self) -> Vec<InstalledPoint>;
}

// --- configuration ---

/// A gadget's configuration document.
pub type GadgetConfig = toml::Table;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config {key}: {source}")]
    Parse {
        key: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-gadget configuration and persisted enabled flags.
pub trait ConfigStore {
    /// Configuration for `gadget`; an empty table when none is stored.
    fn load(&self, gadget: &GadgetId) -> Result<GadgetConfig, ConfigError>;

    /// Persisted enabled flags keyed by bundle name or qualified gadget id.
    fn enabled_flags(&self) -> Result<BTreeMap<String, bool>, ConfigError>;

    fn persist_enabled_flags(&mut self, flags: &BTreeMap<String, bool>) -> Result<(), ConfigError>;
}

// --- extension registries ---

/// One contribution registered into a host registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub owner: GadgetId,
    /// Category of the contribution, e.g. `"command"` or `"item"`.
    pub kind: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} '{key}' is already registered by {owner}")]
    Duplicate {
        kind: String,
        key: String,
        owner: GadgetId,
    },

    #[error("{kind} '{key}' was rejected: {reason}")]
    Rejected {
        kind: String,
        key: String,
        reason: String,
    },
}

/// Host registry gadgets contribute entries to during registration.
pub trait ExtensionRegistry {
    fn register(&mut self, entry: RegistryEntry) -> Result<(), RegistryError>;

    /// Remove every entry owned by `owner`, returning how many were removed.
    fn unregister_all_from(&mut self, owner: &GadgetId) -> usize;

    fn entries_from(&self, owner: &GadgetId) -> Vec<&RegistryEntry>;
}

// --- symbols ---

/// Symbol name to resolved location.
pub type SymbolTable = BTreeMap<String, String>;

/// Loads a payload's debug symbols; runs on a background thread.
pub trait SymbolLoader: Send + Sync {
    fn load_symbols(&self, module: &PayloadModule) -> Result<SymbolTable, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_patch_outcome_stats() {
        let mut outcome = PatchOutcome::default();
        outcome.push("render", PointOutcome::Installed);
        outcome.push("save", PointOutcome::Installed);
        outcome.push("legacy", PointOutcome::MissingTarget);
        outcome.push("tick", PointOutcome::Failed("bad signature".into()));

        assert_eq!(
            outcome.stats(),
            PatchStats {
                patched: 2,
                skipped_missing: 1,
                skipped_error: 1,
            }
        );
    }

    #[test]
    fn test_payload_module_downcast() {
        let module = PayloadModule::new("core.dll", 42u32);
        assert_eq!(module.key(), "core.dll");
        assert_eq!(module.downcast_ref::<u32>(), Some(&42));
        assert!(module.downcast_ref::<String>().is_none());
        assert!(PayloadModule::empty("x").downcast_ref::<u32>().is_none());
    }

    #[test]
    fn test_bundle_manifest_rejects_unknown_fields() {
        let err = toml::from_str::<BundleManifest>("name = \"a\"\nversion = \"1\"\nauthor = \"me\"");
        assert!(err.is_err());

        let manifest: BundleManifest =
            toml::from_str("name = \"a\"\nversion = \"1.2\"\ndependencies = [\"b\"]").unwrap();
        assert_eq!(manifest.dependencies, vec!["b".to_string()]);
        assert_eq!(manifest.payload, None);
    }

    #[test]
    fn test_dependency_decl_builder() {
        let decl = DependencyDecl::on("y")
            .with_version("1.0")
            .with_specificity(Specificity::Major);
        assert_eq!(decl.gadget, "y");
        assert_eq!(decl.version.as_deref(), Some("1.0"));
        assert_eq!(decl.specificity, Some(Specificity::Major));
    }

    #[test]
    fn test_empty_source_lists_nothing() {
        let source = EmptySource;
        assert!(source.list_bundles().unwrap().is_empty());
        assert!(matches!(
            source.read_manifest(&BundleHandle::new("x")),
            Err(SourceError::NotFound(_))
        ));
    }
}

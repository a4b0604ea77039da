//! Load-order engine for modkit
//!
//! This crate drives independently authored bundles ("mods") and the
//! gadgets they expose through a staged activation pipeline:
//!
//! - **Registry**: directories of loaded bundles and gadgets, enabled
//!   intent and the active set
//! - **Engine**: dependency admission, config, pre-patch, patch, conflict
//!   detection, registration and initialization, plus cascading
//!   unload/reload/refresh and enable/disable
//! - **Services**: the narrow traits through which bundle sources,
//!   interception, configuration storage and extension registries are
//!   consumed
//! - **Declarative bundles**: `bundle.toml` manifests, a directory-backed
//!   source and the interception service that installs declared patches
//!
//! # Architecture
//!
//! ```text
//!                 modkit-cli
//!                      |
//!                 modkit-core
//!                      |
//!                 modkit-graph
//! ```
//!
//! # Example
//!
//! ```
//! use modkit_core::{EmptySource, LoadOrderEngine};
//!
//! let mut engine = LoadOrderEngine::builder(EmptySource).build().unwrap();
//! let report = engine.load_all().unwrap();
//! assert!(report.activated.is_empty());
//! ```

pub mod behavior;
pub mod catalog;
pub mod config;
pub mod conflicts;
pub mod declared;
pub mod directory;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod model;
pub mod registry;
pub mod report;
pub mod services;
pub mod symbols;

pub use behavior::{GadgetBehavior, GadgetError, GadgetFactory, GadgetResult, Registrar};
pub use catalog::Catalog;
pub use config::{ENABLED_FLAGS_FILE, EngineConfig, MemoryConfigStore, TomlConfigStore};
pub use conflicts::{ConflictPair, ConflictReport, PointConflicts, detect_conflicts};
pub use declared::{DeclaredInterception, DeclaredPatch, DeclaredPatches, LoggingBehavior};
pub use directory::DirectorySource;
pub use engine::{EngineBuilder, LoadOrderEngine, Toggle, TreeNode};
pub use error::{Error, Result};
pub use manifest::{GadgetManifest, MANIFEST_FILE, ManifestDocument};
pub use model::{Bundle, BundleHandle, Gadget, GadgetDependency, GadgetId, GadgetState, PatchStats, Stage};
pub use registry::{GadgetRegistry, RegistryEvent};
pub use report::{AdmissionFailure, FailureKind, GadgetFailure, PassReport};
pub use services::{
    BundleManifest, BundleSource, ConfigError, ConfigStore, Contributor, DependencyDecl,
    ExtensionRegistry, GadgetConfig, GadgetDeclaration, InstalledPoint, InterceptionError,
    InterceptionService, EmptySource, OrderingHints, Payload, PayloadModule, PatchOutcome,
    PointOutcome, RegistryEntry, RegistryError, SourceError, SymbolLoader, SymbolTable,
};
pub use symbols::SymbolPreloader;

pub use modkit_graph::{Specificity, Version, VersionRequirement};

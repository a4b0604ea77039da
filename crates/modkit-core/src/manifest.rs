//! `bundle.toml` manifest documents.
//!
//! A manifest fully describes a declarative bundle:
//!
//! ```toml
//! [bundle]
//! name = "combat"
//! version = "1.2"
//! dependencies = ["core"]
//!
//! [[gadgets]]
//! name = "damage"
//! dependencies = [{ gadget = "stats", version = "1.0", specificity = "minor" }]
//!
//! [[gadgets.patches]]
//! point = "Player.TakeHit"
//! short_circuit = true
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use modkit_graph::Specificity;
use serde::{Deserialize, Serialize};

use crate::behavior::{GadgetBehavior, GadgetFactory};
use crate::declared::{DeclaredPatch, DeclaredPatches, LoggingBehavior};
use crate::model::GadgetId;
use crate::services::{BundleManifest, DependencyDecl, GadgetDeclaration, Payload, PayloadModule, SourceError};

/// Canonical manifest file name.
pub const MANIFEST_FILE: &str = "bundle.toml";

/// Parsed `bundle.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    pub bundle: BundleManifest,
    #[serde(default)]
    pub gadgets: Vec<GadgetManifest>,
}

/// A gadget entry in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GadgetManifest {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
    #[serde(default)]
    pub target_engine: Option<String>,
    #[serde(default)]
    pub target_specificity: Option<Specificity>,
    #[serde(default)]
    pub patches: Vec<DeclaredPatch>,
}

impl ManifestDocument {
    /// Parse a manifest. `origin` only labels errors.
    pub fn from_toml(content: &str, origin: &str) -> Result<Self, SourceError> {
        toml::from_str(content).map_err(|e| SourceError::InvalidManifest {
            origin: origin.to_string(),
            reason: e.message().to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Build the payload for this manifest's gadgets.
    ///
    /// The module carries the declared patches; every gadget gets a
    /// [`LoggingBehavior`].
    pub fn to_payload(&self, module_key: impl Into<String>) -> Payload {
        let mut patches = DeclaredPatches::new();
        let gadgets = self
            .gadgets
            .iter()
            .map(|gadget| {
                patches.insert(gadget.name.clone(), gadget.patches.clone());
                let id = GadgetId::new(&self.bundle.name, &gadget.name);
                let factory: GadgetFactory = Arc::new(move || {
                    Box::new(LoggingBehavior::new(id.clone())) as Box<dyn GadgetBehavior>
                });
                GadgetDeclaration {
                    name: gadget.name.clone(),
                    dependencies: gadget.dependencies.clone(),
                    target_engine: gadget.target_engine.clone(),
                    target_specificity: gadget.target_specificity,
                    factory,
                }
            })
            .collect();

        Payload {
            module: PayloadModule::new(module_key, patches),
            gadgets,
        }
    }
}

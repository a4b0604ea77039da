//! Engine configuration and configuration stores.
//!
//! [`EngineConfig`] tunes the engine itself and is read from an optional
//! `modkit.toml`. The two [`ConfigStore`] implementations hold per-gadget
//! configuration and the persisted enabled flags: [`TomlConfigStore`] on
//! disk, [`MemoryConfigStore`] in memory.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use modkit_graph::{Specificity, Version};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::GadgetId;
use crate::services::{ConfigError, ConfigStore, GadgetConfig};

/// File name of the persisted enabled flags inside a config root.
pub const ENABLED_FLAGS_FILE: &str = "enabled.toml";

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Version gadgets' engine-compatibility requirements are checked against.
    pub engine_version: Version,
    /// Specificity used when a dependency names a version but no specificity.
    pub default_specificity: Specificity,
    /// Load payload symbols on background tasks before each pass.
    pub preload_symbols: bool,
    /// Write enabled flags to the config store at the end of each pass.
    pub persist_flags: bool,
    /// Re-queue gadgets that failed admission once their targets exist.
    pub retry_dormant: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_version: Version::new([1, 0, 0, 0]),
            default_specificity: Specificity::Minor,
            preload_symbols: false,
            persist_flags: true,
            retry_dormant: true,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration document. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FlagsDocument {
    #[serde(default)]
    enabled: BTreeMap<String, bool>,
}

/// Directory-backed configuration store.
///
/// Layout under the root:
///
/// ```text
/// <root>/enabled.toml            [enabled] "bundle" = true, "bundle:gadget" = false
/// <root>/<bundle>/<gadget>.toml  per-gadget configuration
/// ```
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    root: PathBuf,
}

impl TomlConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self, gadget: &GadgetId) -> PathBuf {
        self.root
            .join(&gadget.bundle)
            .join(format!("{}.toml", gadget.gadget))
    }

    pub fn flags_path(&self) -> PathBuf {
        self.root.join(ENABLED_FLAGS_FILE)
    }

    fn read_locked(path: &Path) -> std::result::Result<Option<String>, ConfigError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;

        // Read through the locked handle
        let mut content = String::new();
        (&file).read_to_string(&mut content)?;
        Ok(Some(content))
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self, gadget: &GadgetId) -> std::result::Result<GadgetConfig, ConfigError> {
        let Some(content) = Self::read_locked(&self.config_path(gadget))? else {
            return Ok(GadgetConfig::new());
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            key: gadget.to_string(),
            source,
        })
    }

    fn enabled_flags(&self) -> std::result::Result<BTreeMap<String, bool>, ConfigError> {
        let Some(content) = Self::read_locked(&self.flags_path())? else {
            return Ok(BTreeMap::new());
        };
        let document: FlagsDocument =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                key: ENABLED_FLAGS_FILE.to_string(),
                source,
            })?;
        Ok(document.enabled)
    }

    fn persist_enabled_flags(
        &mut self,
        flags: &BTreeMap<String, bool>,
    ) -> std::result::Result<(), ConfigError> {
        fs::create_dir_all(&self.root)?;
        let path = self.flags_path();
        let content = toml::to_string_pretty(&FlagsDocument {
            enabled: flags.clone(),
        })?;

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_file.lock_exclusive()?;

        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &path)?;

        tracing::debug!(path = %path.display(), count = flags.len(), "Persisted enabled flags");
        Ok(())
    }
}

/// In-memory configuration store.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    configs: BTreeMap<GadgetId, std::result::Result<GadgetConfig, String>>,
    flags: BTreeMap<String, bool>,
    persist_count: usize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store configuration for `gadget`.
    pub fn with_config(mut self, gadget: GadgetId, config: GadgetConfig) -> Self {
        self.configs.insert(gadget, Ok(config));
        self
    }

    /// Make loading `gadget`'s configuration fail with `reason`.
    pub fn with_invalid(mut self, gadget: GadgetId, reason: impl Into<String>) -> Self {
        self.configs.insert(gadget, Err(reason.into()));
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, enabled: bool) -> Self {
        self.flags.insert(key.into(), enabled);
        self
    }

    /// Number of times flags were persisted.
    pub fn persist_count(&self) -> usize {
        self.persist_count
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, gadget: &GadgetId) -> std::result::Result<GadgetConfig, ConfigError> {
        match self.configs.get(gadget) {
            None => Ok(GadgetConfig::new()),
            Some(Ok(config)) => Ok(config.clone()),
            Some(Err(reason)) => Err(ConfigError::Invalid {
                key: gadget.to_string(),
                reason: reason.clone(),
            }),
        }
    }

    fn enabled_flags(&self) -> std::result::Result<BTreeMap<String, bool>, ConfigError> {
        Ok(self.flags.clone())
    }

    fn persist_enabled_flags(
        &mut self,
        flags: &BTreeMap<String, bool>,
    ) -> std::result::Result<(), ConfigError> {
        self.flags = flags.clone();
        self.persist_count += 1;
        Ok(())
    }
}

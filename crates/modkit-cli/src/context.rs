//! Engine construction shared by every command.

use std::path::{Path, PathBuf};

use modkit_core::{DirectorySource, EngineConfig, LoadOrderEngine, TomlConfigStore};

use crate::error::{CliError, Result};

/// State directory used when `--state-dir` is not given.
pub const DEFAULT_STATE_DIR: &str = ".modkit";

/// Global options that shape the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub config: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
}

impl EngineOptions {
    pub fn state_dir_for(&self, bundles: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| bundles.join(DEFAULT_STATE_DIR))
    }
}

/// Build an engine over the bundles under `bundles`.
pub fn open_engine(bundles: &Path, options: &EngineOptions) -> Result<LoadOrderEngine> {
    if !bundles.is_dir() {
        return Err(CliError::user(format!(
            "Bundle directory not found: {}",
            bundles.display()
        )));
    }

    let config = match &options.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let state_dir = options.state_dir_for(bundles);
    tracing::debug!(
        bundles = %bundles.display(),
        state = %state_dir.display(),
        engine = %config.engine_version,
        "Opening engine"
    );

    let engine = LoadOrderEngine::builder(DirectorySource::new(bundles))
        .config(config)
        .config_store(TomlConfigStore::new(state_dir))
        .build()?;
    Ok(engine)
}

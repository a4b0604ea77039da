//! Shared test utilities for the modkit workspace.
//!
//! This crate provides in-memory collaborators and bundle fixtures so that
//! engine scenarios can be written without touching the filesystem. It is
//! a dev-dependency only and never published.
//!
//! # Modules
//!
//! - [`fixture`]: [`BundleFixture`] / [`GadgetFixture`] builders
//! - [`source`]: [`MemorySource`], a shared in-memory bundle source
//! - [`events`]: [`EventLog`] and the [`RecordingBehavior`] writing to it
//! - [`interception`]: [`FlakyInterception`] for injecting patch failures
//! - [`dir`]: on-disk bundle directories for the TOML-backed collaborators

pub mod dir;
pub mod events;
pub mod fixture;
pub mod interception;
pub mod source;

pub use dir::BundleDir;
pub use events::{EventLog, Hook, RecordingBehavior};
pub use fixture::{BundleFixture, GadgetFixture};
pub use interception::FlakyInterception;
pub use source::MemorySource;

use modkit_core::{EngineConfig, LoadOrderEngine, MemoryConfigStore};

/// Engine over `source` with in-memory collaborators and default config.
pub fn test_engine(source: &MemorySource) -> LoadOrderEngine {
    test_engine_with(source, EngineConfig::default())
}

/// Engine over `source` with in-memory collaborators and `config`.
pub fn test_engine_with(source: &MemorySource, config: EngineConfig) -> LoadOrderEngine {
    LoadOrderEngine::builder(source.clone())
        .config(config)
        .config_store(MemoryConfigStore::new())
        .build()
        .expect("in-memory config store never fails")
}

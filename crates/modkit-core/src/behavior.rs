//! Gadget behavior hooks and the registration handle passed to them.

use std::sync::Arc;

use crate::model::GadgetId;
use crate::services::{ExtensionRegistry, GadgetConfig, RegistryEntry, RegistryError};

/// Error returned by a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GadgetError {
    message: String,
}

impl GadgetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<RegistryError> for GadgetError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.to_string())
    }
}

pub type GadgetResult = std::result::Result<(), GadgetError>;

/// Creates fresh behavior instances; called again on refresh.
pub type GadgetFactory = Arc<dyn Fn() -> Box<dyn GadgetBehavior> + Send + Sync>;

/// Lifecycle hooks a gadget implements.
///
/// Every hook defaults to doing nothing. Hooks run in pipeline order
/// (`load_config`, `pre_patch`, `register`, `initialize`); an error from
/// any of them disables the gadget and everything depending on it.
pub trait GadgetBehavior {
    fn load_config(&mut self, _config: &GadgetConfig) -> GadgetResult {
        Ok(())
    }

    fn pre_patch(&mut self) -> GadgetResult {
        Ok(())
    }

    fn register(&mut self, _registrar: &mut Registrar<'_>) -> GadgetResult {
        Ok(())
    }

    fn initialize(&mut self) -> GadgetResult {
        Ok(())
    }

    /// Undo `initialize`. Called during teardown of an initialized gadget.
    fn uninitialize(&mut self) {}
}

/// Handle through which a gadget contributes registry entries.
///
/// Every entry is stamped with the owning gadget so the engine can
/// remove them all on failure or unload.
pub struct Registrar<'a> {
    owner: &'a GadgetId,
    registry: &'a mut dyn ExtensionRegistry,
    registered: usize,
}

impl<'a> Registrar<'a> {
    pub fn new(owner: &'a GadgetId, registry: &'a mut dyn ExtensionRegistry) -> Self {
        Self {
            owner,
            registry,
            registered: 0,
        }
    }

    pub fn owner(&self) -> &GadgetId {
        self.owner
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<(), RegistryError> {
        self.registry.register(RegistryEntry {
            owner: self.owner.clone(),
            kind: kind.into(),
            key: key.into(),
        })?;
        self.registered += 1;
        Ok(())
    }

    /// Entries successfully registered through this handle.
    pub fn registered(&self) -> usize {
        self.registered
    }
}

//! Error types for modkit-core

use crate::services::{ConfigError, SourceError};

/// Result type for modkit-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort an engine operation.
///
/// Per-gadget problems (failed admission, a stage hook returning an error,
/// a skipped patch point) never surface here; they are recorded in the
/// [`PassReport`](crate::report::PassReport) of the pass that hit them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A bundle's manifest or payload is malformed; only that bundle is skipped
    #[error("Structural error in bundle at {origin}: {reason}")]
    Structural { origin: String, reason: String },

    /// A bundle with the same name or origin is already loaded
    #[error("Bundle '{name}' is already loaded (origin {origin})")]
    DuplicateBundle { name: String, origin: String },

    /// No loaded bundle has this name
    #[error("Unknown bundle: {0}")]
    UnknownBundle(String),

    /// No loaded gadget has this identity
    #[error("Unknown gadget: {0}")]
    UnknownGadget(String),

    // Transparent wrappers for underlying errors
    /// Graph error from modkit-graph, including dependency cycles
    #[error(transparent)]
    Graph(#[from] modkit_graph::Error),

    /// Bundle source failure outside a single bundle read
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Configuration store failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn structural(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Structural {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error reports a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Graph(modkit_graph::Error::Cycle { .. }))
    }

    /// Cycle participants, when this error reports a cycle.
    pub fn cycle_participants(&self) -> Option<&[String]> {
        match self {
            Self::Graph(modkit_graph::Error::Cycle { participants }) => Some(participants),
            _ => None,
        }
    }
}

use crate::tree::NodeId;

/// Errors produced by the graph primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A version string could not be parsed.
    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    /// A specificity level name was not recognised.
    #[error("invalid specificity '{0}' (expected major, minor, nonbreaking or bugfix)")]
    InvalidSpecificity(String),

    /// Topological ordering failed because edges remained after the ready
    /// set emptied.
    #[error("dependency cycle detected among: {}", participants.join(", "))]
    Cycle { participants: Vec<String> },

    /// The node handle does not refer to a live node.
    #[error("unknown tree node {0}")]
    UnknownNode(NodeId),

    /// A destructive operation was attempted on a read-only node.
    #[error("tree node {0} is read-only")]
    ReadOnly(NodeId),

    /// A node cannot be linked to itself.
    #[error("tree node {0} cannot be its own child")]
    SelfLink(NodeId),
}

pub type Result<T> = std::result::Result<T, Error>;

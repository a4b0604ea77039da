//! Graph primitives for the modkit load-order engine.
//!
//! This crate holds the leaf components the engine is built on:
//!
//! - [`version`]: four-component version numbers and specificity-bounded
//!   compatibility checks
//! - [`tree`]: a multi-parent dependency tree stored as an arena of nodes
//! - [`topo`]: Kahn's-algorithm topological sorting over explicit edges
//!
//! None of these types know about bundles or gadgets; `modkit-core` wraps
//! them with domain identities.

pub mod error;
pub mod topo;
pub mod tree;
pub mod version;

pub use error::{Error, Result};
pub use topo::TopologicalSorter;
pub use tree::{DependencyTree, NodeId};
pub use version::{Specificity, Version, VersionRequirement, compare, satisfies};

//! Command implementations for modkit-cli

pub mod conflicts;
pub mod order;
pub mod toggle;

pub use conflicts::run_conflicts;
pub use order::{run_check, run_order};
pub use toggle::run_toggle;

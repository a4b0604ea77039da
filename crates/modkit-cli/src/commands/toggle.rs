//! Enable and disable command implementations

use std::path::Path;

use colored::Colorize;
use modkit_core::{AdmissionFailure, FailureKind, GadgetId, LoadOrderEngine, Toggle};

use crate::context::{EngineOptions, open_engine};
use crate::error::{CliError, Result};

/// Parse `bundle` or `bundle:gadget`.
fn parse_target(target: &str) -> Result<Toggle> {
    if target.contains(':') {
        GadgetId::parse(target)
            .map(Toggle::Gadget)
            .ok_or_else(|| CliError::user(format!("Invalid gadget '{target}', expected bundle:gadget")))
    } else if target.is_empty() {
        Err(CliError::user("Target must not be empty"))
    } else {
        Ok(Toggle::Bundle(target.to_string()))
    }
}

/// Run the enable or disable command
pub fn run_toggle(bundles: &Path, options: &EngineOptions, target: &str, enabled: bool) -> Result<()> {
    let toggle = parse_target(target)?;
    let mut engine = open_engine(bundles, options)?;
    engine.load_all()?;
    engine.set_enabled(&toggle, enabled)?;

    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{} {}", verb.green().bold(), toggle);

    if !enabled {
        for gadget in disabled_with_dependency(&engine) {
            println!("  {} {} (dependency disabled)", "-".yellow(), gadget);
        }
    }
    Ok(())
}

/// Gadgets that want to run but are down because a dependency is inactive.
fn disabled_with_dependency(engine: &LoadOrderEngine) -> Vec<GadgetId> {
    let mut gadgets: Vec<GadgetId> = engine
        .registry()
        .gadgets()
        .into_iter()
        .filter(|g| g.is_enabled() && !engine.is_active(g.id()))
        .filter(|g| {
            g.last_failure().is_some_and(|f| {
                matches!(
                    f.kind,
                    FailureKind::Admission(AdmissionFailure::DependencyInactive { .. })
                )
            })
        })
        .map(|g| g.id().clone())
        .collect();
    gadgets.sort();
    gadgets
}

//! Order and check command implementations

use std::path::Path;

use colored::Colorize;
use modkit_core::{GadgetState, LoadOrderEngine, PassReport};
use serde::Serialize;

use crate::context::{EngineOptions, open_engine};
use crate::error::{CliError, Result};

#[derive(Debug, Serialize)]
struct OrderEntry {
    gadget: String,
    bundle_version: String,
    state: GadgetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn entries(engine: &LoadOrderEngine) -> Vec<OrderEntry> {
    engine
        .load_order()
        .into_iter()
        .filter_map(|id| {
            let gadget = engine.gadget(&id)?;
            let bundle = engine.bundle(gadget.bundle())?;
            Some(OrderEntry {
                gadget: id.to_string(),
                bundle_version: bundle.version().to_string(),
                state: gadget.state(),
                reason: gadget.last_failure().map(|f| f.kind.to_string()),
            })
        })
        .collect()
}

fn load(bundles: &Path, options: &EngineOptions) -> Result<(LoadOrderEngine, PassReport)> {
    let mut engine = open_engine(bundles, options)?;
    let report = engine.load_all()?.clone();
    Ok((engine, report))
}

fn print_warnings(report: &PassReport) {
    for warning in &report.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
}

/// Run the order command
pub fn run_order(bundles: &Path, options: &EngineOptions, json: bool) -> Result<()> {
    let (engine, report) = load(bundles, options)?;
    let entries = entries(&engine);

    if json {
        let output = serde_json::json!({
            "order": entries,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", "Load Order".bold());
    println!();
    if entries.is_empty() {
        println!("  {}", "No gadgets found".dimmed());
    }
    for (i, entry) in entries.iter().enumerate() {
        let state = match entry.state {
            GadgetState::Initialized => entry.state.to_string().green(),
            GadgetState::Disabled => entry.state.to_string().red(),
            _ => entry.state.to_string().yellow(),
        };
        print!("  {:>3}. {} {} [{}]", i + 1, entry.gadget.cyan(), entry.bundle_version.dimmed(), state);
        match &entry.reason {
            Some(reason) => println!(" {}", reason),
            None => println!(),
        }
    }
    if !report.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".bold());
        print_warnings(&report);
    }
    Ok(())
}

/// Run the check command
///
/// Fails when any gadget could not be activated or any bundle was skipped.
pub fn run_check(bundles: &Path, options: &EngineOptions, json: bool) -> Result<()> {
    let (engine, report) = load(bundles, options)?;
    let failed = report.failures.len() + report.warnings.len();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} {} active, {} failed, {} conflicts",
            "Checked".bold(),
            engine.registry().active().len(),
            report.failures.len(),
            report.conflicts.pair_count()
        );
        for failure in &report.failures {
            println!("  {} {}", "x".red(), failure);
        }
        print_warnings(&report);
        if failed == 0 {
            println!("{}", "All gadgets activated".green());
        }
    }

    if failed > 0 {
        return Err(CliError::user(format!(
            "{} problem(s) found while loading bundles",
            failed
        )));
    }
    Ok(())
}

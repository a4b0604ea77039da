//! Conflicts command implementation

use std::path::Path;

use colored::Colorize;

use crate::context::{EngineOptions, open_engine};
use crate::error::Result;

/// Run the conflicts command
pub fn run_conflicts(bundles: &Path, options: &EngineOptions, json: bool) -> Result<()> {
    let mut engine = open_engine(bundles, options)?;
    engine.load_all()?;
    let conflicts = engine.list_conflicts();

    if json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("{}", "No conflicts".green());
        return Ok(());
    }

    println!("{}", "Override Conflicts".bold());
    for point in &conflicts.points {
        println!();
        println!("  {}", point.point.cyan());
        for pair in &point.pairs {
            println!(
                "    {} short-circuits past {}",
                pair.overriding.to_string().yellow(),
                pair.other
            );
        }
    }
    println!();
    println!(
        "Declare {} or {} on one side, or give them different priorities.",
        "overrides".cyan(),
        "before/after".cyan()
    );
    Ok(())
}

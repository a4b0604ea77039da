//! modkit CLI
//!
//! Loads a directory of declarative bundles through the load-order engine
//! and reports activation order, failures and override conflicts.

mod cli;
mod commands;
mod context;
mod error;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use context::EngineOptions;
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Engine warnings go to stderr only when asked for
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
    tracing::debug!("Verbose mode enabled");

    let options = EngineOptions {
        config: cli.config,
        state_dir: cli.state_dir,
    };

    match cli.command {
        Some(cmd) => execute_command(cmd, &options),
        None => {
            println!("{} load-order engine", "modkit".green().bold());
            println!();
            println!("Run {} for available commands.", "modkit --help".cyan());
            Ok(())
        }
    }
}

fn execute_command(cmd: Commands, options: &EngineOptions) -> Result<()> {
    match cmd {
        Commands::Order { bundles, json } => commands::run_order(&bundles, options, json),
        Commands::Check { bundles, json } => commands::run_check(&bundles, options, json),
        Commands::Conflicts { bundles, json } => commands::run_conflicts(&bundles, options, json),
        Commands::Enable { bundles, target } => commands::run_toggle(&bundles, options, &target, true),
        Commands::Disable { bundles, target } => {
            commands::run_toggle(&bundles, options, &target, false)
        }
    }
}

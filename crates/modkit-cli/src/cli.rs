//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// modkit - Resolve, order and activate bundles of gadgets
#[derive(Parser, Debug)]
#[command(name = "modkit")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for gadget config and enabled flags
    ///
    /// Defaults to `<BUNDLES>/.modkit`.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Load every bundle and print the activation order
    Order {
        /// Directory whose subdirectories each hold a bundle.toml
        bundles: PathBuf,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Load every bundle and fail if any gadget could not be activated
    Check {
        /// Directory whose subdirectories each hold a bundle.toml
        bundles: PathBuf,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// List unresolved override conflicts after loading every bundle
    Conflicts {
        /// Directory whose subdirectories each hold a bundle.toml
        bundles: PathBuf,

        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Enable a bundle or gadget (`bundle` or `bundle:gadget`)
    Enable {
        /// Directory whose subdirectories each hold a bundle.toml
        bundles: PathBuf,

        /// Bundle name or qualified gadget
        target: String,
    },

    /// Disable a bundle or gadget (`bundle` or `bundle:gadget`)
    ///
    /// Everything depending on the target is disabled with it until the
    /// target is enabled again.
    Disable {
        /// Directory whose subdirectories each hold a bundle.toml
        bundles: PathBuf,

        /// Bundle name or qualified gadget
        target: String,
    },
}

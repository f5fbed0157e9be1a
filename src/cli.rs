use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Print debug logs
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: IsotoolCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum IsotoolCommand {
    /// List all tools found in the wheel and bundle directories
    List {
        /// Only show tools that have an environment
        #[clap(long)]
        installed: bool,
    },
    /// Show metadata, dependencies and environment status of a tool
    Info {
        name: String,
    },
    /// Create the tool's environment and install its wheel into it
    Install {
        name: String,
        /// Rebuild the environment even if it exists
        #[clap(long)]
        force: bool,
    },
    /// Run a tool inside its environment. Missing dependencies are installed first
    Run {
        name: String,
        #[clap(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Remove the tool's environment
    Uninstall {
        name: String,
    },
    /// Compare declared dependencies with the tool's environment
    Check {
        name: String,
        /// Print the report as JSON
        #[clap(long)]
        json: bool,
    },
    /// Report packages that the given tools constrain differently
    Conflicts {
        #[clap(required = true)]
        names: Vec<String>,
        #[clap(long)]
        json: bool,
    },
    /// List tool environments
    Envs,
    /// List bundles
    Bundles,
    /// List the tools in a bundle
    BundleInfo {
        name: String,
    },
    /// Copy every wheel in a directory into a bundle named after it
    InstallBundle {
        path: PathBuf,
    },
    /// Delete a bundle
    RemoveBundle {
        name: String,
    },
    /// Check the base interpreter and every tool configuration
    Doctor,
    /// Remove all environments and clear caches
    Clean,
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::orchestrator::signal::RebootMode;

#[derive(Debug, Parser)]
#[command(
    name = "devcycle",
    version,
    about = "Run a set of local services with one-key full and fast reboots"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Start in fast mode: keep build caches, skip provisioning and schema steps
    #[arg(short = 'q', long = "fast", visible_alias = "quick")]
    pub fast: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Mode of the first cycle.
    pub fn first_mode(&self) -> RebootMode {
        if self.fast {
            RebootMode::Fast
        } else {
            RebootMode::Full
        }
    }
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check the config file and report problems
    Validate,
    /// Run the configured toolchain checks and show versions
    Doctor,
    /// Write a starter devcycle.toml in the current directory
    Init,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

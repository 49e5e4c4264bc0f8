// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kahua")]
#[command(about = "Acquire and track cluster nodes on hosts and batch schedulers")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print only final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding kahua.yml (default: current directory)
    #[arg(short = 'C', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new kahua.yml configuration file
    Init {
        /// Infrastructure kind to scaffold (ssh, script, local, pbs, lsf, sge)
        #[arg(short, long, default_value = "ssh")]
        kind: String,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and build its node source
    Check,

    /// Show the persisted node state of the source
    Status,

    /// Acquire nodes from the configured source
    Acquire {
        /// Acquire until no capacity is left
        #[arg(long)]
        all: bool,

        /// Seconds to wait for attempts to finish before shutting down
        #[arg(long, value_name = "SECONDS")]
        wait: Option<u64>,
    },
}

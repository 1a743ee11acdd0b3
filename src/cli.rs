//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// levelwatch - level-triggered controller demo
#[derive(Parser, Debug)]
#[command(name = "levelwatch")]
#[command(version)]
#[command(about = "Mirror a watched collection and reconcile every changed key")]
#[command(
    long_about = "levelwatch runs a controller against an in-memory store: an informer keeps a local cache in sync, changed keys flow through a deduplicating rate-limited queue, and workers reconcile them with bounded retries."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until Ctrl+C or SIGTERM
    Run {
        /// Controller configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON array of objects to load into the store before starting
        #[arg(short, long)]
        seed: Option<PathBuf>,

        /// Number of worker tasks (overrides the config file)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        /// Configuration file to check
        path: PathBuf,
    },
}

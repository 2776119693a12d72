//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run several devices against simulated lossy transports
    Simulate {
        /// Number of devices
        #[arg(short, long)]
        devices: Option<usize>,
        /// Entries published per device
        #[arg(short, long)]
        messages: Option<usize>,
        /// Routing strategy (best_available, dual_path, online_only, mesh_only)
        #[arg(short, long)]
        strategy: Option<String>,
        /// Loss rate applied to all three paths, 0.0 to 1.0
        #[arg(long)]
        loss: Option<f64>,
        /// Take the internet down for the middle third of the run
        #[arg(long)]
        outage: bool,
        /// Seed for the loss model
        #[arg(long)]
        seed: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Print an annotated example instead
        #[arg(long)]
        example: bool,
    },
}

//! Cord CLI - main entry point

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cord_cli::{
    cli::{Cli, Commands},
    config::{AppConfig, Overrides},
    simulate::Simulation,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Commands::Simulate {
            devices,
            messages,
            strategy,
            loss,
            outage,
            seed,
            ..
        } => Overrides {
            verbose: cli.verbose,
            devices: *devices,
            messages: *messages,
            strategy: strategy.clone(),
            loss: *loss,
            outage: *outage,
            seed: *seed,
        },
        Commands::Config { .. } => Overrides {
            verbose: cli.verbose,
            ..Overrides::default()
        },
    };

    // Defaults < config file < CORD_ environment < command line
    let config = AppConfig::load_with_overrides(cli.config.as_deref(), &overrides)
        .context("failed to load configuration")?;

    // Initialize logging
    setup_logging(config.cli.verbose);

    match cli.command {
        Commands::Simulate { json, .. } => {
            let simulation = Simulation::new(config.cord(), config.simulation.clone())?;
            info!(seed = simulation.seed(), "simulation ready");
            let report = simulation.run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
        }
        Commands::Config { example } => {
            if example {
                println!("{}", AppConfig::example_config());
            } else {
                println!("{}", config.to_toml_string()?);
            }
        }
    }

    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

//! Cord CLI library
//!
//! Configuration loading, command definitions and the multi-device
//! simulation behind the `cord` binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod simulate;

pub use cli::{Cli, Commands};
pub use config::{AppConfig, ConfigError, Overrides};
pub use error::{CliError, Result};
pub use simulate::{Simulation, SimulationConfig, SimulationReport};

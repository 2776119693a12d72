//! Cord CLI configuration
//!
//! Layered with figment. Priority, highest first:
//! 1. Command line arguments
//! 2. Environment variables prefixed `CORD_`, nested with `__`
//!    (`CORD_ROUTER__STRATEGY=mesh_only`, `CORD_SIMULATION__DEVICES=6`)
//! 3. Configuration file (`cord.toml` unless `--config` is given)
//! 4. Default values

use std::path::Path;
use std::str::FromStr;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use cord_core::{CordConfig, DeliveryCacheConfig, LedgerConfig, RouterConfig, RoutingStrategy};

use crate::simulate::SimulationConfig;

/// File looked up when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "cord.toml";

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "CORD_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the cord CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cli: CliConfig,
    pub ledger: LedgerConfig,
    pub router: RouterConfig,
    pub cache: DeliveryCacheConfig,
    pub simulation: SimulationConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,
}

/// Values given on the command line, layered over everything else
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub verbose: bool,
    pub devices: Option<usize>,
    pub messages: Option<usize>,
    pub strategy: Option<String>,
    pub loss: Option<f64>,
    pub outage: bool,
    pub seed: Option<u64>,
}

impl AppConfig {
    /// Load defaults, the config file, `CORD_` environment variables and
    /// finally `overrides`. An explicit `path` must exist; the default
    /// `cord.toml` is optional.
    pub fn load_with_overrides(path: Option<&str>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) if !Path::new(path).exists() => {
                return Err(ConfigError::FileSystem(format!(
                    "Config file not found: {}",
                    path
                )));
            }
            Some(path) => path,
            None => DEFAULT_CONFIG_FILE,
        };

        let figment = Self::base()
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let figment = apply_overrides(figment, overrides)?;
        Self::extract(figment)
            .map_err(|e| e.in_context(&format!("Failed to load {}", file)))
    }

    /// Load configuration from a specific file path, without environment
    /// variables or overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileSystem(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::extract(Self::base().merge(Toml::file(path)))
            .map_err(|e| e.in_context(&format!("Failed to load {}", path.display())))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::extract(Self::base().merge(Toml::string(contents)))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Ledger, router and cache settings shared by every simulated device
    pub fn cord(&self) -> CordConfig {
        CordConfig {
            ledger: self.ledger.clone(),
            router: self.router.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cord()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        let sim = &self.simulation;
        if sim.devices == 0 {
            return Err(ConfigError::Validation(
                "Simulation needs at least one device".to_string(),
            ));
        }
        for (name, rate) in [
            ("primary_loss", sim.primary_loss),
            ("bridge_loss", sim.bridge_loss),
            ("mesh_loss", sim.mesh_loss),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Validation(format!(
                    "{} must be between 0.0 and 1.0, got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        let cord = CordConfig::builder()
            .ledger_id("site-42")
            .domain_id("north-tower")
            .strategy(RoutingStrategy::BestAvailable)
            .build_unchecked();
        let example = AppConfig {
            ledger: cord.ledger,
            router: cord.router,
            cache: cord.cache,
            simulation: SimulationConfig {
                internet_outage: true,
                seed: Some(7),
                ..SimulationConfig::default()
            },
            ..AppConfig::default()
        };

        match example.to_toml_string() {
            Ok(body) => format!("# cord.toml\n\n{}", body),
            Err(_) => "# Failed to generate example config".to_string(),
        }
    }
}

fn apply_overrides(mut figment: Figment, overrides: &Overrides) -> Result<Figment, ConfigError> {
    if overrides.verbose {
        figment = figment.merge(("cli.verbose", true));
    }
    if let Some(devices) = overrides.devices {
        figment = figment.merge(("simulation.devices", devices));
    }
    if let Some(messages) = overrides.messages {
        figment = figment.merge(("simulation.messages_per_device", messages));
    }
    if let Some(strategy) = &overrides.strategy {
        let strategy = RoutingStrategy::from_str(strategy)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        figment = figment.merge(("router.strategy", strategy));
    }
    if let Some(loss) = overrides.loss {
        for key in [
            "simulation.primary_loss",
            "simulation.bridge_loss",
            "simulation.mesh_loss",
        ] {
            figment = figment.merge((key, loss));
        }
    }
    if overrides.outage {
        figment = figment.merge(("simulation.internet_outage", true));
    }
    if let Some(seed) = overrides.seed {
        figment = figment.merge(("simulation.seed", seed));
    }
    Ok(figment)
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConfigError {
    fn in_context(self, context: &str) -> Self {
        match self {
            ConfigError::Loading(reason) => ConfigError::Loading(format!("{}: {}", context, reason)),
            other => other,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.cli.verbose);
        assert_eq!(config.router.strategy, RoutingStrategy::BestAvailable);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [router]
            strategy = "DUAL_PATH"

            [simulation]
            devices = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.router.strategy, RoutingStrategy::DualPath);
        assert_eq!(config.simulation.devices, 6);
        assert_eq!(
            config.simulation.messages_per_device,
            SimulationConfig::default().messages_per_device
        );
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_toml_str("[simulation]\ndevices = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[simulation]\nmesh_loss = 1.5\n").is_err());
        assert!(AppConfig::from_toml_str("[router]\nstrategy = \"CARRIER_PIGEON\"\n").is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [router]
                strategy = "DUAL_PATH"

                [simulation]
                devices = 6
                "#,
            )?;
            jail.set_env("CORD_ROUTER__STRATEGY", "mesh_only");
            jail.set_env("CORD_SIMULATION__MESH_LOSS", "0.3");

            let config = AppConfig::load_with_overrides(None, &Overrides::default()).unwrap();
            assert_eq!(config.router.strategy, RoutingStrategy::MeshOnly);
            assert_eq!(config.simulation.devices, 6);
            assert_eq!(config.simulation.mesh_loss, 0.3);
            Ok(())
        });
    }

    #[test]
    fn test_overrides_win() {
        Jail::expect_with(|jail| {
            jail.set_env("CORD_SIMULATION__DEVICES", "9");
            jail.set_env("CORD_ROUTER__STRATEGY", "dual_path");

            let config = AppConfig::load_with_overrides(
                None,
                &Overrides {
                    verbose: true,
                    devices: Some(2),
                    strategy: Some("mesh-only".to_string()),
                    loss: Some(0.25),
                    seed: Some(99),
                    ..Overrides::default()
                },
            )
            .unwrap();

            assert!(config.cli.verbose);
            assert_eq!(config.simulation.devices, 2);
            assert_eq!(config.router.strategy, RoutingStrategy::MeshOnly);
            assert_eq!(config.simulation.bridge_loss, 0.25);
            assert_eq!(config.simulation.seed, Some(99));

            let bad = AppConfig::load_with_overrides(
                None,
                &Overrides {
                    strategy: Some("sideways".to_string()),
                    ..Overrides::default()
                },
            );
            assert!(matches!(bad, Err(ConfigError::Validation(_))));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        Jail::expect_with(|_| {
            let result = AppConfig::load_with_overrides(Some("missing.toml"), &Overrides::default());
            assert!(matches!(result, Err(ConfigError::FileSystem(_))));
            Ok(())
        });
    }

    #[test]
    fn test_example_config_parses_back() {
        let example = AppConfig::example_config();
        assert!(example.contains("[simulation]"));
        assert!(example.contains("[router]"));

        let parsed = AppConfig::from_toml_str(&example).unwrap();
        assert_eq!(parsed.ledger.ledger_id, "site-42");
        assert!(parsed.simulation.internet_outage);
    }
}

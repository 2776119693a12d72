//! Centralized Configuration Management
//!
//! All tunables for the ledger, the router and the delivery cache live
//! here, grouped under [`CordConfig`].

use serde::{Deserialize, Serialize};

use crate::errors::{CordError, Result};
use crate::reliability::{DEFAULT_WINDOW_CAPACITY, NEUTRAL_SCORE};
use crate::transport::RoutingStrategy;

// ----------------------------------------------------------------------------
// Ledger Configuration
// ----------------------------------------------------------------------------

/// Configuration for the ledger and the entries it commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Identifier of the global log
    pub ledger_id: String,
    /// Permission domain (hub) entries are committed under
    pub domain_id: String,
    /// Largest payload accepted by `append`
    pub max_payload_bytes: usize,
    /// Verify every freshly signed entry before persisting it
    pub self_check: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: "cord".to_string(),
            domain_id: "default".to_string(),
            max_payload_bytes: 64 * 1024, // 64KB per entry
            self_check: true,
        }
    }
}

impl LedgerConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            ledger_id: "test-ledger".to_string(),
            domain_id: "test-hub".to_string(),
            max_payload_bytes: 4096,
            self_check: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Router Configuration
// ----------------------------------------------------------------------------

/// Configuration for transport selection and reliability tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    /// Number of recent outcomes kept in the reliability window
    pub reliability_window: usize,
    /// Score reported for a path with no history
    pub neutral_score: f64,
    /// Upper bound on a single transport send
    pub send_timeout_ms: u64,
    /// Upgrade BEST_AVAILABLE to DUAL_PATH for high-value entry classes
    pub escalate_critical_classes: bool,
    /// Overall reliability below which delivery is reported as degraded
    pub degraded_threshold: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::BestAvailable,
            reliability_window: DEFAULT_WINDOW_CAPACITY,
            neutral_score: NEUTRAL_SCORE,
            send_timeout_ms: 5_000,
            escalate_critical_classes: true,
            degraded_threshold: 0.5,
        }
    }
}

impl RouterConfig {
    /// Create configuration optimized for testing (short timeouts)
    pub fn testing() -> Self {
        Self {
            send_timeout_ms: 200,
            ..Self::default()
        }
    }

    /// Radio-first deployments with no reliable uplink
    pub fn mesh_first() -> Self {
        Self {
            strategy: RoutingStrategy::MeshOnly,
            reliability_window: 50,
            escalate_critical_classes: false,
            send_timeout_ms: 10_000,
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Delivery Cache Configuration
// ----------------------------------------------------------------------------

/// Configuration for the transport-level dedup cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryCacheConfig {
    /// Transport message ids remembered before the oldest is forgotten
    pub max_seen_ids: usize,
}

impl Default for DeliveryCacheConfig {
    fn default() -> Self {
        Self {
            max_seen_ids: 10_000,
        }
    }
}

impl DeliveryCacheConfig {
    pub fn testing() -> Self {
        Self { max_seen_ids: 256 }
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for a cord node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CordConfig {
    pub ledger: LedgerConfig,
    pub router: RouterConfig,
    pub cache: DeliveryCacheConfig,
}

impl CordConfig {
    /// Create a new configuration builder
    pub fn builder() -> CordConfigBuilder {
        CordConfigBuilder::new()
    }

    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            ledger: LedgerConfig::testing(),
            router: RouterConfig::testing(),
            cache: DeliveryCacheConfig::testing(),
        }
    }

    /// Create configuration for radio-first deployments
    pub fn mesh_first() -> Self {
        Self {
            router: RouterConfig::mesh_first(),
            ..Self::default()
        }
    }

    pub fn with_ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    pub fn with_cache(mut self, cache: DeliveryCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<()> {
        if self.ledger.ledger_id.is_empty() {
            return Err(CordError::config_error("ledger_id cannot be empty"));
        }
        if self.ledger.domain_id.is_empty() {
            return Err(CordError::config_error("domain_id cannot be empty"));
        }
        if self.ledger.max_payload_bytes == 0 {
            return Err(CordError::config_error("max_payload_bytes cannot be zero"));
        }
        if self.router.reliability_window == 0 {
            return Err(CordError::config_error("reliability_window cannot be zero"));
        }
        if !(0.0..=1.0).contains(&self.router.neutral_score) {
            return Err(CordError::config_error(
                "neutral_score must be between 0.0 and 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.router.degraded_threshold) {
            return Err(CordError::config_error(
                "degraded_threshold must be between 0.0 and 1.0",
            ));
        }
        if self.router.send_timeout_ms == 0 {
            return Err(CordError::config_error("send_timeout_ms cannot be zero"));
        }
        if self.cache.max_seen_ids == 0 {
            return Err(CordError::config_error("max_seen_ids cannot be zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder Pattern
// ----------------------------------------------------------------------------

/// Builder for CordConfig that validates on `build`
#[derive(Debug, Clone, Default)]
pub struct CordConfigBuilder {
    ledger: Option<LedgerConfig>,
    router: Option<RouterConfig>,
    cache: Option<DeliveryCacheConfig>,
}

impl CordConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(mut self, ledger: LedgerConfig) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn router(mut self, router: RouterConfig) -> Self {
        self.router = Some(router);
        self
    }

    pub fn cache(mut self, cache: DeliveryCacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn ledger_id<S: Into<String>>(mut self, ledger_id: S) -> Self {
        self.ledger.get_or_insert_with(LedgerConfig::default).ledger_id = ledger_id.into();
        self
    }

    pub fn domain_id<S: Into<String>>(mut self, domain_id: S) -> Self {
        self.ledger.get_or_insert_with(LedgerConfig::default).domain_id = domain_id.into();
        self
    }

    pub fn strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.router.get_or_insert_with(RouterConfig::default).strategy = strategy;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CordConfig> {
        let config = self.build_unchecked();
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration without validation (use with caution)
    pub fn build_unchecked(self) -> CordConfig {
        CordConfig {
            ledger: self.ledger.unwrap_or_default(),
            router: self.router.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
        }
    }
}

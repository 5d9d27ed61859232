//! Pipeline configuration
//!
//! One TOML file wires the whole pipeline: risk policy, dedupe TTL, router
//! and reconciler tuning, coordinator limits and broker routes.

use execution::{ReconcilerConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use signal_validation::RiskPolicy;

use crate::coordinator::CoordinatorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Risk policy the validator evaluates signals against
    #[serde(default)]
    pub policy: RiskPolicy,

    /// Dedupe window for the signal cache (seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Capacity of the inbound signal queue
    #[serde(default = "default_queue_buffer")]
    pub queue_buffer: usize,

    /// Concurrent coordinator workers consuming the queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Broker routing per asset class
    #[serde(default = "default_broker_routes")]
    pub brokers: Vec<BrokerRouteConfig>,

    /// Postgres ledger; the in-memory ledger is used when unset
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            policy: RiskPolicy::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
            router: RouterConfig::default(),
            reconciler: ReconcilerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            queue_buffer: default_queue_buffer(),
            workers: default_workers(),
            brokers: default_broker_routes(),
            database_url: None,
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_queue_buffer() -> usize {
    256
}

fn default_workers() -> usize {
    4
}

fn default_broker_routes() -> Vec<BrokerRouteConfig> {
    vec![
        BrokerRouteConfig {
            asset_class: "crypto".to_string(),
            primary: "paper".to_string(),
            fallbacks: Vec::new(),
        },
        BrokerRouteConfig {
            asset_class: "equity".to_string(),
            primary: "paper".to_string(),
            fallbacks: Vec::new(),
        },
    ]
}

/// Primary and fallback connectors for one asset class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerRouteConfig {
    pub asset_class: String,
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    config.policy.validate()?;
    Ok(config)
}

/// Save configuration to TOML file
pub fn save_config(config: &PipelineConfig, path: &str) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.workers, 4);
        assert!(config.brokers.iter().any(|r| r.asset_class == "crypto"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = PipelineConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: PipelineConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config.cache_ttl_secs, deserialized.cache_ttl_secs);
        assert_eq!(config.router.max_attempts, deserialized.router.max_attempts);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            cache_ttl_secs = 60

            [router]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.router.max_attempts, 5);
        assert_eq!(config.router.initial_backoff_ms, 200);
        assert_eq!(config.coordinator.max_delivery_attempts, 3);
    }

    #[test]
    fn test_misconfigured_policy_fails_validation() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [policy]
            stop_loss_atr_multiplier = 0.0
            "#,
        )
        .unwrap();

        assert!(config.policy.validate().is_err());
    }
}

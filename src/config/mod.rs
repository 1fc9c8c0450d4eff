//! Configuration management for the oracle
//!
//! Loads from YAML/TOML files + environment variables via .env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::anchor::MIN_PAYLOAD_CEILING;
use crate::tick::TickConfig;
use crate::types::{AggregationConfig, CollectorConfig};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    pub anchor: AnchorConfig,
    pub persistence: PersistenceConfig,
    pub verifier: VerifierConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Deployment / chain identifier recorded in every bundle
    pub network: String,
    /// Assets aggregated each tick
    pub assets: Vec<String>,
    /// Quote currency of the index
    pub quote: String,
    /// Providers the collector queries
    pub providers: Vec<String>,
    /// Maximum relative distance from the median before a source is dropped
    pub outlier_threshold_ratio: f64,
    /// Retained sources required for an OK index
    pub min_valid_sources: usize,
    /// Tick interval in seconds
    pub interval_secs: u64,
    /// Maximum random delay added to each interval
    pub jitter_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorConfig {
    /// Submit payloads to the ledger
    pub enabled: bool,
    /// Hard ceiling on the encoded payload
    pub max_payload_bytes: usize,
    /// Submission timeout in milliseconds
    pub submit_timeout_ms: u64,
    /// Local JSON-lines ledger file
    pub ledger_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory for bundles and the latest pointer
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
    /// Ledger and store lookup timeout in milliseconds
    pub fetch_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::from_builder(
            Self::defaults()?
                // Load config file if exists
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                // Override with environment variables (ORACLE__*)
                .add_source(
                    Environment::with_prefix("ORACLE")
                        .prefix_separator("__")
                        .separator("__")
                        .list_separator(",")
                        .with_list_parse_key("oracle.assets")
                        .with_list_parse_key("oracle.providers")
                        .try_parsing(true),
                ),
        )
    }

    /// Built-in defaults only, no files or environment
    pub fn default_config() -> Result<Self> {
        Self::from_builder(Self::defaults()?)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(app_config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(Config::builder()
            // Oracle defaults
            .set_default("oracle.network", "testnet")?
            .set_default("oracle.assets", vec!["BTC"])?
            .set_default("oracle.quote", "USD")?
            .set_default("oracle.providers", vec!["coingecko", "coinmarketcap"])?
            .set_default("oracle.outlier_threshold_ratio", 0.01)?
            .set_default("oracle.min_valid_sources", 2)?
            .set_default("oracle.interval_secs", 60)?
            .set_default("oracle.jitter_secs", 5)?
            // Anchor defaults
            .set_default("anchor.enabled", true)?
            .set_default("anchor.max_payload_bytes", 80)?
            .set_default("anchor.submit_timeout_ms", 10_000)?
            .set_default("anchor.ledger_path", "./data/ledger.jsonl")?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            // Verifier defaults
            .set_default("verifier.fetch_timeout_ms", 10_000)?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?)
    }

    /// Cross-check values that are individually valid but jointly broken.
    ///
    /// Hard errors fail; conditions that merely make a status unreachable are
    /// returned as warnings.
    pub fn validate(&self) -> Result<Vec<String>> {
        let oracle = &self.oracle;
        if oracle.network.trim().is_empty() {
            bail!("oracle.network must not be empty");
        }
        if oracle.assets.is_empty() {
            bail!("oracle.assets must name at least one asset");
        }
        if !(oracle.outlier_threshold_ratio > 0.0 && oracle.outlier_threshold_ratio <= 1.0) {
            bail!(
                "oracle.outlier_threshold_ratio must be in (0, 1], got {}",
                oracle.outlier_threshold_ratio
            );
        }
        if oracle.min_valid_sources == 0 {
            bail!("oracle.min_valid_sources must be at least 1");
        }
        if oracle.interval_secs == 0 {
            bail!("oracle.interval_secs must be positive");
        }
        if oracle.jitter_secs >= oracle.interval_secs {
            bail!(
                "oracle.jitter_secs ({}) must be smaller than oracle.interval_secs ({})",
                oracle.jitter_secs,
                oracle.interval_secs
            );
        }
        if self.anchor.max_payload_bytes < MIN_PAYLOAD_CEILING {
            bail!(
                "anchor.max_payload_bytes ({}) cannot fit a payload, minimum is {}",
                self.anchor.max_payload_bytes,
                MIN_PAYLOAD_CEILING
            );
        }

        let mut warnings = Vec::new();
        if oracle.min_valid_sources > oracle.providers.len() {
            warnings.push(format!(
                "oracle.min_valid_sources ({}) exceeds the {} configured providers; OK status is unreachable",
                oracle.min_valid_sources,
                oracle.providers.len()
            ));
        }
        Ok(warnings)
    }

    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            quote: self.oracle.quote.clone(),
            outlier_threshold_ratio: self.oracle.outlier_threshold_ratio,
            min_valid_sources: self.oracle.min_valid_sources,
        }
    }

    pub fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            interval_secs: self.oracle.interval_secs,
            jitter_secs: self.oracle.jitter_secs,
        }
    }

    pub fn tick_config(&self) -> TickConfig {
        TickConfig {
            network: self.oracle.network.clone(),
            assets: self.oracle.assets.clone(),
            aggregation: self.aggregation(),
            collector: self.collector(),
            max_payload_bytes: self.anchor.max_payload_bytes,
            submit_timeout: Duration::from_millis(self.anchor.submit_timeout_ms),
        }
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "network={} assets={:?} providers={} threshold={:.4} min_sources={} interval={}s+{}s anchor={} data_dir={}",
            self.oracle.network,
            self.oracle.assets,
            self.oracle.providers.len(),
            self.oracle.outlier_threshold_ratio,
            self.oracle.min_valid_sources,
            self.oracle.interval_secs,
            self.oracle.jitter_secs,
            self.anchor.enabled,
            self.persistence.data_dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default_config().unwrap();
        assert_eq!(config.oracle.min_valid_sources, 2);
        assert_eq!(config.anchor.max_payload_bytes, 80);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn unreachable_quorum_is_a_warning() {
        let mut config = AppConfig::default_config().unwrap();
        config.oracle.min_valid_sources = 3;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unreachable"));
    }

    #[test]
    fn broken_values_are_errors() {
        let mut config = AppConfig::default_config().unwrap();
        config.oracle.outlier_threshold_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config().unwrap();
        config.oracle.min_valid_sources = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config().unwrap();
        config.oracle.jitter_secs = 60;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default_config().unwrap();
        config.anchor.max_payload_bytes = 32;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tick_config_carries_aggregation_settings() {
        let config = AppConfig::default_config().unwrap();
        let tick = config.tick_config();
        assert_eq!(tick.aggregation.quote, "USD");
        assert_eq!(tick.aggregation.outlier_threshold_ratio, 0.01);
        assert_eq!(tick.collector.interval_secs, 60);
        assert_eq!(tick.submit_timeout, Duration::from_secs(10));
    }
}

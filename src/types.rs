//! Core types used throughout the oracle
//!
//! Observations, index results, evidence bundles and the records the
//! bundle store keeps around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One provider's reading for one asset at one instant.
///
/// `ok == false` implies `price == None`; `ok == true` implies a finite
/// positive price. Use [`ProviderObservation::ok`] / [`ProviderObservation::failed`]
/// to build values that respect this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderObservation {
    pub provider: String,
    pub asset: String,
    pub price: Option<f64>,
    pub observed_at: DateTime<Utc>,
    pub ok: bool,
    pub error: Option<String>,
}

impl ProviderObservation {
    /// Successful reading. A non-finite or non-positive price is recorded
    /// as a failure instead.
    pub fn ok(
        provider: impl Into<String>,
        asset: impl Into<String>,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        if !price.is_finite() || price <= 0.0 {
            return Self::failed(
                provider,
                asset,
                format!("invalid price {}", price),
                observed_at,
            );
        }
        Self {
            provider: provider.into(),
            asset: asset.into(),
            price: Some(price),
            observed_at,
            ok: true,
            error: None,
        }
    }

    /// Failed reading with a reason
    pub fn failed(
        provider: impl Into<String>,
        asset: impl Into<String>,
        error: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider: provider.into(),
            asset: asset.into(),
            price: None,
            observed_at,
            ok: false,
            error: Some(error.into()),
        }
    }

    /// Price usable for aggregation, if the observation is consistent.
    pub fn valid_price(&self) -> Option<f64> {
        match (self.ok, self.price) {
            (true, Some(p)) if p.is_finite() && p > 0.0 => Some(p),
            _ => None,
        }
    }
}

/// Quorum classification of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexStatus {
    Ok,
    Degraded,
    Stale,
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexStatus::Ok => write!(f, "OK"),
            IndexStatus::Degraded => write!(f, "DEGRADED"),
            IndexStatus::Stale => write!(f, "STALE"),
        }
    }
}

/// Aggregated price for one asset at one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub asset: String,
    pub quote: String,
    pub price: f64,
    /// Providers retained after outlier rejection, in observation order
    pub sources_used: Vec<String>,
    pub source_count: usize,
    /// (max - min) / median over the retained prices
    pub dispersion: f64,
    pub observed_at: DateTime<Utc>,
    pub status: IndexStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Collector cadence, recorded in every bundle for audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub interval_secs: u64,
    pub jitter_secs: u64,
}

/// Parameters the aggregator ran with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub quote: String,
    pub outlier_threshold_ratio: f64,
    pub min_valid_sources: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            quote: "USD".to_string(),
            outlier_threshold_ratio: 0.01,
            min_valid_sources: 2,
        }
    }
}

/// Full reproducible record of one tick. Everything in here is hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub tick_id: String,
    pub network: String,
    pub collector_config: CollectorConfig,
    pub aggregation: AggregationConfig,
    pub observations: Vec<ProviderObservation>,
    pub index: IndexResult,
}

/// Retrieval metadata attached to a stored bundle. Never hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEnvelope {
    pub tx_id: Option<TxId>,
    pub stored_at: DateTime<Utc>,
}

/// What the bundle store persists per key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBundle {
    pub bundle: EvidenceBundle,
    /// Full hex SHA-256 of the canonical bundle
    pub hash: String,
    #[serde(rename = "_meta")]
    pub envelope: BundleEnvelope,
}

/// Singleton record naming the most recently persisted bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub hash_prefix: String,
    pub hash: String,
    pub tx_id: Option<TxId>,
    pub asset: String,
    pub tick_id: String,
    pub updated_at: DateTime<Utc>,
}

/// Ledger transaction identifier: 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxId(String);

impl TxId {
    pub const LEN: usize = 64;

    /// Parse and normalise a transaction id
    pub fn parse(raw: &str) -> Result<Self, InvalidTxId> {
        let trimmed = raw.trim();
        if trimmed.len() != Self::LEN {
            return Err(InvalidTxId(format!(
                "transaction id must be {} hex characters, got {}",
                Self::LEN,
                trimmed.len()
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(InvalidTxId(
                "transaction id contains non-hex characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TxId {
    type Error = InvalidTxId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TxId> for String {
    fn from(value: TxId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidTxId(String);

//! Tick pipeline
//!
//! One tick: aggregate each asset, build and hash its bundle, try to anchor
//! the compact payload, persist the bundle, then advance the latest pointer.
//! Anchoring is best effort. The pointer only moves after a successful write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::anchor::{encode_payload, Anchor};
use crate::evidence::{build_bundle, hash_bundle, hash_prefix, BundleMetadata};
use crate::oracle::aggregate;
use crate::store::BundleStore;
use crate::types::{
    AggregationConfig, BundleEnvelope, CollectorConfig, IndexResult, LatestPointer,
    ProviderObservation, TxId,
};

/// Static parameters of the tick pipeline
#[derive(Debug, Clone)]
pub struct TickConfig {
    pub network: String,
    pub assets: Vec<String>,
    pub aggregation: AggregationConfig,
    pub collector: CollectorConfig,
    pub max_payload_bytes: usize,
    pub submit_timeout: Duration,
}

/// What happened to the on-chain commitment of one bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AnchorOutcome {
    Anchored(TxId),
    /// Nothing to commit (anchoring disabled, or no attestable index)
    Skipped(String),
    Failed(String),
}

/// Per-asset result of a tick
#[derive(Debug, Clone, Serialize)]
pub struct AssetTickReport {
    pub asset: String,
    pub tick_id: String,
    pub index: IndexResult,
    pub hash: Option<String>,
    pub anchor: AnchorOutcome,
    pub stored: bool,
    pub pointer_advanced: bool,
    /// Why storing or pointer publication did not happen
    pub storage_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick_id: String,
    pub started_at: DateTime<Utc>,
    pub assets: Vec<AssetTickReport>,
}

/// Last known state of one asset
#[derive(Debug, Clone, Serialize)]
pub struct AssetState {
    pub index: IndexResult,
    pub hash_prefix: Option<String>,
    pub tx_id: Option<TxId>,
    pub stored: bool,
    pub updated_at: DateTime<Utc>,
    pub consecutive_anchor_failures: u32,
}

/// Oracle status owned by the service and updated only by `run_tick`
#[derive(Debug, Clone, Default, Serialize)]
pub struct OracleState {
    pub ticks: u64,
    pub last_tick_id: Option<String>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub assets: HashMap<String, AssetState>,
}

pub struct OracleService {
    config: TickConfig,
    anchor: Option<Arc<dyn Anchor>>,
    store: Arc<dyn BundleStore>,
    state: RwLock<OracleState>,
}

impl OracleService {
    /// `anchor = None` disables anchoring; bundles are still built and stored.
    pub fn new(
        config: TickConfig,
        anchor: Option<Arc<dyn Anchor>>,
        store: Arc<dyn BundleStore>,
    ) -> Self {
        Self {
            config,
            anchor,
            store,
            state: RwLock::new(OracleState::default()),
        }
    }

    pub fn config(&self) -> &TickConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.store
    }

    /// Snapshot of the current status
    pub async fn state(&self) -> OracleState {
        self.state.read().await.clone()
    }

    /// Latest anchored/persisted tick, as recorded by the store
    pub async fn latest(&self) -> anyhow::Result<Option<LatestPointer>> {
        Ok(self.store.latest_pointer().await?)
    }

    /// Run one tick over the observations collected for it
    pub async fn run_tick(&self, tick_id: &str, observations: Vec<ProviderObservation>) -> TickReport {
        let started_at = Utc::now();
        info!(
            tick_id,
            observations = observations.len(),
            assets = self.config.assets.len(),
            "Tick started"
        );

        let mut reports = Vec::with_capacity(self.config.assets.len());
        for asset in &self.config.assets {
            let bundle_tick_id = if self.config.assets.len() > 1 {
                format!("{}:{}", tick_id, asset)
            } else {
                tick_id.to_string()
            };
            let report = self
                .run_asset(&bundle_tick_id, asset, observations.clone())
                .await;
            self.record(&report).await;
            reports.push(report);
        }

        {
            let mut state = self.state.write().await;
            state.ticks += 1;
            state.last_tick_id = Some(tick_id.to_string());
            state.last_tick_at = Some(started_at);
        }

        info!(
            tick_id,
            anchored = reports
                .iter()
                .filter(|r| matches!(r.anchor, AnchorOutcome::Anchored(_)))
                .count(),
            stored = reports.iter().filter(|r| r.stored).count(),
            "Tick finished"
        );

        TickReport {
            tick_id: tick_id.to_string(),
            started_at,
            assets: reports,
        }
    }

    async fn run_asset(
        &self,
        tick_id: &str,
        asset: &str,
        observations: Vec<ProviderObservation>,
    ) -> AssetTickReport {
        let index = aggregate(&observations, &self.config.aggregation, asset);
        info!(
            asset,
            status = %index.status,
            price = index.price,
            sources = index.source_count,
            dispersion = index.dispersion,
            "Index computed"
        );

        let bundle = build_bundle(
            observations,
            index.clone(),
            BundleMetadata {
                tick_id: tick_id.to_string(),
                network: self.config.network.clone(),
                collector_config: self.config.collector,
                aggregation: self.config.aggregation.clone(),
            },
        );

        let mut report = AssetTickReport {
            asset: asset.to_string(),
            tick_id: tick_id.to_string(),
            index,
            hash: None,
            anchor: AnchorOutcome::Skipped("not attempted".to_string()),
            stored: false,
            pointer_advanced: false,
            storage_error: None,
        };

        let hash = match hash_bundle(&bundle) {
            Ok(hash) => hash,
            Err(e) => {
                error!(asset, error = %e, "Bundle could not be hashed");
                report.storage_error = Some(format!("hashing failed: {}", e));
                return report;
            }
        };
        report.hash = Some(hash.clone());
        let prefix = hash_prefix(&hash).to_string();

        report.anchor = self.anchor_bundle(asset, &report.index, &prefix).await;
        let tx_id = match &report.anchor {
            AnchorOutcome::Anchored(tx) => Some(tx.clone()),
            _ => None,
        };

        let envelope = BundleEnvelope {
            tx_id: tx_id.clone(),
            stored_at: Utc::now(),
        };
        if let Err(e) = self.store.put(&bundle, &hash, envelope).await {
            error!(asset, prefix = %prefix, error = %e, "Bundle could not be stored, pointer not advanced");
            report.storage_error = Some(e.to_string());
            return report;
        }
        report.stored = true;

        let pointer = LatestPointer {
            hash_prefix: prefix.clone(),
            hash: hash.clone(),
            tx_id,
            asset: asset.to_string(),
            tick_id: tick_id.to_string(),
            updated_at: Utc::now(),
        };
        match self.store.set_latest_pointer(&pointer).await {
            Ok(()) => report.pointer_advanced = true,
            Err(e) => {
                error!(asset, prefix = %prefix, error = %e, "Latest pointer could not be updated");
                report.storage_error = Some(format!("pointer update failed: {}", e));
            }
        }
        report
    }

    async fn anchor_bundle(&self, asset: &str, index: &IndexResult, prefix: &str) -> AnchorOutcome {
        let Some(anchor) = &self.anchor else {
            return AnchorOutcome::Skipped("anchoring disabled".to_string());
        };

        let payload = match encode_payload(index, prefix, self.config.max_payload_bytes) {
            Ok(payload) => payload,
            Err(e) => {
                info!(asset, status = %index.status, reason = %e, "Index not anchored");
                return AnchorOutcome::Skipped(e.to_string());
            }
        };

        let submit_timeout_ms = self.config.submit_timeout.as_millis() as u64;
        match tokio::time::timeout(self.config.submit_timeout, anchor.submit(&payload)).await {
            Ok(Ok(tx_id)) => {
                info!(asset, ledger = anchor.name(), tx_id = %tx_id, prefix, "Bundle anchored");
                AnchorOutcome::Anchored(tx_id)
            }
            Ok(Err(e)) => {
                warn!(asset, ledger = anchor.name(), error = %e, "Anchoring failed, continuing without commitment");
                AnchorOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!(asset, ledger = anchor.name(), timeout_ms = submit_timeout_ms, "Anchoring timed out, continuing without commitment");
                AnchorOutcome::Failed(format!("ledger call timed out after {}ms", submit_timeout_ms))
            }
        }
    }

    async fn record(&self, report: &AssetTickReport) {
        let mut state = self.state.write().await;
        let previous_failures = state
            .assets
            .get(&report.asset)
            .map(|s| s.consecutive_anchor_failures)
            .unwrap_or(0);
        let (tx_id, failures) = match &report.anchor {
            AnchorOutcome::Anchored(tx) => (Some(tx.clone()), 0),
            AnchorOutcome::Failed(_) => (None, previous_failures + 1),
            AnchorOutcome::Skipped(_) => (None, previous_failures),
        };
        state.assets.insert(
            report.asset.clone(),
            AssetState {
                index: report.index.clone(),
                hash_prefix: report.hash.as_deref().map(|h| hash_prefix(h).to_string()),
                tx_id,
                stored: report.stored,
                updated_at: Utc::now(),
                consecutive_anchor_failures: failures,
            },
        );
    }
}

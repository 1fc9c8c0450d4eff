//! Verifier - re-derives an on-chain commitment from stored evidence
//!
//! Walks a single request through
//! `START -> FETCHED_TX -> DECODED -> VALIDATED_SCHEMA -> BUNDLE_LOOKED_UP -> HASH_COMPARED`
//! and stops at the first stage that cannot be completed. The result always
//! carries the stage reached plus whatever was learned on the way.
//!
//! Verification never retries: transient failures come back as `ERROR` and
//! the caller decides whether to ask again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::anchor::{decode_payload, Anchor, AnchorPayload, PayloadError};
use crate::evidence::{hash_bundle, hash_prefix, replay_index, HASH_PREFIX_LEN};
use crate::store::BundleStore;
use crate::types::TxId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Recomputed hash matches the on-chain commitment
    Passed,
    /// Definite integrity violation
    Failed,
    /// Commitment is well-formed but the evidence is not held locally
    Partial,
    /// The request could not be carried out
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStage {
    Start,
    FetchedTx,
    Decoded,
    ValidatedSchema,
    BundleLookedUp,
    HashCompared,
}

/// Outcome of one verification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    /// Last stage completed
    pub stage: VerificationStage,
    /// Present whenever status is not `PASSED`
    pub reason: Option<String>,
    pub violations: Vec<String>,
    pub tx_id: String,
    pub network: String,
    pub payload: Option<AnchorPayload>,
    pub onchain_hash: Option<String>,
    pub recomputed_hash: Option<String>,
    pub full_hash: Option<String>,
    pub tick_id: Option<String>,
    /// Whether the full hash recorded next to the bundle still matches
    pub stored_hash_matches: Option<bool>,
    /// Whether the aggregator reproduces the bundle's index from its observations
    pub index_reproducible: Option<bool>,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    fn begin(tx_id: &str, network: &str) -> Self {
        Self {
            status: VerificationStatus::Error,
            stage: VerificationStage::Start,
            reason: None,
            violations: Vec::new(),
            tx_id: tx_id.to_string(),
            network: network.to_string(),
            payload: None,
            onchain_hash: None,
            recomputed_hash: None,
            full_hash: None,
            tick_id: None,
            stored_hash_matches: None,
            index_reproducible: None,
            checked_at: Utc::now(),
        }
    }

    fn finish(mut self, status: VerificationStatus, reason: impl Into<String>) -> Self {
        self.status = status;
        self.reason = Some(reason.into());
        self
    }

    fn error(self, reason: impl Into<String>) -> Self {
        self.finish(VerificationStatus::Error, reason)
    }

    fn failed(self, reason: impl Into<String>) -> Self {
        self.finish(VerificationStatus::Failed, reason)
    }

    pub fn is_passed(&self) -> bool {
        self.status == VerificationStatus::Passed
    }
}

pub struct Verifier {
    network: String,
    anchor: Arc<dyn Anchor>,
    store: Arc<dyn BundleStore>,
    fetch_timeout: Duration,
}

impl Verifier {
    pub fn new(
        network: impl Into<String>,
        anchor: Arc<dyn Anchor>,
        store: Arc<dyn BundleStore>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            network: network.into(),
            anchor,
            store,
            fetch_timeout,
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Verify the commitment carried by `tx_id` on `network`
    pub async fn verify(&self, tx_id: &str, network: &str) -> VerificationResult {
        let result = self.run(tx_id, network).await;
        match result.status {
            VerificationStatus::Passed => info!(
                tx_id = %result.tx_id,
                hash = result.recomputed_hash.as_deref().unwrap_or_default(),
                "Verification passed"
            ),
            status => warn!(
                tx_id = %result.tx_id,
                status = ?status,
                stage = ?result.stage,
                reason = result.reason.as_deref().unwrap_or_default(),
                "Verification did not pass"
            ),
        }
        result
    }

    async fn run(&self, raw_tx_id: &str, network: &str) -> VerificationResult {
        let mut result = VerificationResult::begin(raw_tx_id, network);

        // Malformed input is rejected before any I/O
        if network != self.network {
            return result.error(format!(
                "unknown network {:?}, this verifier serves {:?}",
                network, self.network
            ));
        }
        let tx_id = match TxId::parse(raw_tx_id) {
            Ok(tx_id) => tx_id,
            Err(e) => return result.error(format!("malformed transaction id: {}", e)),
        };
        result.tx_id = tx_id.to_string();

        // START -> FETCHED_TX
        let fetched = tokio::time::timeout(self.fetch_timeout, self.anchor.fetch_payload(&tx_id)).await;
        let bytes = match fetched {
            Err(_) => {
                return result.error(format!(
                    "ledger fetch timed out after {}ms",
                    self.fetch_timeout.as_millis()
                ))
            }
            Ok(Err(e)) => return result.error(format!("ledger fetch failed: {}", e)),
            Ok(Ok(None)) => return result.error(format!("transaction {} not found", tx_id)),
            Ok(Ok(Some(bytes))) => bytes,
        };
        result.stage = VerificationStage::FetchedTx;

        // FETCHED_TX -> DECODED
        if bytes.is_empty() {
            return result.failed("no payload");
        }
        let payload = match decode_payload(&bytes) {
            Ok(payload) => payload,
            Err(PayloadError::Schema(violations)) => {
                result.violations = violations;
                return result.failed("payload does not match the anchor schema");
            }
            Err(e) => {
                result.violations = vec![e.to_string()];
                return result.failed("payload could not be decoded");
            }
        };
        result.onchain_hash = Some(payload.h.clone());
        result.payload = Some(payload.clone());
        result.stage = VerificationStage::Decoded;

        // DECODED -> VALIDATED_SCHEMA
        let violations = payload.validate();
        if !violations.is_empty() {
            result.violations = violations;
            return result.failed("payload fields out of range");
        }
        result.stage = VerificationStage::ValidatedSchema;

        // VALIDATED_SCHEMA -> BUNDLE_LOOKED_UP
        let lookup = tokio::time::timeout(self.fetch_timeout, self.store.get(&payload.h)).await;
        let stored = match lookup {
            Err(_) => {
                return result.error(format!(
                    "bundle lookup timed out after {}ms",
                    self.fetch_timeout.as_millis()
                ))
            }
            Ok(Err(e)) => return result.error(format!("bundle lookup failed: {}", e)),
            Ok(Ok(None)) => {
                return result.finish(
                    VerificationStatus::Partial,
                    format!("bundle {} is not available in the local store", payload.h),
                )
            }
            Ok(Ok(Some(stored))) => stored,
        };
        result.tick_id = Some(stored.bundle.tick_id.clone());
        result.stage = VerificationStage::BundleLookedUp;

        // BUNDLE_LOOKED_UP -> HASH_COMPARED. Only the bundle is hashed; the
        // envelope never enters the computation.
        let full_hash = match hash_bundle(&stored.bundle) {
            Ok(hash) => hash,
            Err(e) => return result.error(format!("bundle could not be canonicalized: {}", e)),
        };
        let recomputed = hash_prefix(&full_hash).to_string();
        result.stored_hash_matches = Some(stored.hash == full_hash);
        result.recomputed_hash = Some(recomputed.clone());
        result.full_hash = Some(full_hash);
        result.stage = VerificationStage::HashCompared;

        if recomputed.len() != HASH_PREFIX_LEN || recomputed != payload.h {
            return result.failed(format!(
                "hash mismatch: on-chain {} vs recomputed {}",
                payload.h, recomputed
            ));
        }

        if !payload.matches_index(&stored.bundle.index) {
            return result.failed(format!(
                "payload does not match bundle index: on-chain p={} n={} d={}, bundle p={} n={} d={}",
                payload.p,
                payload.n,
                payload.d,
                stored.bundle.index.price,
                stored.bundle.index.source_count,
                stored.bundle.index.dispersion
            ));
        }

        let reproducible = replay_index(&stored.bundle);
        result.index_reproducible = Some(reproducible);
        if !reproducible {
            return result.failed("bundle index is not reproducible from its observations");
        }

        result.status = VerificationStatus::Passed;
        result
    }
}

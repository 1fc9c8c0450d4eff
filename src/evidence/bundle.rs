//! Evidence bundle assembly and hashing

use sha2::{Digest, Sha256};

use crate::evidence::canonical::canonicalize;
use crate::oracle::aggregate;
use crate::types::{
    AggregationConfig, CollectorConfig, EvidenceBundle, IndexResult, ProviderObservation,
};

/// Hex characters of the bundle hash published on-chain and used as store key
pub const HASH_PREFIX_LEN: usize = 16;

/// Everything about a tick that is not observations or index
#[derive(Debug, Clone)]
pub struct BundleMetadata {
    pub tick_id: String,
    pub network: String,
    pub collector_config: CollectorConfig,
    pub aggregation: AggregationConfig,
}

/// Assemble a bundle. Observations keep collection order.
pub fn build_bundle(
    observations: Vec<ProviderObservation>,
    index: IndexResult,
    metadata: BundleMetadata,
) -> EvidenceBundle {
    EvidenceBundle {
        tick_id: metadata.tick_id,
        network: metadata.network,
        collector_config: metadata.collector_config,
        aggregation: metadata.aggregation,
        observations,
        index,
    }
}

/// Lowercase hex SHA-256 of the canonical bundle encoding
pub fn hash_bundle(bundle: &EvidenceBundle) -> Result<String, serde_json::Error> {
    let bytes = canonicalize(bundle)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Short form of a full hex hash
pub fn hash_prefix(full_hash: &str) -> &str {
    full_hash.get(..HASH_PREFIX_LEN).unwrap_or(full_hash)
}

/// Hex characters of a full SHA-256 bundle hash
pub const FULL_HASH_LEN: usize = 64;

/// Whether `value` has the shape of a hash prefix (16 lowercase hex chars)
pub fn is_hash_prefix(value: &str) -> bool {
    is_lower_hex(value, HASH_PREFIX_LEN)
}

/// Whether `value` has the shape of a full bundle hash (64 lowercase hex chars)
pub fn is_full_hash(value: &str) -> bool {
    is_lower_hex(value, FULL_HASH_LEN)
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Re-run the aggregator over the bundle's own observations and check that it
/// reproduces the stored index bit for bit.
pub fn replay_index(bundle: &EvidenceBundle) -> bool {
    let replayed = aggregate(&bundle.observations, &bundle.aggregation, &bundle.index.asset);
    replayed == bundle.index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndexStatus;
    use chrono::{TimeZone, Utc};

    fn sample_bundle() -> EvidenceBundle {
        let at = Utc.timestamp_opt(1_760_000_000, 0).unwrap();
        let observations = vec![
            ProviderObservation::ok("coingecko", "BTC", 97_500.0, at),
            ProviderObservation::ok("coinmarketcap", "BTC", 97_510.0, at),
        ];
        let aggregation = AggregationConfig::default();
        let index = aggregate(&observations, &aggregation, "BTC");
        build_bundle(
            observations,
            index,
            BundleMetadata {
                tick_id: "2025-10-09T08:53:20Z".to_string(),
                network: "testnet".to_string(),
                collector_config: CollectorConfig {
                    interval_secs: 60,
                    jitter_secs: 5,
                },
                aggregation,
            },
        )
    }

    #[test]
    fn hash_is_stable_across_calls_and_clones() {
        let bundle = sample_bundle();
        let first = hash_bundle(&bundle).unwrap();
        assert_eq!(first, hash_bundle(&bundle.clone()).unwrap());
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn hash_survives_json_round_trip() {
        let bundle = sample_bundle();
        let json = serde_json::to_string_pretty(&bundle).unwrap();
        let back: EvidenceBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(hash_bundle(&bundle).unwrap(), hash_bundle(&back).unwrap());
    }

    #[test]
    fn hash_changes_with_price_or_tick_id() {
        let bundle = sample_bundle();
        let original = hash_bundle(&bundle).unwrap();

        let mut repriced = bundle.clone();
        repriced.observations[0].price = Some(97_500.01);
        assert_ne!(original, hash_bundle(&repriced).unwrap());

        let mut renamed = bundle;
        renamed.tick_id.push('x');
        assert_ne!(original, hash_bundle(&renamed).unwrap());
    }

    #[test]
    fn prefix_is_sixteen_hex_chars() {
        let full = hash_bundle(&sample_bundle()).unwrap();
        let prefix = hash_prefix(&full);
        assert_eq!(prefix.len(), HASH_PREFIX_LEN);
        assert!(is_hash_prefix(prefix));
        assert!(!is_hash_prefix("ABCDEF0123456789"));
        assert!(!is_hash_prefix("../../etc/passwd"));
    }

    #[test]
    fn full_hash_checks_every_character() {
        let full = hash_bundle(&sample_bundle()).unwrap();
        assert!(is_full_hash(&full));

        let mut tail = full.clone();
        tail.replace_range(63.., "g");
        assert!(!is_full_hash(&tail));
        assert!(!is_full_hash(&full.to_uppercase()));
        assert!(!is_full_hash(&full[..63]));
    }

    #[test]
    fn replay_reproduces_index() {
        let bundle = sample_bundle();
        assert_eq!(bundle.index.status, IndexStatus::Ok);
        assert!(replay_index(&bundle));

        let mut forged = bundle;
        forged.index.price = 99_000.0;
        assert!(!replay_index(&forged));
    }
}

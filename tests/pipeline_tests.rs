//! End-to-end tests: collect -> aggregate -> bundle -> anchor -> store -> verify

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use oracle_anchor::anchor::{decode_payload, Anchor, MemoryLedger};
    use oracle_anchor::evidence::{
        build_bundle, canonicalize, hash_bundle, hash_prefix, BundleMetadata,
    };
    use oracle_anchor::oracle::aggregate;
    use oracle_anchor::store::{BundleStore, FileBundleStore, MemoryBundleStore};
    use oracle_anchor::tick::{AnchorOutcome, OracleService, TickConfig};
    use oracle_anchor::types::{
        AggregationConfig, CollectorConfig, IndexStatus, ProviderObservation, StoredBundle,
        TxId,
    };
    use oracle_anchor::verifier::{VerificationStage, VerificationStatus, Verifier};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000, 0).unwrap()
    }

    fn ok(provider: &str, price: f64) -> ProviderObservation {
        ProviderObservation::ok(provider, "BTC", price, at())
    }

    fn failed(provider: &str) -> ProviderObservation {
        ProviderObservation::failed(provider, "BTC", "http 503", at())
    }

    fn aggregation(ratio: f64, min_valid: usize) -> AggregationConfig {
        AggregationConfig {
            quote: "USD".to_string(),
            outlier_threshold_ratio: ratio,
            min_valid_sources: min_valid,
        }
    }

    fn tick_config() -> TickConfig {
        TickConfig {
            network: "testnet".to_string(),
            assets: vec!["BTC".to_string()],
            aggregation: aggregation(0.01, 2),
            collector: CollectorConfig {
                interval_secs: 60,
                jitter_secs: 5,
            },
            max_payload_bytes: 80,
            submit_timeout: Duration::from_secs(1),
        }
    }

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "oracle_anchor_pipeline_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    struct Harness {
        ledger: Arc<MemoryLedger>,
        store: Arc<FileBundleStore>,
        service: OracleService,
        verifier: Verifier,
        dir: PathBuf,
    }

    impl Harness {
        fn new(test_name: &str) -> Self {
            let dir = temp_data_dir(test_name);
            let ledger = Arc::new(MemoryLedger::new(80));
            let store = Arc::new(FileBundleStore::new(&dir).unwrap());
            let service = OracleService::new(tick_config(), Some(ledger.clone()), store.clone());
            let verifier = Verifier::new(
                "testnet",
                ledger.clone(),
                store.clone(),
                Duration::from_secs(1),
            );
            Self {
                ledger,
                store,
                service,
                verifier,
                dir,
            }
        }

        async fn anchored_tick(&self, tick_id: &str) -> (TxId, String) {
            let report = self
                .service
                .run_tick(tick_id, vec![ok("A", 97_500.0), ok("B", 97_510.0)])
                .await;
            let asset = &report.assets[0];
            let tx = match &asset.anchor {
                AnchorOutcome::Anchored(tx) => tx.clone(),
                other => panic!("tick was not anchored: {other:?}"),
            };
            (tx, asset.hash.clone().unwrap())
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    // ============================================================================
    // Aggregation scenarios
    // ============================================================================

    #[test]
    fn scenario_two_agreeing_sources() {
        let index = aggregate(&[ok("A", 97_500.0), ok("B", 97_510.0)], &aggregation(0.01, 2), "BTC");
        assert_eq!(index.status, IndexStatus::Ok);
        assert!((index.price - 97_505.0).abs() < 1e-9);
        assert_eq!(index.source_count, 2);
    }

    #[test]
    fn scenario_one_failed_source_degrades() {
        let index = aggregate(&[ok("A", 97_500.0), failed("B")], &aggregation(0.01, 2), "BTC");
        assert_eq!(index.status, IndexStatus::Degraded);
        assert_eq!(index.price, 97_500.0);
        assert_eq!(index.source_count, 1);
        assert!(index.note.unwrap().contains('A'));
    }

    #[test]
    fn scenario_all_failed_is_stale() {
        let index = aggregate(&[failed("A"), failed("B")], &aggregation(0.01, 2), "BTC");
        assert_eq!(index.status, IndexStatus::Stale);
        assert_eq!(index.price, 0.0);
        assert_eq!(index.source_count, 0);
    }

    #[test]
    fn scenario_five_percent_split_is_stale() {
        let index = aggregate(&[ok("A", 97_500.0), ok("B", 102_375.0)], &aggregation(0.01, 2), "BTC");
        assert_eq!(index.status, IndexStatus::Stale);
        assert_eq!(index.source_count, 0);
    }

    #[test]
    fn quorum_boundary() {
        let cfg = aggregation(0.01, 2);
        assert_eq!(aggregate(&[], &cfg, "BTC").status, IndexStatus::Stale);
        assert_eq!(aggregate(&[ok("A", 100.0)], &cfg, "BTC").status, IndexStatus::Degraded);
        assert_eq!(
            aggregate(&[ok("A", 100.0), ok("B", 100.5)], &cfg, "BTC").status,
            IndexStatus::Ok
        );
        assert_eq!(
            aggregate(&[ok("A", 100.0), ok("B", 100.5), ok("C", 100.2)], &cfg, "BTC").status,
            IndexStatus::Ok
        );
    }

    #[test]
    fn sources_one_percent_apart_are_kept() {
        let index = aggregate(&[ok("A", 100.0), ok("B", 101.0)], &aggregation(0.01, 2), "BTC");
        assert_eq!(index.source_count, 2);
        assert_eq!(index.status, IndexStatus::Ok);
    }

    #[test]
    fn bundle_index_is_reproducible() {
        let observations = vec![ok("A", 97_500.0), ok("B", 97_510.0), failed("C")];
        let cfg = aggregation(0.01, 2);
        let index = aggregate(&observations, &cfg, "BTC");
        let bundle = build_bundle(
            observations.clone(),
            index.clone(),
            BundleMetadata {
                tick_id: "t".into(),
                network: "testnet".into(),
                collector_config: CollectorConfig {
                    interval_secs: 60,
                    jitter_secs: 5,
                },
                aggregation: cfg.clone(),
            },
        );
        assert_eq!(aggregate(&bundle.observations, &bundle.aggregation, "BTC"), index);
        assert_eq!(bundle.observations, observations);
    }

    // ============================================================================
    // Canonicalization
    // ============================================================================

    #[test]
    fn canonical_bytes_ignore_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"tick_id":"t","index":{"price":1.5,"asset":"BTC"}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"index":{"asset":"BTC","price":1.5},"tick_id":"t"}"#).unwrap();
        assert_eq!(canonicalize(&a).unwrap(), canonicalize(&b).unwrap());
    }

    // ============================================================================
    // Anchoring and verification
    // ============================================================================

    #[tokio::test]
    async fn round_trip_verification_passes() {
        let h = Harness::new("round_trip");
        let (tx, hash) = h.anchored_tick("2025-10-09T08:53:20Z").await;

        let payload = decode_payload(&h.ledger.fetch_payload(&tx).await.unwrap().unwrap()).unwrap();
        assert_eq!(payload.h, hash_prefix(&hash));
        assert_eq!(payload.n, 2);

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Passed, "{:?}", result.reason);
        assert_eq!(result.full_hash.as_deref(), Some(hash.as_str()));

        let pointer = h.store.latest_pointer().await.unwrap().unwrap();
        assert_eq!(pointer.tx_id.as_ref(), Some(&tx));
        assert_eq!(pointer.hash, hash);
    }

    #[tokio::test]
    async fn non_round_prices_survive_storage_and_verify() {
        let h = Harness::new("non_round");
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let mut ticks = vec![vec![90_303.173608651, 90_552.75140229441, 90_419.10296361517]];
        for _ in 0..200 {
            let base: f64 = rng.gen_range(90_000.0..100_000.0);
            ticks.push(
                (0..3)
                    .map(|_| base * (1.0 + rng.gen_range(0.0..0.009)))
                    .collect(),
            );
        }

        for (i, prices) in ticks.iter().enumerate() {
            let observations = prices
                .iter()
                .enumerate()
                .map(|(p, price)| ok(&format!("P{p}"), *price))
                .collect();
            let report = h.service.run_tick(&format!("tick-{i}"), observations).await;
            let tx = match &report.assets[0].anchor {
                AnchorOutcome::Anchored(tx) => tx.clone(),
                other => panic!("tick {i} was not anchored: {other:?}"),
            };

            let result = h.verifier.verify(tx.as_str(), "testnet").await;
            assert_eq!(
                result.status,
                VerificationStatus::Passed,
                "tick {i} with prices {prices:?}: {:?}",
                result.reason
            );
        }
    }

    #[tokio::test]
    async fn tiny_dispersion_is_anchored_in_fixed_point() {
        let h = Harness::new("tiny_dispersion");
        let report = h
            .service
            .run_tick(
                "2025-10-09T08:53:20Z",
                vec![ok("A", 1_000_000.0), ok("B", 1_000_001.0)],
            )
            .await;
        let tx = match &report.assets[0].anchor {
            AnchorOutcome::Anchored(tx) => tx.clone(),
            other => panic!("tick was not anchored: {other:?}"),
        };

        let raw = h.ledger.fetch_payload(&tx).await.unwrap().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.starts_with(r#"{"d":0.000001,"h":"#), "{text}");
        assert!(text.ends_with(r#","n":2,"p":1000000.5}"#), "{text}");

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Passed, "{:?}", result.reason);
    }

    #[tokio::test]
    async fn tampered_observation_fails_verification() {
        let h = Harness::new("tamper_obs");
        let (tx, hash) = h.anchored_tick("t1").await;

        let path = h.store.bundle_path(hash_prefix(&hash));
        let mut stored: StoredBundle =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        stored.bundle.observations[0].price = Some(97_400.0);
        std::fs::write(&path, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Failed);
        assert_eq!(result.stage, VerificationStage::HashCompared);
        assert_ne!(result.recomputed_hash, result.onchain_hash);
        assert!(result.reason.unwrap().contains("hash mismatch"));
    }

    #[tokio::test]
    async fn tampered_metadata_fails_verification() {
        let h = Harness::new("tamper_meta");
        let (tx, hash) = h.anchored_tick("t1").await;

        for mutate in [
            (|s: &mut StoredBundle| s.bundle.tick_id.push('!')) as fn(&mut StoredBundle),
            |s: &mut StoredBundle| s.bundle.network = "mainnet".into(),
            |s: &mut StoredBundle| s.bundle.index.dispersion += 1e-9,
            |s: &mut StoredBundle| s.bundle.collector_config.jitter_secs += 1,
        ] {
            let path = h.store.bundle_path(hash_prefix(&hash));
            let original = std::fs::read(&path).unwrap();
            let mut stored: StoredBundle = serde_json::from_slice(&original).unwrap();
            mutate(&mut stored);
            std::fs::write(&path, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();

            let result = h.verifier.verify(tx.as_str(), "testnet").await;
            assert_eq!(result.status, VerificationStatus::Failed);

            std::fs::write(&path, original).unwrap();
        }

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn envelope_changes_do_not_affect_hash() {
        let h = Harness::new("envelope");
        let (tx, hash) = h.anchored_tick("t1").await;

        let path = h.store.bundle_path(hash_prefix(&hash));
        let mut stored: StoredBundle =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        stored.envelope.tx_id = None;
        stored.envelope.stored_at = at();
        std::fs::write(&path, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();

        assert_eq!(hash_bundle(&stored.bundle).unwrap(), hash);
        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn missing_evidence_is_partial() {
        let h = Harness::new("partial");
        let (tx, hash) = h.anchored_tick("t1").await;
        std::fs::remove_file(h.store.bundle_path(hash_prefix(&hash))).unwrap();

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Partial);
        assert!(result.reason.is_some());
    }

    #[tokio::test]
    async fn out_of_range_payload_fails_naming_field() {
        let h = Harness::new("range");
        let tx = h
            .ledger
            .insert_raw(br#"{"d":0.0,"h":"0123456789abcdef","n":15,"p":97505.0}"#.to_vec())
            .unwrap();

        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(result.violations.iter().any(|v| v.starts_with("n out of range")));
    }

    #[tokio::test]
    async fn ledger_outage_keeps_bundles_and_recovers() {
        let h = Harness::new("outage");
        h.ledger.set_offline(true);
        let report = h
            .service
            .run_tick("t1", vec![ok("A", 97_500.0), ok("B", 97_510.0)])
            .await;
        assert!(matches!(report.assets[0].anchor, AnchorOutcome::Failed(_)));
        assert!(report.assets[0].stored);

        h.ledger.set_offline(false);
        let (tx, _) = h.anchored_tick("t2").await;
        let result = h.verifier.verify(tx.as_str(), "testnet").await;
        assert_eq!(result.status, VerificationStatus::Passed);
    }

    #[tokio::test]
    async fn verification_against_memory_store_matches_file_store() {
        let ledger = Arc::new(MemoryLedger::new(80));
        let store = Arc::new(MemoryBundleStore::new());
        let service = OracleService::new(tick_config(), Some(ledger.clone()), store.clone());
        let report = service
            .run_tick("t1", vec![ok("A", 97_500.0), ok("B", 97_510.0), failed("C")])
            .await;
        let tx = match &report.assets[0].anchor {
            AnchorOutcome::Anchored(tx) => tx.clone(),
            other => panic!("unexpected {other:?}"),
        };

        let verifier = Verifier::new("testnet", ledger, store, Duration::from_secs(1));
        let result = verifier.verify(tx.as_str(), "testnet").await;
        assert!(result.is_passed());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "PASSED");
    }
}

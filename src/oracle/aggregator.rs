//! Oracle Aggregator - Combines provider observations into one index
//!
//! Median of the valid prices, outlier rejection around that median, then a
//! second median over the survivors. Quorum decides OK / DEGRADED / STALE.

use chrono::{DateTime, Utc};

use crate::types::{AggregationConfig, IndexResult, IndexStatus, ProviderObservation};

/// Relative slack applied to the outlier bound so that a deviation of exactly
/// the threshold survives float rounding.
const BOUNDARY_EPSILON: f64 = 1e-12;

/// Aggregate one asset's observations into an [`IndexResult`].
///
/// Pure function of its inputs: no clock, no randomness.
pub fn aggregate(
    observations: &[ProviderObservation],
    config: &AggregationConfig,
    asset: &str,
) -> IndexResult {
    let for_asset: Vec<&ProviderObservation> =
        observations.iter().filter(|o| o.asset == asset).collect();

    let valid: Vec<(&ProviderObservation, f64)> = for_asset
        .iter()
        .filter_map(|o| o.valid_price().map(|p| (*o, p)))
        .collect();

    if valid.is_empty() {
        return IndexResult {
            asset: asset.to_string(),
            quote: config.quote.clone(),
            price: 0.0,
            sources_used: Vec::new(),
            source_count: 0,
            dispersion: 0.0,
            observed_at: latest_instant(for_asset.iter().copied()),
            status: IndexStatus::Stale,
            note: None,
        };
    }

    let valid_prices: Vec<f64> = valid.iter().map(|(_, p)| *p).collect();
    let initial_median = median(&valid_prices);

    let bound = config.outlier_threshold_ratio * initial_median * (1.0 + BOUNDARY_EPSILON);
    let kept: Vec<(&ProviderObservation, f64)> = valid
        .iter()
        .filter(|(_, p)| (p - initial_median).abs() <= bound)
        .copied()
        .collect();

    if kept.is_empty() {
        // Every valid source disagreed with the consensus. Nothing is attested,
        // the unfiltered median is kept as reference price.
        return IndexResult {
            asset: asset.to_string(),
            quote: config.quote.clone(),
            price: initial_median,
            sources_used: Vec::new(),
            source_count: 0,
            dispersion: 0.0,
            observed_at: latest_instant(valid.iter().map(|(o, _)| *o)),
            status: IndexStatus::Stale,
            note: None,
        };
    }

    let kept_prices: Vec<f64> = kept.iter().map(|(_, p)| *p).collect();
    let final_median = median(&kept_prices);
    let sources_used: Vec<String> = kept.iter().map(|(o, _)| o.provider.clone()).collect();
    let source_count = sources_used.len();

    let dispersion = if source_count > 1 {
        let min = kept_prices.iter().copied().fold(f64::INFINITY, f64::min);
        let max = kept_prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (max - min) / final_median
    } else {
        0.0
    };

    let (status, note) = if source_count >= config.min_valid_sources {
        (IndexStatus::Ok, None)
    } else {
        (
            IndexStatus::Degraded,
            Some(format!(
                "degraded: relying on {} of {} required sources ({})",
                source_count,
                config.min_valid_sources,
                sources_used.join(", ")
            )),
        )
    };

    IndexResult {
        asset: asset.to_string(),
        quote: config.quote.clone(),
        price: final_median,
        sources_used,
        source_count,
        dispersion,
        observed_at: latest_instant(kept.iter().map(|(o, _)| *o)),
        status,
        note,
    }
}

/// Median of a non-empty slice; even counts average the two middle values.
/// Returns 0.0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn latest_instant<'a>(observations: impl Iterator<Item = &'a ProviderObservation>) -> DateTime<Utc> {
    observations
        .map(|o| o.observed_at)
        .max()
        .unwrap_or_default()
}

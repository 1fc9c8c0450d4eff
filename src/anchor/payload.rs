//! Anchor payload - the compact on-chain commitment
//!
//! `{"d":<dispersion>,"h":<hash prefix>,"n":<source count>,"p":<price>}`,
//! canonical JSON, bounded in size.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::evidence::{canonicalize, is_hash_prefix, HASH_PREFIX_LEN};
use crate::types::IndexResult;

pub const PRICE_DECIMALS: u32 = 2;
pub const DISPERSION_DECIMALS: u32 = 6;

pub const MAX_PRICE: f64 = 10_000_000.0;
pub const MIN_SOURCES: u64 = 1;
pub const MAX_SOURCES: u64 = 10;

/// Smallest ceiling that still fits a worst-case payload
pub const MIN_PAYLOAD_CEILING: usize = 64;

const KEYS: [&str; 4] = ["d", "h", "n", "p"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPayload {
    /// Dispersion, rounded to [`DISPERSION_DECIMALS`]
    pub d: f64,
    /// Bundle hash prefix, lowercase hex
    pub h: String,
    /// Source count
    pub n: u64,
    /// Price, rounded to [`PRICE_DECIMALS`]
    pub p: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),
    #[error("payload schema violations: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("payload is {size} bytes, ceiling is {max}")]
    TooLarge { size: usize, max: usize },
    #[error("payload serialization failed: {0}")]
    Encode(String),
}

impl AnchorPayload {
    /// Derive the payload for an index and its bundle hash prefix
    pub fn from_index(index: &IndexResult, hash_prefix: &str) -> Self {
        Self {
            d: round_to(index.dispersion, DISPERSION_DECIMALS),
            h: hash_prefix.to_string(),
            n: index.source_count as u64,
            p: round_to(index.price, PRICE_DECIMALS),
        }
    }

    /// Range checks; every violated constraint is listed.
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();
        if !self.p.is_finite() || self.p < 0.0 || self.p > MAX_PRICE {
            violations.push(format!("p out of range [0, {}]: {}", MAX_PRICE, self.p));
        }
        if !self.d.is_finite() || self.d < 0.0 || self.d > 1.0 {
            violations.push(format!("d out of range [0, 1]: {}", self.d));
        }
        if self.n < MIN_SOURCES || self.n > MAX_SOURCES {
            violations.push(format!(
                "n out of range [{}, {}]: {}",
                MIN_SOURCES, MAX_SOURCES, self.n
            ));
        }
        if !is_hash_prefix(&self.h) {
            violations.push(format!(
                "h must be exactly {} lowercase hex characters: {:?}",
                HASH_PREFIX_LEN, self.h
            ));
        }
        violations
    }

    /// Whether this payload is what `index` would encode to
    pub fn matches_index(&self, index: &IndexResult) -> bool {
        self.p == round_to(index.price, PRICE_DECIMALS)
            && self.d == round_to(index.dispersion, DISPERSION_DECIMALS)
            && self.n == index.source_count as u64
    }
}

/// Encode the commitment for `index`. Refuses anything the verifier would reject.
pub fn encode_payload(
    index: &IndexResult,
    hash_prefix: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, PayloadError> {
    let payload = AnchorPayload::from_index(index, hash_prefix);
    let violations = payload.validate();
    if !violations.is_empty() {
        return Err(PayloadError::Schema(violations));
    }
    let bytes = canonicalize(&payload).map_err(|e| PayloadError::Encode(e.to_string()))?;
    if bytes.len() > max_bytes {
        return Err(PayloadError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    Ok(bytes)
}

/// Strict decode: exact key set, exact types. Range checks are left to
/// [`AnchorPayload::validate`].
pub fn decode_payload(bytes: &[u8]) -> Result<AnchorPayload, PayloadError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| PayloadError::Malformed(e.to_string()))?;
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(PayloadError::Schema(vec![format!(
                "expected an object, got {}",
                json_type(&other)
            )]))
        }
    };

    let mut violations = Vec::new();
    for key in map.keys() {
        if !KEYS.contains(&key.as_str()) {
            violations.push(format!("unexpected key {:?}", key));
        }
    }
    for key in KEYS {
        if !map.contains_key(key) {
            violations.push(format!("missing key {:?}", key));
        }
    }

    let d = map.get("d").and_then(|v| expect_number(v, "d", &mut violations));
    let p = map.get("p").and_then(|v| expect_number(v, "p", &mut violations));
    let n = match map.get("n") {
        Some(v) => match v.as_u64() {
            Some(n) => Some(n),
            None => {
                violations.push(format!(
                    "n must be a non-negative integer, got {}",
                    json_type(v)
                ));
                None
            }
        },
        None => None,
    };
    let h = match map.get("h") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            violations.push(format!("h must be a string, got {}", json_type(other)));
            None
        }
        None => None,
    };

    match (d, h, n, p) {
        (Some(d), Some(h), Some(n), Some(p)) if violations.is_empty() => {
            Ok(AnchorPayload { d, h, n, p })
        }
        _ => Err(PayloadError::Schema(violations)),
    }
}

fn expect_number(value: &Value, key: &str, violations: &mut Vec<String>) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        other => {
            violations.push(format!("{} must be a number, got {}", key, json_type(other)));
            None
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Half-away-from-zero rounding through a decimal, so the result does not
/// depend on binary representation artefacts of `value * 10^dp`.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

//! Canonical JSON encoding
//!
//! Object keys are emitted in lexicographic (byte) order at every depth,
//! arrays keep their order, no whitespace. Floats are written as the shortest
//! decimal that round-trips, always in plain fixed-point notation (`0.000001`,
//! never `1e-6`).

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Number, Value};

/// Serialize `value` to canonical bytes.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let tree = serde_json::to_value(value)?;
    let mut out = Vec::with_capacity(256);
    write_value(&tree, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), serde_json::Error> {
    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // Sorted explicitly: the map's own iteration order depends on
            // serde_json's `preserve_order` feature.
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(item, out)?;
            }
            out.push(b'}');
        }
        Value::Number(number) if number.is_f64() => write_float(number, out),
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

fn write_float(number: &Number, out: &mut Vec<u8>) {
    let shortest = number.to_string();
    if !shortest.contains('e') {
        out.extend_from_slice(shortest.as_bytes());
        return;
    }
    match Decimal::from_scientific(&shortest) {
        Ok(fixed) => {
            let text = fixed.normalize().to_string();
            out.extend_from_slice(text.as_bytes());
            if !text.contains('.') {
                out.extend_from_slice(b".0");
            }
        }
        // Beyond 28 significant decimal places; no price or ratio gets here.
        Err(_) => out.extend_from_slice(shortest.as_bytes()),
    }
}

//! Canonical JSON normalization and artifact digests.
//!
//! Artifacts are opaque to the engine, but their digests let traces and
//! session events reference a concrete output without copying it:
//! - object keys sorted by UTF-16 code units
//! - integer-valued floats collapsed to integers
//! - SHA-256 hex over the compact canonical form

use crate::domain::error::{PipelineError, Result};
use sha2::{Digest, Sha256};

fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys_utf16).collect())
        }
        other => other.clone(),
    }
}

fn normalize_value(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map.iter() {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.iter().map(normalize_value).collect::<Result<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(PipelineError::NonCanonicalContent(
                    "NaN/Infinity not permitted".to_string(),
                ));
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(serde_json::Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON: normalize numbers, sort keys.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    let normalized = normalize_value(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// SHA-256 hex digest of the canonical form of `value`.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(digest_bytes(canonical.as_bytes()))
}

/// SHA-256 hex digest of raw bytes.
pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

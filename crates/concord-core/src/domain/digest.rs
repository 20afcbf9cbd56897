//! Canonical JSON normalization, claim-value canonicalization and digests.
//!
//! Two flavours of canonical form live here:
//! - [`canonical_json`] is byte-exact (sorted keys, normalized numbers) and
//!   feeds [`compute_digest`] for content-addressed agent outputs.
//! - [`canonical_claim_value`] is the *comparison* form used when deciding
//!   whether two agents assert the same value: strings are trimmed,
//!   case-folded and whitespace-collapsed on top of the byte-exact rules.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::error::{ConcordError, Result};

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Integer-valued floats become integers; NaN/Infinity are rejected.
fn normalize_numbers(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map {
                normalized.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(Value::Object(normalized))
        }
        Value::Array(arr) => Ok(Value::Array(
            arr.iter().map(normalize_numbers).collect::<Result<Vec<_>>>()?,
        )),
        Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(ConcordError::Config(
                "NaN/Infinity not permitted in canonical JSON".to_string(),
            )),
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(Value::Number(serde_json::Number::from(f as i64)))
            }
            _ => Ok(Value::Number(n.clone())),
        },
        other => Ok(other.clone()),
    }
}

/// Convert a JSON value to canonical form: normalize numbers, sort keys, compact JSON.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys(&normalized))?)
}

/// SHA-256 hex digest of the canonical JSON form.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Fold a string for comparison: trim, lowercase, collapse internal whitespace.
pub fn fold_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison form of a claim value.
///
/// Infallible: non-finite numbers cannot be represented in `serde_json::Value`
/// in the first place, so the number pass only rewrites integer-valued floats.
pub fn canonical_claim_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(fold_text(s)),
        Value::Array(arr) => Value::Array(arr.iter().map(canonical_claim_value).collect()),
        Value::Object(map) => {
            let folded: serde_json::Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonical_claim_value(v)))
                .collect();
            sort_keys(&Value::Object(folded))
        }
        Value::Number(_) => normalize_numbers(value).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Whether two claim values are equal under canonicalization.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    canonical_claim_value(a) == canonical_claim_value(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_integer_float() {
        let canonical = canonical_json(&json!({ "value": 1.0 })).expect("canonical_json");
        assert_eq!(canonical, r#"{"value":1}"#);
    }

    #[test]
    fn test_digest_is_key_order_independent() {
        let a = compute_digest(&json!({ "a": 1, "b": [1, 2] })).unwrap();
        let b = compute_digest(&json!({ "b": [1, 2], "a": 1 })).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fold_text_collapses_case_and_whitespace() {
        assert_eq!(fold_text("  Max   Retries \n"), "max retries");
    }

    #[test]
    fn test_values_equivalent_under_canonicalization() {
        assert!(values_equivalent(&json!(" A "), &json!("a")));
        assert!(values_equivalent(&json!(3.0), &json!(3)));
        assert!(values_equivalent(
            &json!({ "Type": "INT", "n": 1 }),
            &json!({ "n": 1.0, "Type": "int" })
        ));
        assert!(!values_equivalent(&json!("A"), &json!("B")));
        assert!(!values_equivalent(&json!([1, 2]), &json!([2, 1])));
    }
}

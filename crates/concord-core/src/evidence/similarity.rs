//! Structural similarity between claim values and evidence payloads.
//!
//! Scores are in `[0, 1]`. Values equal under claim canonicalization score
//! 1.0; containers are compared member-wise; distinct scalars never score
//! above 0.5, so a wrong scalar can never be accepted on similarity alone.

use serde_json::Value;

use crate::domain::digest::canonical_claim_value;

/// Ceiling for partially matching strings.
const PARTIAL_TEXT_CEILING: f64 = 0.5;

pub fn structural_similarity(claimed: &Value, observed: &Value) -> f64 {
    similarity(&canonical_claim_value(claimed), &canonical_claim_value(observed))
}

fn similarity(a: &Value, b: &Value) -> f64 {
    if a == b {
        return 1.0;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) if x == y => 1.0,
            _ => 0.0,
        },
        (Value::String(x), Value::String(y)) => token_overlap(x, y) * PARTIAL_TEXT_CEILING,
        (Value::Object(x), Value::Object(y)) => {
            let union = x.keys().chain(y.keys().filter(|k| !x.contains_key(*k))).count();
            if union == 0 {
                return 1.0;
            }
            let shared: f64 = x
                .iter()
                .filter_map(|(k, v)| y.get(k).map(|w| similarity(v, w)))
                .sum();
            shared / union as f64
        }
        (Value::Array(x), Value::Array(y)) => {
            let longest = x.len().max(y.len());
            if longest == 0 {
                return 1.0;
            }
            let paired: f64 = x.iter().zip(y.iter()).map(|(v, w)| similarity(v, w)).sum();
            paired / longest as f64
        }
        _ => 0.0,
    }
}

/// Jaccard overlap of whitespace tokens.
fn token_overlap(a: &str, b: &str) -> f64 {
    let left: std::collections::BTreeSet<&str> = a.split_whitespace().collect();
    let right: std::collections::BTreeSet<&str> = b.split_whitespace().collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

/// Whether `value` fits the shape implied by `reference`: same JSON type,
/// object keys drawn from the reference's keys, array items fitting the
/// reference's first item.
pub fn fits_shape(value: &Value, reference: &Value) -> bool {
    match (value, reference) {
        (Value::Null, Value::Null)
        | (Value::Bool(_), Value::Bool(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_)) => true,
        (Value::Object(v), Value::Object(r)) => v
            .iter()
            .all(|(k, item)| r.get(k).is_some_and(|shape| fits_shape(item, shape))),
        (Value::Array(v), Value::Array(r)) => match r.first() {
            Some(shape) => v.iter().all(|item| fits_shape(item, shape)),
            None => true,
        },
        _ => false,
    }
}

/// 1.0 when `candidate` has the same shape as `claimed`, 0.5 when it is at
/// least the same JSON type, otherwise 0.
pub fn shape_compatibility(claimed: &Value, candidate: &Value) -> f64 {
    if fits_shape(candidate, claimed) && fits_shape(claimed, candidate) {
        1.0
    } else if std::mem::discriminant(claimed) == std::mem::discriminant(candidate) {
        0.5
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonically_equal_values_score_one() {
        assert_eq!(structural_similarity(&json!("  Postgres 15 "), &json!("postgres 15")), 1.0);
        assert_eq!(structural_similarity(&json!(2.0), &json!(2)), 1.0);
        assert_eq!(
            structural_similarity(&json!({ "a": 1, "b": "x" }), &json!({ "b": "X", "a": 1 })),
            1.0
        );
    }

    #[test]
    fn test_distinct_scalars_never_reach_acceptance() {
        assert_eq!(structural_similarity(&json!("A"), &json!("B")), 0.0);
        assert!(structural_similarity(&json!("postgres 14"), &json!("postgres 15")) <= 0.5);
        assert_eq!(structural_similarity(&json!(1), &json!("1")), 0.0);
    }

    #[test]
    fn test_objects_score_member_wise() {
        let score = structural_similarity(
            &json!({ "host": "db", "port": 5432 }),
            &json!({ "host": "db", "port": 5433 }),
        );
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fits_shape() {
        let schema = json!({ "host": "db", "port": 5432, "tags": ["a"] });
        assert!(fits_shape(&json!({ "port": 1 }), &schema));
        assert!(fits_shape(&json!({ "tags": ["x", "y"] }), &schema));
        assert!(!fits_shape(&json!({ "user": "root" }), &schema));
        assert!(!fits_shape(&json!({ "port": "1" }), &schema));
    }

    #[test]
    fn test_shape_compatibility_grades() {
        assert_eq!(shape_compatibility(&json!("A"), &json!("B")), 1.0);
        assert_eq!(shape_compatibility(&json!({ "a": 1 }), &json!({ "b": 1 })), 0.5);
        assert_eq!(shape_compatibility(&json!("A"), &json!(1)), 0.0);
    }
}

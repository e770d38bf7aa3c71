//! Confidence bucketing.
//!
//! Every expected field path lands in exactly one of three disjoint
//! buckets: high (confidence ≥ 0.90), low (0.80 ≤ confidence < 0.90), or
//! missing (< 0.80, or the value is absent). Extracted paths outside the
//! expected set are bucketed too, so the buckets jointly enumerate every
//! field carried on the record.

use std::collections::{BTreeMap, BTreeSet};

/// High-confidence threshold: merged into slots without confirmation.
pub const HIGH_CONFIDENCE: f64 = 0.90;

/// Low-confidence floor: below this a field is treated as missing.
pub const LOW_CONFIDENCE: f64 = 0.80;

/// The three disjoint buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldBuckets {
    pub high: Vec<String>,
    pub low: Vec<String>,
    pub missing: Vec<String>,
}

/// Partition field paths into buckets.
///
/// `expected` is the type schema's path list; `confidences` maps extracted
/// dotted paths to scores; `fields` holds the extracted values (a path with
/// a confidence but no value is still missing).
pub fn bucket_fields(
    expected: &[&str],
    confidences: &BTreeMap<String, f64>,
    fields: &serde_json::Value,
) -> FieldBuckets {
    let mut buckets = FieldBuckets::default();

    let mut all_paths: BTreeSet<String> = expected.iter().map(|p| (*p).to_string()).collect();
    all_paths.extend(confidences.keys().cloned());

    for path in all_paths {
        let present = value_at_path(fields, &path).is_some_and(|v| !v.is_null());
        let confidence = confidences.get(&path).copied().unwrap_or(0.0);

        if !present || confidence < LOW_CONFIDENCE {
            buckets.missing.push(path);
        } else if confidence >= HIGH_CONFIDENCE {
            buckets.high.push(path);
        } else {
            buckets.low.push(path);
        }
    }

    buckets
}

/// Look up a dotted path in a nested JSON object.
pub fn value_at_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Set a dotted path in a nested JSON object, creating intermediate
/// objects as needed.
pub fn set_value_at_path(target: &mut serde_json::Value, path: &str, new_value: serde_json::Value) {
    let mut current = target;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = serde_json::json!({});
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i + 1 == segments.len() {
            map.insert((*segment).to_string(), new_value);
            return;
        }
        current = map
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::json!({}));
    }
}

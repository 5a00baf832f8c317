//! Label codec
//!
//! GCP label values only allow lowercase letters, digits, `_` and `-`, so the
//! RFC3339 timestamps in the first-seen and expire-after markers are stored as
//! e.g. `2024-05-01t10_00_00z` and decoded back before the engine sees them.

use crate::filter::EXPIRE_AFTER_TAG_KEY;
use crate::first_seen::{parse_first_seen, FIRST_SEEN_TAG_KEY};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Label keys whose values are encoded timestamps
const TIMESTAMP_KEYS: [&str; 2] = [FIRST_SEEN_TAG_KEY, EXPIRE_AFTER_TAG_KEY];

/// Encode an RFC3339 (seconds precision, `Z`) timestamp as a label value
pub fn encode_timestamp(rfc3339: &str) -> String {
    rfc3339.to_ascii_lowercase().replace(':', "_")
}

/// Decode a label value written by [`encode_timestamp`]; `None` if it does
/// not decode to a valid timestamp
pub fn decode_timestamp(label: &str) -> Option<String> {
    let decoded = label.to_ascii_uppercase().replace('_', ":");
    parse_first_seen(&decoded).map(|_| decoded)
}

/// Labels of a GCP resource as engine tags, with the timestamp markers
/// decoded back to RFC3339
pub fn labels_to_tags(labels: Option<&Value>) -> HashMap<String, String> {
    let mut tags: HashMap<String, String> = labels
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    // Undecodable values pass through so the engine reports them
    for key in TIMESTAMP_KEYS {
        if let Some(decoded) = tags.get(key).and_then(|raw| decode_timestamp(raw)) {
            tags.insert(key.to_string(), decoded);
        }
    }

    tags
}

/// Engine tags as a GCP `labels` object, encoding the timestamp markers
pub fn tags_to_labels(tags: &HashMap<String, String>) -> Value {
    let labels: Map<String, Value> = tags
        .iter()
        .map(|(k, v)| {
            let value = if TIMESTAMP_KEYS.contains(&k.as_str()) {
                encode_timestamp(v)
            } else {
                v.clone()
            };
            (k.clone(), Value::String(value))
        })
        .collect();
    Value::Object(labels)
}

//! Object flattening.
//!
//! Flattening turns a JSON tree into the deduplicated, sorted list of
//! `(field name, leaf value)` pairs it contains. List elements inherit the
//! field name of the enclosing list. The flattened form feeds the store's
//! auxiliary search index and the in-memory condition matcher.

use serde_json::Value;

/// Flattens a JSON object into its `(field name, value)` leaf pairs.
///
/// The result is sorted by field name, then by the JSON rendering of the
/// value, so structurally equal objects always flatten identically.
pub fn flatten_object(obj: &Value) -> Vec<(String, Value)> {
    let mut pairs = Vec::new();
    collect(obj, None, &mut pairs);
    pairs.sort_by_cached_key(|(name, value)| (name.clone(), value.to_string()));
    pairs.dedup();
    pairs
}

fn collect(value: &Value, field: Option<&str>, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, item) in map {
                collect(item, Some(key), out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, field, out);
            }
        }
        leaf => {
            if let Some(name) = field {
                out.push((name.to_string(), leaf.clone()));
            }
        }
    }
}

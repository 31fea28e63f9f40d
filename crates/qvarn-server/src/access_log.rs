//! Access log entry construction.
//!
//! When the access log is enabled, every successful operation on an
//! ordinary resource appends `access` resources recording who touched
//! what. Identities come from the request's token headers; the `Qvarn-Why`
//! header lets callers attach a reason.

use axum::http::HeaderMap;
use serde_json::{Value, json};

use qvarn_core::current_timestamp;

use crate::token::accessors_from_headers;

/// Resource ids per access entry; longer lists are split.
const MAX_IDS_PER_ENTRY: usize = 40;

const WHY_HEADER: &str = "Qvarn-Why";

/// Operations on these types are bookkeeping and are never logged.
const EXCLUDED_TYPES: &[&str] = &["access", "notification", "listener", "resource_type"];

pub fn is_excluded(resource_type: &str) -> bool {
    EXCLUDED_TYPES.contains(&resource_type)
}

/// Builds the access entries for one operation, chunking the ids.
pub fn build_entries(
    ids: &[String],
    revision: Option<&str>,
    resource_type: &str,
    operation: &str,
    headers: &HeaderMap,
) -> Vec<Value> {
    let accessors = accessors_from_headers(headers);
    let why = headers
        .get(WHY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(Value::from)
        .unwrap_or(Value::Null);

    let mut chunks: Vec<&[String]> = ids.chunks(MAX_IDS_PER_ENTRY).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }

    chunks
        .into_iter()
        .map(|chunk| {
            json!({
                "type": "access",
                "resource_type": resource_type,
                "resource_ids": chunk,
                "resource_revision": revision,
                "operation": operation,
                "accessors": accessors,
                "why": why,
                "timestamp": current_timestamp(),
            })
        })
        .collect()
}

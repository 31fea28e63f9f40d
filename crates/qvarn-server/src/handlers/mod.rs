//! Request handlers, one module per route family.

pub mod allow;
pub mod listener;
pub mod resource;
pub mod subresource;
pub mod version;

use axum::body::Bytes;
use axum::http::{HeaderMap, header};
use serde_json::Value;

use qvarn_storage::StoreTransaction;

use crate::error::ApiError;

/// Parses a JSON request body, insisting on `application/json`.
pub(crate) fn json_body(headers: &HeaderMap, body: &Bytes) -> Result<Value, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return Err(ApiError::NotJson(content_type.to_string()));
    }
    serde_json::from_slice(body).map_err(|err| ApiError::NotJson(format!("malformed body: {err}")))
}

/// Commits the transaction when the handler body succeeded, rolls it back
/// otherwise. Exactly one of the two happens.
pub(crate) async fn finish<T>(
    tx: Box<dyn StoreTransaction>,
    result: Result<T, ApiError>,
) -> Result<T, ApiError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

/// The ids inside a `{"resources": [{"id": ...}, ...]}` body.
pub(crate) fn resource_ids(body: &Value) -> Vec<String> {
    body.get("resources")
        .and_then(Value::as_array)
        .map(|resources| {
            resources
                .iter()
                .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn json_str(obj: &Value, field: &str) -> String {
    obj.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

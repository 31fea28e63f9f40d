//! The unauthenticated `/version` route.

use axum::Json;
use axum::response::IntoResponse;
use serde_json::json;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn version() -> impl IntoResponse {
    Json(json!({
        "api": {
            "version": VERSION,
        },
        "implementation": {
            "name": "Qvarn",
            "version": VERSION,
        },
    }))
}

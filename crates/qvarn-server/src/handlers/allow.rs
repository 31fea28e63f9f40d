//! Handlers for the global `/allow` rule management routes.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

use qvarn_auth::AllowRule;

use crate::error::ApiError;
use crate::handlers::{finish, json_body};
use crate::routes::AppState;

pub async fn add_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let rule = parse_rule(&headers, &body)?;
    let mut tx = state.api.transaction().await?;
    let result = tx.add_allow_rule(&rule).await.map_err(ApiError::from);
    finish(tx, result).await?;
    Ok(Json(Value::Null).into_response())
}

pub async fn check_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let rule = parse_rule(&headers, &body)?;
    let mut tx = state.api.transaction().await?;
    let result = tx.has_allow_rule(&rule).await.map_err(ApiError::from);
    let found = finish(tx, result).await?;
    if found {
        Ok(Json(Value::Null).into_response())
    } else {
        Err(ApiError::NotFound("no such allow rule".to_string()))
    }
}

pub async fn remove_rule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let rule = parse_rule(&headers, &body)?;
    let mut tx = state.api.transaction().await?;
    let result = tx.remove_allow_rule(&rule).await.map_err(ApiError::from);
    finish(tx, result).await?;
    Ok(Json(Value::Null).into_response())
}

fn parse_rule(headers: &HeaderMap, body: &Bytes) -> Result<AllowRule, ApiError> {
    let value = json_body(headers, body)?;
    serde_json::from_value(value)
        .map_err(|err| ApiError::BadRequest(format!("malformed allow rule: {err}")))
}

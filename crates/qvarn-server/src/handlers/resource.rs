//! Handlers for the per-type resource routes.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use qvarn_auth::Claims;
use qvarn_notifications::ResourceChange;

use crate::error::ApiError;
use crate::handlers::{finish, json_body, json_str, resource_ids};
use crate::routes::AppState;
use crate::token::access_params;

pub async fn list(
    State(state): State<AppState>,
    Path(type_path): Path<String>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());
        let body = coll.list(tx.as_mut(), &params).await?;
        let ids = resource_ids(&body);
        api.log_access(tx.as_mut(), &ids, None, rt.type_name(), "GET", &headers)
            .await?;
        Ok(body)
    }
    .await;
    let body = finish(tx, result).await?;
    Ok(Json(body).into_response())
}

pub async fn get(
    State(state): State<AppState>,
    Path((type_path, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());
        let obj = coll.get(tx.as_mut(), &id, &params).await?;
        let revision = json_str(&obj, "revision");
        api.log_access(
            tx.as_mut(),
            &[id.clone()],
            Some(&revision),
            rt.type_name(),
            "GET",
            &headers,
        )
        .await?;
        Ok(obj)
    }
    .await;
    let obj = finish(tx, result).await?;
    Ok(Json(obj).into_response())
}

pub async fn create(
    State(state): State<AppState>,
    Path(type_path): Path<String>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut obj = json_body(&headers, &body)?;

    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        if rt.type_name() == "access" {
            // The access log is written by the server, never by clients.
            return Err(ApiError::NotFound(format!("no POST route for /{type_path}")));
        }
        let coll = api.collection(Arc::clone(&rt));

        if obj.get("type").is_none() {
            obj["type"] = json!(rt.type_name());
        }

        let created = if claims.may_set_meta_fields() {
            coll.post_with_id(tx.as_mut(), &obj).await?
        } else {
            coll.post(tx.as_mut(), &obj).await?
        };

        let id = json_str(&created, "id");
        let revision = json_str(&created, "revision");
        api.notify(
            tx.as_mut(),
            rt.type_name(),
            &id,
            Some(&revision),
            ResourceChange::Created,
        )
        .await?;
        api.log_access(
            tx.as_mut(),
            &[id.clone()],
            Some(&revision),
            rt.type_name(),
            "POST",
            &headers,
        )
        .await?;

        let location = format!("{}{}/{}", api.baseurl(), rt.path(), id);
        Ok((created, location))
    }
    .await;

    let (created, location) = finish(tx, result).await?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION.as_str(), location)],
        Json(created),
    )
        .into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Path((type_path, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut obj = json_body(&headers, &body)?;

    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        if rt.type_name() == "access" {
            return Err(ApiError::NotFound(format!("no PUT route for /{type_path}")));
        }
        let coll = api.collection(Arc::clone(&rt));

        if obj.get("type").is_none() {
            obj["type"] = json!(rt.type_name());
        }
        if obj.get("id").is_none() {
            obj["id"] = json!(id);
        }
        if obj.get("id").and_then(Value::as_str) != Some(id.as_str()) {
            return Err(ApiError::IdMismatch {
                body_id: json_str(&obj, "id"),
                path_id: id.clone(),
            });
        }

        let params = access_params(&method, &claims, &headers, rt.type_name());
        let updated = coll.put(tx.as_mut(), &obj, &params).await?;

        let revision = json_str(&updated, "revision");
        api.notify(
            tx.as_mut(),
            rt.type_name(),
            &id,
            Some(&revision),
            ResourceChange::Updated,
        )
        .await?;
        api.log_access(
            tx.as_mut(),
            &[id.clone()],
            Some(&revision),
            rt.type_name(),
            "PUT",
            &headers,
        )
        .await?;
        Ok(updated)
    }
    .await;

    let updated = finish(tx, result).await?;
    Ok(Json(updated).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    Path((type_path, id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());

        coll.delete(tx.as_mut(), &id, &params).await?;
        api.notify(tx.as_mut(), rt.type_name(), &id, None, ResourceChange::Deleted)
            .await?;
        api.log_access(
            tx.as_mut(),
            &[id.clone()],
            None,
            rt.type_name(),
            "DELETE",
            &headers,
        )
        .await?;
        Ok(())
    }
    .await;

    finish(tx, result).await?;
    Ok(Json(json!({})).into_response())
}

pub async fn search(
    State(state): State<AppState>,
    Path((type_path, _criteria)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Take the criteria from the raw request path so percent-encoded
    // slashes survive until the parser decodes each word itself.
    let criteria = uri
        .path()
        .split_once("/search/")
        .map(|(_, criteria)| criteria)
        .unwrap_or("")
        .to_string();

    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());
        let results = coll.search(tx.as_mut(), &criteria, &params).await?;

        let ids: Vec<String> = results
            .iter()
            .map(|obj| json_str(obj, "id"))
            .filter(|id| !id.is_empty())
            .collect();
        api.log_access(tx.as_mut(), &ids, None, rt.type_name(), "SEARCH", &headers)
            .await?;
        Ok(results)
    }
    .await;

    let results = finish(tx, result).await?;
    Ok(Json(json!({ "resources": results })).into_response())
}

//! Handlers for the listener and notification routes nested under each
//! resource type's path.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use qvarn_auth::Claims;
use qvarn_search::Condition;
use qvarn_storage::{ObjectKeys, keys};

use crate::error::ApiError;
use crate::handlers::{finish, json_body, json_str, resource_ids};
use crate::routes::AppState;
use crate::token::access_params;

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
        let listeners = api.listener_collection(tx.as_mut()).await?;

        if obj.get("type").is_none() {
            obj["type"] = json!("listener");
        }

        let watched_type = rt.type_name();
        if let Some(declared) = obj.get("listen_on_type").and_then(Value::as_str) {
            if declared != watched_type {
                return Err(ApiError::BadRequest(format!(
                    "listen_on_type does not have value {watched_type}"
                )));
            }
        }
        obj["listen_on_type"] = json!(watched_type);

        let created = if claims.may_set_meta_fields() {
            listeners.post_with_id(tx.as_mut(), &obj).await?
        } else {
            listeners.post(tx.as_mut(), &obj).await?
        };

        let location = format!(
            "{}{}/listeners/{}",
            api.baseurl(),
            rt.path(),
            json_str(&created, "id")
        );
        tracing::debug!(%location, "created listener");
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
        let listeners = api.listener_collection(tx.as_mut()).await?;
        let params = access_params(&method, &claims, &headers, "listener");

        // Only the listeners watching this route's type belong here.
        let all = listeners.list(tx.as_mut(), &params).await?;
        let mut kept = Vec::new();
        for listener_id in resource_ids(&all) {
            let listener = listeners.get(tx.as_mut(), &listener_id, &params).await?;
            if listener.get("listen_on_type").and_then(Value::as_str) == Some(rt.type_name()) {
                kept.push(json!({"id": listener_id}));
            }
        }
        Ok(json!({ "resources": kept }))
    }
    .await;

    let body = finish(tx, result).await?;
    Ok(Json(body).into_response())
}

pub async fn get(
    State(state): State<AppState>,
    Path((_type_path, listener_id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let listeners = api.listener_collection(tx.as_mut()).await?;
        let params = access_params(&method, &claims, &headers, "listener");
        let listener = listeners.get(tx.as_mut(), &listener_id, &params).await?;
        Ok(listener)
    }
    .await;

    let listener = finish(tx, result).await?;
    Ok(Json(listener).into_response())
}

pub async fn update(
    State(state): State<AppState>,
    Path((_type_path, listener_id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut obj = json_body(&headers, &body)?;

    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let listeners = api.listener_collection(tx.as_mut()).await?;
        let params = access_params(&method, &claims, &headers, "listener");

        if obj.get("type").is_none() {
            obj["type"] = json!("listener");
        }
        if obj.get("id").is_none() {
            obj["id"] = json!(listener_id);
        }

        let updated = listeners.put(tx.as_mut(), &obj, &params).await?;
        Ok(updated)
    }
    .await;

    let updated = finish(tx, result).await?;
    Ok(Json(updated).into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    Path((_type_path, listener_id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let listeners = api.listener_collection(tx.as_mut()).await?;
        let params = access_params(&method, &claims, &headers, "listener");

        listeners.delete(tx.as_mut(), &listener_id, &params).await?;

        // A listener's notifications die with it.
        for obj_id in notification_ids(tx.as_mut(), &listener_id, None).await? {
            tx.remove_objects(&keys(&[("obj_id", &obj_id)])).await?;
        }
        Ok(())
    }
    .await;

    finish(tx, result).await?;
    Ok(Json(json!({})).into_response())
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path((_type_path, listener_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let cond = notification_cond(&listener_id, None);
        let mut pairs = tx
            .get_matches(Some(&cond), None, &ObjectKeys::new())
            .await?;
        // Ordered delivery: oldest first.
        pairs.sort_by_cached_key(|(_, obj)| json_str(obj, "timestamp"));
        let resources: Vec<Value> = pairs
            .iter()
            .filter_map(|(got, _)| got.get("obj_id"))
            .map(|obj_id| json!({"id": obj_id}))
            .collect();
        Ok(json!({ "resources": resources }))
    }
    .await;

    let body = finish(tx, result).await?;
    Ok(Json(body).into_response())
}

pub async fn create_notification(
    State(state): State<AppState>,
    Path((_type_path, listener_id)): Path<(String, String)>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Notifications are normally written by the server itself; only
    // privileged clients may inject them.
    if !claims.may_set_meta_fields() {
        return Err(ApiError::Forbidden);
    }
    let mut obj = json_body(&headers, &body)?;

    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        if obj.get("type").is_none() {
            obj["type"] = json!("notification");
        }
        if obj.get("listener_id").is_none() {
            obj["listener_id"] = json!(listener_id);
        }

        let rt = api.resource_type_named(tx.as_mut(), "notification").await?;
        let notifications = api.collection(rt);
        let created = notifications.post_with_id(tx.as_mut(), &obj).await?;
        Ok(created)
    }
    .await;

    let created = finish(tx, result).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn get_notification(
    State(state): State<AppState>,
    Path((_type_path, listener_id, notification_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let cond = notification_cond(&listener_id, Some(&notification_id));
        let pairs = tx
            .get_matches(Some(&cond), None, &ObjectKeys::new())
            .await?;
        if pairs.len() > 1 {
            return Err(ApiError::TooManyResources(notification_id.clone()));
        }
        pairs
            .into_iter()
            .next()
            .map(|(_, obj)| obj)
            .ok_or_else(|| ApiError::NotFound(format!("no notification {notification_id}")))
    }
    .await;

    let notification = finish(tx, result).await?;
    Ok(Json(notification).into_response())
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path((_type_path, listener_id, notification_id)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        for obj_id in notification_ids(tx.as_mut(), &listener_id, Some(&notification_id)).await? {
            tx.remove_objects(&keys(&[("obj_id", &obj_id)])).await?;
        }
        Ok(())
    }
    .await;

    finish(tx, result).await?;
    Ok(Json(json!({})).into_response())
}

fn notification_cond(listener_id: &str, notification_id: Option<&str>) -> Condition {
    let mut conds = vec![
        Condition::ResourceTypeIs("notification".to_string()),
        Condition::equal("listener_id", listener_id),
    ];
    if let Some(notification_id) = notification_id {
        conds.push(Condition::equal("id", notification_id));
    }
    Condition::all(conds)
}

async fn notification_ids(
    tx: &mut dyn qvarn_storage::StoreTransaction,
    listener_id: &str,
    notification_id: Option<&str>,
) -> Result<Vec<String>, ApiError> {
    let cond = notification_cond(listener_id, notification_id);
    let pairs = tx
        .get_matches(Some(&cond), None, &ObjectKeys::new())
        .await?;
    Ok(pairs
        .iter()
        .filter_map(|(got, _)| got.get("obj_id"))
        .cloned()
        .collect())
}

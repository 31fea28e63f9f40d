//! Handlers for sub-resource and file sub-path routes.
//!
//! One route pattern serves both: the resource type declares which of its
//! sub-paths hold files, and the handlers dispatch on that. JSON
//! sub-resources carry their revision in the body; files carry it in the
//! `Revision` header and answer with the stored `content_type`.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use qvarn_auth::Claims;
use qvarn_core::validate_subresource;
use qvarn_storage::keys;

use crate::collection::CollectionError;
use crate::error::ApiError;
use crate::handlers::{finish, json_body, json_str};
use crate::routes::AppState;
use crate::token::access_params;

const REVISION_HEADER: &str = "Revision";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub async fn get(
    State(state): State<AppState>,
    Path((type_path, id, subpath)): Path<(String, String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        if rt.subprototype(&subpath).is_none() {
            return Err(ApiError::NotFound(format!(
                "no route for /{type_path}/{id}/{subpath}"
            )));
        }
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());

        if rt.is_file(&subpath) {
            let obj = coll.get(tx.as_mut(), &id, &params).await?;
            let sub = coll
                .get_subresource(tx.as_mut(), &id, &subpath, &params)
                .await?;
            let blob = tx
                .get_blob(&subpath, &keys(&[("obj_id", &id)]))
                .await
                .map_err(CollectionError::from)?;
            let content_type = match sub.get("content_type").and_then(Value::as_str) {
                Some(ct) if !ct.is_empty() => ct.to_string(),
                _ => FALLBACK_CONTENT_TYPE.to_string(),
            };
            Ok(FetchOutcome::File {
                blob,
                content_type,
                revision: json_str(&obj, "revision"),
            })
        } else {
            let sub = coll
                .get_subresource(tx.as_mut(), &id, &subpath, &params)
                .await?;
            Ok(FetchOutcome::Json(sub))
        }
    }
    .await;

    match finish(tx, result).await? {
        FetchOutcome::Json(sub) => Ok(Json(sub).into_response()),
        FetchOutcome::File {
            blob,
            content_type,
            revision,
        } => Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE.as_str(), content_type),
                (REVISION_HEADER, revision),
            ],
            blob,
        )
            .into_response()),
    }
}

enum FetchOutcome {
    Json(Value),
    File {
        blob: Vec<u8>,
        content_type: String,
        revision: String,
    },
}

enum PutOutcome {
    Json(Value),
    File { revision: String },
}

pub async fn put(
    State(state): State<AppState>,
    Path((type_path, id, subpath)): Path<(String, String, String)>,
    Extension(claims): Extension<Claims>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let api = &state.api;
    let mut tx = api.transaction().await?;
    let result = async {
        let rt = api.resource_type_for_segment(tx.as_mut(), &type_path).await?;
        if rt.subprototype(&subpath).is_none() {
            return Err(ApiError::NotFound(format!(
                "no route for /{type_path}/{id}/{subpath}"
            )));
        }
        let coll = api.collection(Arc::clone(&rt));
        let params = access_params(&method, &claims, &headers, rt.type_name());

        if rt.is_file(&subpath) {
            let revision = headers
                .get(REVISION_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or(FALLBACK_CONTENT_TYPE)
                .to_string();

            let obj = coll.get(tx.as_mut(), &id, &params).await?;
            let current = json_str(&obj, "revision");
            if current != revision {
                tracing::debug!(
                    revision_from_client = %revision,
                    current_revision = %current,
                    "client gave wrong revision for file write"
                );
                return Err(CollectionError::WrongRevision {
                    got: revision,
                    expected: current,
                }
                .into());
            }

            let mut sub = coll
                .get_subresource(tx.as_mut(), &id, &subpath, &params)
                .await?;
            sub["content_type"] = json!(content_type);

            // The set_meta_fields capability writes files without bumping
            // the base revision.
            let new_revision = if claims.may_set_meta_fields() {
                coll.put_subresource_no_new_revision(
                    tx.as_mut(),
                    &sub,
                    &subpath,
                    &id,
                    &revision,
                    &params,
                )
                .await?;
                revision
            } else {
                let new_sub = coll
                    .put_subresource(tx.as_mut(), &sub, &subpath, &id, &revision, &params)
                    .await?;
                json_str(&new_sub, "revision")
            };

            let blob_keys = keys(&[("obj_id", &id)]);
            tx.remove_blob(&subpath, &blob_keys)
                .await
                .map_err(CollectionError::from)?;
            tx.create_blob(&body, &subpath, &blob_keys)
                .await
                .map_err(CollectionError::from)?;

            Ok(PutOutcome::File {
                revision: new_revision,
            })
        } else {
            let mut sub_obj = json_body(&headers, &body)?;
            let revision = match sub_obj
                .as_object_mut()
                .and_then(|map| map.remove("revision"))
                .and_then(|value| value.as_str().map(str::to_string))
            {
                Some(revision) => revision,
                None => {
                    return Err(ApiError::BadRequest(
                        "sub-resource must have revision".into(),
                    ));
                }
            };

            validate_subresource(&subpath, &rt, &sub_obj).map_err(CollectionError::from)?;

            let updated = coll
                .put_subresource(tx.as_mut(), &sub_obj, &subpath, &id, &revision, &params)
                .await?;
            Ok(PutOutcome::Json(updated))
        }
    }
    .await;

    match finish(tx, result).await? {
        PutOutcome::Json(sub) => Ok(Json(sub).into_response()),
        PutOutcome::File { revision } => Ok((
            StatusCode::OK,
            [(REVISION_HEADER, revision)],
            String::new(),
        )
            .into_response()),
    }
}

//! The HTTP error mapping.
//!
//! Every error kind the core produces crosses the boundary here, and this
//! is the only place that knows which status code a kind maps to. Search
//! errors get the JSON `{message, error_code}` bodies clients switch on;
//! everything else is a plain-text diagnostic.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use qvarn_core::ResourceTypeError;
use qvarn_search::SearchError;
use qvarn_storage::StoreError;

use crate::collection::CollectionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no resource type for path {0}")]
    NoSuchResourceType(String),

    #[error("too many resource types for {0}")]
    TooManyResourceTypes(String),

    #[error("too many resources with id {0}")]
    TooManyResources(String),

    #[error("was expecting application/json, not {0}")]
    NotJson(String),

    #[error("resource has id {body_id} but path says {path_id}")]
    IdMismatch { body_id: String, path_id: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("access denied")]
    Forbidden,

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ResourceType(#[from] ResourceTypeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Collection(CollectionError::Search(err)) => search_error_response(err),
            Self::Collection(CollectionError::UnknownSearchField { field }) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "field": field,
                    "message": "Resource does not contain given field",
                    "error_code": "FieldNotInResource",
                })),
            )
                .into_response(),
            Self::Collection(CollectionError::NoSearchCriteria) => {
                text_response(StatusCode::BAD_REQUEST, &self)
            }
            Self::Collection(CollectionError::Validation(_)) => {
                text_response(StatusCode::BAD_REQUEST, &self)
            }
            Self::Collection(CollectionError::WrongRevision { .. }) => {
                text_response(StatusCode::CONFLICT, &self)
            }
            Self::Collection(CollectionError::NoSuchResource { .. }) => {
                text_response(StatusCode::NOT_FOUND, &self)
            }
            Self::Collection(CollectionError::Store(err)) => store_response(err, &self),
            Self::Store(err) => store_response(err, &self),
            Self::NoSuchResourceType(_) | Self::NotFound(_) => {
                text_response(StatusCode::NOT_FOUND, &self)
            }
            Self::NotJson(_) | Self::IdMismatch { .. } | Self::BadRequest(_) => {
                text_response(StatusCode::BAD_REQUEST, &self)
            }
            Self::Unauthorized => text_response(StatusCode::UNAUTHORIZED, &self),
            Self::Forbidden => text_response(StatusCode::FORBIDDEN, &self),
            Self::TooManyResourceTypes(_) | Self::TooManyResources(_) | Self::ResourceType(_) => {
                internal_response(&self)
            }
        }
    }
}

fn search_error_response(err: &SearchError) -> Response {
    let body = if err.is_need_sort() {
        json!({
            "message": "LIMIT and OFFSET can only be used together with SORT.",
            "error_code": "LimitWithoutSortError",
        })
    } else {
        json!({
            "message": "Could not parse search condition",
            "error_code": "BadSearchCondition",
        })
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn store_response(err: &StoreError, outer: &ApiError) -> Response {
    if err.is_no_such_object() {
        text_response(StatusCode::NOT_FOUND, outer)
    } else {
        internal_response(outer)
    }
}

fn text_response(status: StatusCode, err: &ApiError) -> Response {
    tracing::debug!(%err, status = status.as_u16(), "request failed");
    (status, err.to_string()).into_response()
}

fn internal_response(err: &ApiError) -> Response {
    tracing::error!(%err, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()).into_response()
}

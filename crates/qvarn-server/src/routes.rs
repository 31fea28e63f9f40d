//! Route synthesis.
//!
//! Rather than registering one route set per resource type, the router is
//! a single generic set of patterns; handlers resolve the first path
//! segment through the API's resource type registry and get a 404 for
//! paths no type claims. Static segments (`search`, `listeners`) win over
//! captures, so the listener and search routes shadow the generic id
//! routes exactly as the per-type route tables did. `/version` is the one
//! route served without a token.

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::api::QvarnApi;
use crate::handlers::{allow, listener, resource, subresource, version};
use crate::token::{TokenVerifier, authenticate};

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<QvarnApi>,
    pub verifier: Arc<TokenVerifier>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/allow",
            axum::routing::post(allow::add_rule)
                .get(allow::check_rule)
                .delete(allow::remove_rule),
        )
        .route(
            "/{type_path}",
            get(resource::list).post(resource::create),
        )
        .route("/{type_path}/search/{*criteria}", get(resource::search))
        .route(
            "/{type_path}/listeners",
            get(listener::list).post(listener::create),
        )
        .route(
            "/{type_path}/listeners/{listener_id}",
            get(listener::get)
                .put(listener::update)
                .delete(listener::delete),
        )
        .route(
            "/{type_path}/listeners/{listener_id}/notifications",
            get(listener::list_notifications).post(listener::create_notification),
        )
        .route(
            "/{type_path}/listeners/{listener_id}/notifications/{notification_id}",
            get(listener::get_notification).delete(listener::delete_notification),
        )
        .route(
            "/{type_path}/{id}",
            get(resource::get)
                .put(resource::update)
                .delete(resource::delete),
        )
        .route(
            "/{type_path}/{id}/{subpath}",
            get(subresource::get).put(subresource::put),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ));

    Router::new()
        .route("/version", get(version::version))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

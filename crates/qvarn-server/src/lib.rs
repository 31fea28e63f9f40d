//! The Qvarn HTTP server.
//!
//! This crate binds the other pieces together: the collection manager on
//! top of the object store, the REST route set synthesized for every known
//! resource type, the bearer-token boundary, the notification fan-out and
//! the access log. The `qvarn-server` binary lives here too.

pub mod access_log;
pub mod api;
pub mod bootstrap;
pub mod collection;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod token;

pub use api::QvarnApi;
pub use collection::{Collection, CollectionError};
pub use self::config::{AppConfig, ServerConfig, TokenConfig, init_tracing};
pub use error::ApiError;
pub use routes::AppState;
pub use server::{build_app, run};

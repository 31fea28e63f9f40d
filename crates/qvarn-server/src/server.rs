//! Server assembly and startup.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;

use qvarn_db_postgres::PostgresObjectStore;
use qvarn_storage::{KeySchema, KeyType, MemoryObjectStore, ObjectStore};

use crate::api::QvarnApi;
use crate::bootstrap;
use crate::config::AppConfig;
use crate::routes::{AppState, build_router};
use crate::token::TokenVerifier;

/// Builds the application: store, bootstrap, token boundary, routes.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Router> {
    let schema = KeySchema::new(&[("obj_id", KeyType::Str), ("subpath", KeyType::Str)])
        .context("declaring store keys")?;

    let store: Arc<dyn ObjectStore> = if config.memory_database {
        let store = MemoryObjectStore::new(schema);
        if config.enable_fine_grained_access_control {
            Arc::new(store.with_fine_grained_access_control())
        } else {
            Arc::new(store)
        }
    } else {
        let database = config
            .database
            .as_ref()
            .context("database configuration missing")?;
        let store = PostgresObjectStore::new(database, schema)
            .await
            .context("opening PostgreSQL store")?;
        if config.enable_fine_grained_access_control {
            Arc::new(store.with_fine_grained_access_control())
        } else {
            Arc::new(store)
        }
    };
    tracing::info!(
        enabled = store.fine_grained_access_control(),
        "fine-grained access control"
    );

    let api = Arc::new(QvarnApi::new(
        Arc::clone(&store),
        config.baseurl.clone(),
        config.enable_access_log,
    ));
    bootstrap::install_resource_types(&api, config.resource_type_dir.as_deref())
        .await
        .context("installing resource types")?;

    let verifier = match &config.token {
        Some(token) => TokenVerifier::new(token).context("loading token public key")?,
        None => {
            tracing::warn!("no token configuration, running without token verification");
            TokenVerifier::disabled()
        }
    };

    Ok(build_router(AppState {
        api,
        verifier: Arc::new(verifier),
    }))
}

/// Validates the configuration, builds the application and serves it.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    config
        .validate()
        .map_err(|message| anyhow::anyhow!(message))?;

    let app = build_app(&config).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!(%addr, "qvarn server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

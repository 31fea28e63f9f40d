//! Connection pool management for the PostgreSQL backend.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use qvarn_storage::StoreError;

use crate::config::{DatabaseConfig, mask_password};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

/// Creates a connection pool from the given configuration.
#[instrument(skip(config), fields(url = %mask_password(&config.url())))]
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    info!(
        min_conn = config.min_conn,
        max_conn = config.max_conn,
        connect_timeout_ms = config.connect_timeout_ms,
        "creating PostgreSQL connection pool"
    );

    let options = PgPoolOptions::new()
        .max_connections(config.max_conn.max(1))
        .min_connections(config.min_conn)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .test_before_acquire(false);

    let pool = options
        .connect(&config.url())
        .await
        .map_err(|e| StoreError::connection(e.to_string()))?;

    debug!("PostgreSQL connection pool created");

    Ok(pool)
}

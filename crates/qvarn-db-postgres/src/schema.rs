//! Table and index creation.
//!
//! Run once when the store is opened. Every statement is idempotent, so
//! several server instances racing at startup converge on the same layout.

use sqlx_core::query::query;
use sqlx_postgres::PgPool;
use tracing::debug;

use qvarn_storage::{KeySchema, StoreError};

pub const OBJECTS_TABLE: &str = "_objects";
pub const AUX_TABLE: &str = "_aux";
pub const BLOBS_TABLE: &str = "_blobs";
pub const ALLOW_TABLE: &str = "_allow";

const ALLOW_COLUMNS: &[&str] = &[
    "method",
    "client_id",
    "user_id",
    "subpath",
    "resource_id",
    "resource_type",
    "resource_field",
    "resource_value",
];

/// Creates the tables and indexes for a store with the given key schema.
pub async fn create_store(pool: &PgPool, schema: &KeySchema) -> Result<(), StoreError> {
    for statement in ddl_statements(schema) {
        debug!(%statement, "creating store schema");
        query(&statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::backend(format!("schema creation failed: {e}")))?;
    }
    Ok(())
}

fn ddl_statements(schema: &KeySchema) -> Vec<String> {
    let key_columns: Vec<String> = schema
        .names()
        .iter()
        .map(|name| format!("{name} TEXT"))
        .collect();
    let key_columns = key_columns.join(", ");

    let mut statements = vec![
        format!("CREATE TABLE IF NOT EXISTS {OBJECTS_TABLE} ({key_columns}, body JSONB)"),
        format!("CREATE TABLE IF NOT EXISTS {AUX_TABLE} ({key_columns}, field JSONB)"),
        format!("CREATE TABLE IF NOT EXISTS {BLOBS_TABLE} ({key_columns}, payload BYTEA)"),
        format!(
            "CREATE TABLE IF NOT EXISTS {ALLOW_TABLE} ({})",
            ALLOW_COLUMNS
                .iter()
                .map(|column| format!("{column} TEXT"))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ];

    // B-tree indexes on each declared key column.
    for table in [OBJECTS_TABLE, AUX_TABLE, BLOBS_TABLE] {
        for key in schema.names() {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {table}_{key}_idx ON {table} ({key})"
            ));
        }
    }

    // Expression indexes the search query probes.
    for field in ["name", "value"] {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {AUX_TABLE}_field_{field}_idx \
             ON {AUX_TABLE} (lower(field ->> '{field}'))"
        ));
    }

    for column in ["method", "client_id", "user_id"] {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {ALLOW_TABLE}_{column}_idx ON {ALLOW_TABLE} ({column})"
        ));
    }

    statements
}

//! The PostgreSQL implementation of the object store.

use async_trait::async_trait;
use sqlx_postgres::PgPool;

use qvarn_storage::{KeySchema, ObjectStore, StoreError, StoreTransaction};

use crate::config::DatabaseConfig;
use crate::pool;
use crate::schema;
use crate::transaction::PostgresTransaction;

/// An object store persisted in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresObjectStore {
    pool: PgPool,
    schema: KeySchema,
    fine_grained: bool,
}

impl PostgresObjectStore {
    /// Opens the store: creates the connection pool and the tables and
    /// indexes for the given key schema.
    pub async fn new(config: &DatabaseConfig, schema: KeySchema) -> Result<Self, StoreError> {
        let pool = pool::create_pool(config).await?;
        schema::create_store(&pool, &schema).await?;
        Ok(Self {
            pool,
            schema,
            fine_grained: false,
        })
    }

    /// Builds a store over an existing pool. Tables are not created.
    #[must_use]
    pub fn from_pool(pool: PgPool, schema: KeySchema) -> Self {
        Self {
            pool,
            schema,
            fine_grained: false,
        }
    }

    /// Enables fine-grained access control for this store.
    #[must_use]
    pub fn with_fine_grained_access_control(mut self) -> Self {
        self.fine_grained = true;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ObjectStore for PostgresObjectStore {
    fn key_schema(&self) -> &KeySchema {
        &self.schema
    }

    fn fine_grained_access_control(&self) -> bool {
        self.fine_grained
    }

    async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::transaction(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PostgresTransaction::new(tx, self.schema.clone())))
    }
}

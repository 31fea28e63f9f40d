//! The PostgreSQL store transaction.
//!
//! Wraps one sqlx transaction. Every statement is executed through one
//! helper that also records the SQL text and wall-clock duration; the
//! batch is emitted at commit time. A handle dropped without commit rolls
//! back through sqlx, so a failed request can never leak half-written
//! state to another connection.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx_core::query::{Query, query};
use sqlx_core::row::Row;
use sqlx_postgres::{PgArguments, PgConnection, PgRow, PgTransaction, Postgres};
use tracing::{debug, warn};

use qvarn_auth::AllowRule;
use qvarn_core::flatten_object;
use qvarn_search::{Condition, SqlParam, SqlQuery, compile_lookup, compile_search};
use qvarn_storage::{KeySchema, ObjectKeys, StoreError, StoreTransaction};

use crate::schema::{ALLOW_TABLE, AUX_TABLE, BLOBS_TABLE, OBJECTS_TABLE};

const SUBPATH_KEY: &str = "subpath";

/// A bind value for one statement.
enum Bind {
    Text(String),
    OptText(Option<String>),
    Int(i64),
    Json(Value),
    Bytes(Vec<u8>),
}

impl From<SqlParam> for Bind {
    fn from(param: SqlParam) -> Self {
        match param {
            SqlParam::Text(s) => Bind::Text(s),
            SqlParam::Int(i) => Bind::Int(i),
        }
    }
}

#[derive(Debug)]
struct QueryRecord {
    sql: String,
    ms: f64,
}

pub struct PostgresTransaction {
    tx: Option<PgTransaction<'static>>,
    schema: KeySchema,
    queries: Vec<QueryRecord>,
    started: Instant,
}

impl PostgresTransaction {
    pub fn new(tx: PgTransaction<'static>, schema: KeySchema) -> Self {
        Self {
            tx: Some(tx),
            schema,
            queries: Vec::new(),
            started: Instant::now(),
        }
    }

    fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StoreError::transaction("transaction already completed"))
    }

    async fn execute(&mut self, sql: &str, binds: Vec<Bind>) -> Result<u64, StoreError> {
        let started = Instant::now();
        let result = {
            let conn = self.conn()?;
            bind_all(query(sql), binds).execute(&mut *conn).await
        };
        self.record(sql, started);
        result
            .map(|done| done.rows_affected())
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn fetch(&mut self, sql: &str, binds: Vec<Bind>) -> Result<Vec<PgRow>, StoreError> {
        let started = Instant::now();
        let result = {
            let conn = self.conn()?;
            bind_all(query(sql), binds).fetch_all(&mut *conn).await
        };
        self.record(sql, started);
        result.map_err(|e| StoreError::backend(e.to_string()))
    }

    fn record(&mut self, sql: &str, started: Instant) {
        self.queries.push(QueryRecord {
            sql: sql.to_string(),
            ms: started.elapsed().as_secs_f64() * 1000.0,
        });
    }

    fn row_keys(&self, row: &PgRow) -> Result<ObjectKeys, StoreError> {
        let mut keys = ObjectKeys::new();
        for name in self.schema.names() {
            let value: String = row
                .try_get(name.as_str())
                .map_err(|e| StoreError::backend(e.to_string()))?;
            keys.insert(name.clone(), value);
        }
        Ok(keys)
    }

    fn blob_keys(&self, subpath: &str, keys: &ObjectKeys) -> Result<ObjectKeys, StoreError> {
        let mut full = keys.clone();
        full.insert(SUBPATH_KEY.to_string(), subpath.to_string());
        self.schema.check_keys(&full)?;
        Ok(full)
    }

    async fn object_exists(&mut self, keys: &ObjectKeys) -> Result<bool, StoreError> {
        let mut binds = Vec::new();
        let check = where_keys(keys, &mut binds);
        let sql = format!("SELECT 1 FROM {OBJECTS_TABLE} WHERE {check}");
        Ok(!self.fetch(&sql, binds).await?.is_empty())
    }

    async fn run_compiled(&mut self, compiled: SqlQuery) -> Result<Vec<PgRow>, StoreError> {
        let binds = compiled.params.into_iter().map(Bind::from).collect();
        self.fetch(&compiled.text, binds).await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // sqlx rolls the inner transaction back when it is dropped.
        if self.tx.is_some() {
            warn!("store transaction dropped without commit or rollback, rolling back");
        }
    }
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::transaction("transaction already completed"))?;

        let commit_started = Instant::now();
        tx.commit()
            .await
            .map_err(|e| StoreError::transaction(format!("commit failed: {e}")))?;

        debug!(
            ms = self.started.elapsed().as_secs_f64() * 1000.0,
            commit_ms = commit_started.elapsed().as_secs_f64() * 1000.0,
            queries = ?self.queries,
            "sql transaction committed"
        );
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::transaction("transaction already completed"))?;
        tx.rollback()
            .await
            .map_err(|e| StoreError::transaction(format!("rollback failed: {e}")))?;
        debug!(queries = ?self.queries, "sql transaction rolled back");
        Ok(())
    }

    async fn create_object(
        &mut self,
        body: &Value,
        aux: bool,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        self.schema.check_complete(keys)?;

        if self.object_exists(keys).await? {
            return Err(StoreError::key_collision(keys));
        }

        let columns: Vec<&str> = keys.keys().map(String::as_str).collect();
        let insert_sql = insert_statement(OBJECTS_TABLE, &columns, "body");
        let mut binds: Vec<Bind> = keys.values().map(|v| Bind::Text(v.clone())).collect();
        binds.push(Bind::Json(body.clone()));
        self.execute(&insert_sql, binds).await?;

        if aux {
            let aux_sql = insert_statement(AUX_TABLE, &columns, "field");
            for (name, value) in flatten_object(body) {
                let mut binds: Vec<Bind> =
                    keys.values().map(|v| Bind::Text(v.clone())).collect();
                binds.push(Bind::Json(json!({"name": name, "value": value})));
                self.execute(&aux_sql, binds).await?;
            }
        }

        Ok(())
    }

    async fn remove_objects(&mut self, keys: &ObjectKeys) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        for table in [OBJECTS_TABLE, AUX_TABLE] {
            let mut binds = Vec::new();
            let check = where_keys(keys, &mut binds);
            let sql = format!("DELETE FROM {table} WHERE {check}");
            self.execute(&sql, binds).await?;
        }
        Ok(())
    }

    async fn get_matches(
        &mut self,
        cond: Option<&Condition>,
        allow: Option<&Condition>,
        keys: &ObjectKeys,
    ) -> Result<Vec<(ObjectKeys, Value)>, StoreError> {
        if cond.is_none() && keys.is_empty() {
            return Err(StoreError::NoMatchCriteria);
        }
        self.schema.check_keys(keys)?;

        let compiled = match cond {
            Some(cond) => compile_search(cond, allow, keys, self.schema.names()),
            None => compile_lookup(keys, allow, self.schema.names()),
        };

        let rows = self.run_compiled(compiled).await?;
        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let body: Value = row
                .try_get("body")
                .map_err(|e| StoreError::backend(e.to_string()))?;
            matches.push((self.row_keys(&row)?, body));
        }
        Ok(matches)
    }

    async fn create_blob(
        &mut self,
        blob: &[u8],
        subpath: &str,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError> {
        let full = self.blob_keys(subpath, keys)?;

        if !self.object_exists(&full).await? {
            return Err(StoreError::no_such_object(&full));
        }

        let mut binds = Vec::new();
        let check = where_keys(&full, &mut binds);
        let exists_sql = format!("SELECT 1 FROM {BLOBS_TABLE} WHERE {check}");
        if !self.fetch(&exists_sql, binds).await?.is_empty() {
            return Err(StoreError::blob_key_collision(&full));
        }

        let columns: Vec<&str> = full.keys().map(String::as_str).collect();
        let insert_sql = insert_statement(BLOBS_TABLE, &columns, "payload");
        let mut binds: Vec<Bind> = full.values().map(|v| Bind::Text(v.clone())).collect();
        binds.push(Bind::Bytes(blob.to_vec()));
        self.execute(&insert_sql, binds).await?;
        Ok(())
    }

    async fn get_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<Vec<u8>, StoreError> {
        let full = self.blob_keys(subpath, keys)?;
        let mut binds = Vec::new();
        let check = where_keys(&full, &mut binds);
        let sql = format!("SELECT payload FROM {BLOBS_TABLE} WHERE {check}");
        let rows = self.fetch(&sql, binds).await?;
        match rows.first() {
            Some(row) => row
                .try_get("payload")
                .map_err(|e| StoreError::backend(e.to_string())),
            None => Err(StoreError::no_such_object(&full)),
        }
    }

    async fn remove_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<(), StoreError> {
        let full = self.blob_keys(subpath, keys)?;
        let mut binds = Vec::new();
        let check = where_keys(&full, &mut binds);
        let sql = format!("DELETE FROM {BLOBS_TABLE} WHERE {check}");
        self.execute(&sql, binds).await?;
        Ok(())
    }

    async fn remove_blobs(&mut self, keys: &ObjectKeys) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        let mut binds = Vec::new();
        let check = where_keys(keys, &mut binds);
        let sql = format!("DELETE FROM {BLOBS_TABLE} WHERE {check}");
        self.execute(&sql, binds).await?;
        Ok(())
    }

    async fn get_allow_rules(&mut self) -> Result<Vec<AllowRule>, StoreError> {
        let sql = format!(
            "SELECT method, client_id, user_id, subpath, resource_id, \
             resource_type, resource_field, resource_value FROM {ALLOW_TABLE}"
        );
        let rows = self.fetch(&sql, Vec::new()).await?;
        rows.iter().map(row_to_allow_rule).collect()
    }

    async fn has_allow_rule(&mut self, rule: &AllowRule) -> Result<bool, StoreError> {
        let mut binds = Vec::new();
        let check = where_allow_rule(rule, &mut binds);
        let sql = format!("SELECT 1 FROM {ALLOW_TABLE} WHERE {check}");
        Ok(!self.fetch(&sql, binds).await?.is_empty())
    }

    async fn add_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {ALLOW_TABLE} (method, client_id, user_id, subpath, resource_id, \
             resource_type, resource_field, resource_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        let binds = vec![
            Bind::Text(rule.method.clone()),
            Bind::Text(rule.client_id.clone()),
            Bind::Text(rule.user_id.clone()),
            Bind::Text(rule.subpath.clone()),
            Bind::Text(rule.resource_id.clone()),
            Bind::OptText(rule.resource_type.clone()),
            Bind::OptText(rule.resource_field.clone()),
            Bind::OptText(rule.resource_value.clone()),
        ];
        self.execute(&sql, binds).await?;
        Ok(())
    }

    async fn remove_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError> {
        let mut binds = Vec::new();
        let check = where_allow_rule(rule, &mut binds);
        let sql = format!("DELETE FROM {ALLOW_TABLE} WHERE {check}");
        self.execute(&sql, binds).await?;
        Ok(())
    }
}

fn bind_all(
    mut statement: Query<'_, Postgres, PgArguments>,
    binds: Vec<Bind>,
) -> Query<'_, Postgres, PgArguments> {
    for bind in binds {
        statement = match bind {
            Bind::Text(value) => statement.bind(value),
            Bind::OptText(value) => statement.bind(value),
            Bind::Int(value) => statement.bind(value),
            Bind::Json(value) => statement.bind(value),
            Bind::Bytes(value) => statement.bind(value),
        };
    }
    statement
}

fn insert_statement(table: &str, key_columns: &[&str], payload_column: &str) -> String {
    let mut columns: Vec<&str> = key_columns.to_vec();
    columns.push(payload_column);
    let placeholders: Vec<String> = (1..=columns.len()).map(|n| format!("${n}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn where_keys(keys: &ObjectKeys, binds: &mut Vec<Bind>) -> String {
    if keys.is_empty() {
        return "TRUE".to_string();
    }
    keys.iter()
        .map(|(key, value)| {
            binds.push(Bind::Text(value.clone()));
            format!("{key} = ${}", binds.len())
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn where_allow_rule(rule: &AllowRule, binds: &mut Vec<Bind>) -> String {
    let fields = [
        ("method", Some(rule.method.clone())),
        ("client_id", Some(rule.client_id.clone())),
        ("user_id", Some(rule.user_id.clone())),
        ("subpath", Some(rule.subpath.clone())),
        ("resource_id", Some(rule.resource_id.clone())),
        ("resource_type", rule.resource_type.clone()),
        ("resource_field", rule.resource_field.clone()),
        ("resource_value", rule.resource_value.clone()),
    ];
    fields
        .into_iter()
        .map(|(column, value)| match value {
            Some(value) => {
                binds.push(Bind::Text(value));
                format!("{column} = ${}", binds.len())
            }
            None => format!("{column} IS NULL"),
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn row_to_allow_rule(row: &PgRow) -> Result<AllowRule, StoreError> {
    let text = |column: &str| -> Result<String, StoreError> {
        row.try_get::<Option<String>, _>(column)
            .map(Option::unwrap_or_default)
            .map_err(|e| StoreError::backend(e.to_string()))
    };
    let optional = |column: &str| -> Result<Option<String>, StoreError> {
        row.try_get(column)
            .map_err(|e| StoreError::backend(e.to_string()))
    };
    Ok(AllowRule {
        method: text("method")?,
        client_id: text("client_id")?,
        user_id: text("user_id")?,
        subpath: text("subpath")?,
        resource_id: text("resource_id")?,
        resource_type: optional("resource_type")?,
        resource_field: optional("resource_field")?,
        resource_value: optional("resource_value")?,
    })
}

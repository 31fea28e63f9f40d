//! The store and transaction traits every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use qvarn_auth::AllowRule;
use qvarn_search::Condition;

use crate::error::StoreError;
use crate::keys::{KeySchema, ObjectKeys};

/// A store of JSON objects and blobs addressed by declared keys.
///
/// Implementations must be thread-safe; all data access goes through the
/// transaction handle returned by [`ObjectStore::transaction`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// The keys this store was declared with.
    fn key_schema(&self) -> &KeySchema;

    /// Whether fine-grained access control is enabled. When it is not, the
    /// store behaves as if every allow check passed.
    fn fine_grained_access_control(&self) -> bool;

    /// Begins a transaction. The handle must be committed or rolled back;
    /// a dropped handle rolls back.
    async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One transaction against an object store.
///
/// Reads within a transaction see that transaction's prior writes. Across
/// transactions, the backend's default isolation applies.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Commits the transaction. Consumes the handle.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Rolls the transaction back. Consumes the handle.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;

    /// Stores an object under a complete key tuple.
    ///
    /// Fails with [`StoreError::KeyCollision`] if an object with the same
    /// keys exists. When `aux` is true, one auxiliary index row is written
    /// per distinct flattened `(name, value)` pair of the body.
    async fn create_object(
        &mut self,
        body: &Value,
        aux: bool,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError>;

    /// Removes every object whose keys match the (possibly partial) tuple,
    /// along with their auxiliary rows. Removing nothing is not an error.
    async fn remove_objects(&mut self, keys: &ObjectKeys) -> Result<(), StoreError>;

    /// Returns the `(keys, body)` pairs of objects whose keys match the
    /// tuple, whose body matches `cond`, and for which `allow` holds.
    ///
    /// At least one of `cond` and `keys` must be given. A missing `cond`
    /// or `allow` means "always true".
    async fn get_matches(
        &mut self,
        cond: Option<&Condition>,
        allow: Option<&Condition>,
        keys: &ObjectKeys,
    ) -> Result<Vec<(ObjectKeys, Value)>, StoreError>;

    /// Stores a blob under `keys` plus the `subpath` key. The object with
    /// those exact keys must already exist.
    async fn create_blob(
        &mut self,
        blob: &[u8],
        subpath: &str,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError>;

    /// Fetches a blob; [`StoreError::NoSuchObject`] if there is none.
    async fn get_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<Vec<u8>, StoreError>;

    /// Removes a blob if present.
    async fn remove_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<(), StoreError>;

    /// Removes every blob whose keys match the (possibly partial) tuple.
    async fn remove_blobs(&mut self, keys: &ObjectKeys) -> Result<(), StoreError>;

    async fn get_allow_rules(&mut self) -> Result<Vec<AllowRule>, StoreError>;

    async fn has_allow_rule(&mut self, rule: &AllowRule) -> Result<bool, StoreError>;

    async fn add_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError>;

    async fn remove_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError>;
}

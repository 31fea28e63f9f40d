//! The in-memory object store.
//!
//! Data lives in plain vectors behind one async mutex. A transaction takes
//! the lock for its whole lifetime and keeps a snapshot of the state it
//! started from; commit keeps the mutations, rollback (or dropping the
//! handle) restores the snapshot. Transactions therefore serialize, which
//! is exactly what the tests this backend exists for want.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use qvarn_auth::AllowRule;
use qvarn_search::Condition;

use crate::error::StoreError;
use crate::keys::{KeySchema, ObjectKeys, keys_match};
use crate::traits::{ObjectStore, StoreTransaction};

const SUBPATH_KEY: &str = "subpath";

#[derive(Debug, Clone, Default)]
struct MemoryState {
    objects: Vec<(ObjectKeys, Value)>,
    blobs: Vec<(ObjectKeys, Vec<u8>)>,
    allow: Vec<AllowRule>,
}

/// An object store backed by process memory.
pub struct MemoryObjectStore {
    schema: KeySchema,
    fine_grained: bool,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryObjectStore {
    pub fn new(schema: KeySchema) -> Self {
        Self {
            schema,
            fine_grained: false,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Enables fine-grained access control for this store.
    #[must_use]
    pub fn with_fine_grained_access_control(mut self) -> Self {
        self.fine_grained = true;
        self
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn key_schema(&self) -> &KeySchema {
        &self.schema
    }

    fn fine_grained_access_control(&self) -> bool {
        self.fine_grained
    }

    async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction {
            schema: self.schema.clone(),
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

/// A transaction over the in-memory state.
///
/// `snapshot` holds the state to restore on rollback; commit clears it.
struct MemoryTransaction {
    schema: KeySchema,
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl MemoryTransaction {
    fn blob_keys(&self, subpath: &str, keys: &ObjectKeys) -> Result<ObjectKeys, StoreError> {
        let mut full = keys.clone();
        full.insert(SUBPATH_KEY.to_string(), subpath.to_string());
        self.schema.check_keys(&full)?;
        Ok(full)
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // A handle dropped without commit rolls back.
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        Ok(())
    }

    async fn create_object(
        &mut self,
        body: &Value,
        _aux: bool,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        self.schema.check_complete(keys)?;
        tracing::trace!(?keys, "creating object");
        if self.guard.objects.iter().any(|(got, _)| got == keys) {
            return Err(StoreError::key_collision(keys));
        }
        self.guard.objects.push((keys.clone(), body.clone()));
        Ok(())
    }

    async fn remove_objects(&mut self, keys: &ObjectKeys) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        self.guard.objects.retain(|(got, _)| !keys_match(got, keys));
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
        Ok(self
            .guard
            .objects
            .iter()
            .filter(|(got, body)| {
                keys_match(got, keys)
                    && cond.is_none_or(|c| c.matches(body, got))
                    && allow.is_none_or(|c| c.matches(body, got))
            })
            .cloned()
            .collect())
    }

    async fn create_blob(
        &mut self,
        blob: &[u8],
        subpath: &str,
        keys: &ObjectKeys,
    ) -> Result<(), StoreError> {
        let full = self.blob_keys(subpath, keys)?;
        if self.guard.blobs.iter().any(|(got, _)| got == &full) {
            return Err(StoreError::blob_key_collision(&full));
        }
        if !self.guard.objects.iter().any(|(got, _)| got == &full) {
            return Err(StoreError::no_such_object(&full));
        }
        self.guard.blobs.push((full, blob.to_vec()));
        Ok(())
    }

    async fn get_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<Vec<u8>, StoreError> {
        let full = self.blob_keys(subpath, keys)?;
        self.guard
            .blobs
            .iter()
            .find(|(got, _)| got == &full)
            .map(|(_, blob)| blob.clone())
            .ok_or_else(|| StoreError::no_such_object(&full))
    }

    async fn remove_blob(&mut self, subpath: &str, keys: &ObjectKeys) -> Result<(), StoreError> {
        let full = self.blob_keys(subpath, keys)?;
        self.guard.blobs.retain(|(got, _)| got != &full);
        Ok(())
    }

    async fn remove_blobs(&mut self, keys: &ObjectKeys) -> Result<(), StoreError> {
        self.schema.check_keys(keys)?;
        self.guard.blobs.retain(|(got, _)| !keys_match(got, keys));
        Ok(())
    }

    async fn get_allow_rules(&mut self) -> Result<Vec<AllowRule>, StoreError> {
        Ok(self.guard.allow.clone())
    }

    async fn has_allow_rule(&mut self, rule: &AllowRule) -> Result<bool, StoreError> {
        Ok(self.guard.allow.contains(rule))
    }

    async fn add_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError> {
        self.guard.allow.push(rule.clone());
        Ok(())
    }

    async fn remove_allow_rule(&mut self, rule: &AllowRule) -> Result<(), StoreError> {
        self.guard.allow.retain(|got| got != rule);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyType, keys};
    use serde_json::json;

    fn store() -> MemoryObjectStore {
        let schema =
            KeySchema::new(&[("obj_id", KeyType::Str), ("subpath", KeyType::Str)]).unwrap();
        MemoryObjectStore::new(schema)
    }

    fn base_keys(id: &str) -> ObjectKeys {
        keys(&[("obj_id", id), ("subpath", "")])
    }

    #[tokio::test]
    async fn test_create_and_get_object() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        let body = json!({"type": "subject", "full_name": "Alfred"});
        tx.create_object(&body, true, &base_keys("id-1")).await.unwrap();

        let matches = tx.get_matches(None, None, &base_keys("id-1")).await.unwrap();
        assert_eq!(matches, vec![(base_keys("id-1"), body)]);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_with_same_keys_collides() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        tx.create_object(&json!({}), true, &base_keys("id-1")).await.unwrap();
        let err = tx
            .create_object(&json!({}), true, &base_keys("id-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::KeyCollision { .. }));
    }

    #[tokio::test]
    async fn test_unknown_and_missing_keys_are_rejected() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        let err = tx
            .create_object(&json!({}), true, &keys(&[("bogus", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownKey { .. }));

        let err = tx
            .create_object(&json!({}), true, &keys(&[("obj_id", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey { .. }));
    }

    #[tokio::test]
    async fn test_partial_key_removal_removes_subresources() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        tx.create_object(&json!({"a": 1}), true, &base_keys("id-1")).await.unwrap();
        tx.create_object(
            &json!({"b": 2}),
            true,
            &keys(&[("obj_id", "id-1"), ("subpath", "sub")]),
        )
        .await
        .unwrap();
        tx.create_object(&json!({"c": 3}), true, &base_keys("id-2")).await.unwrap();

        tx.remove_objects(&keys(&[("obj_id", "id-1")])).await.unwrap();

        assert!(
            tx.get_matches(None, None, &keys(&[("obj_id", "id-1")]))
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            tx.get_matches(None, None, &keys(&[("obj_id", "id-2")]))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_get_matches_needs_criteria() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        let err = tx.get_matches(None, None, &keys(&[])).await.unwrap_err();
        assert!(matches!(err, StoreError::NoMatchCriteria));
    }

    #[tokio::test]
    async fn test_get_matches_with_condition() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        tx.create_object(&json!({"type": "subject", "full_name": "Alfred"}), true, &base_keys("id-1"))
            .await
            .unwrap();
        tx.create_object(&json!({"type": "subject", "full_name": "Bruce"}), true, &base_keys("id-2"))
            .await
            .unwrap();

        let cond = Condition::equal("full_name", "alfred");
        let matches = tx.get_matches(Some(&cond), None, &keys(&[])).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, base_keys("id-1"));
    }

    #[tokio::test]
    async fn test_blob_needs_parent_object() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        let err = tx
            .create_blob(b"bytes", "blob", &keys(&[("obj_id", "id-1")]))
            .await
            .unwrap_err();
        assert!(err.is_no_such_object());

        tx.create_object(
            &json!({"content_type": ""}),
            true,
            &keys(&[("obj_id", "id-1"), ("subpath", "blob")]),
        )
        .await
        .unwrap();
        tx.create_blob(b"bytes", "blob", &keys(&[("obj_id", "id-1")]))
            .await
            .unwrap();

        let blob = tx.get_blob("blob", &keys(&[("obj_id", "id-1")])).await.unwrap();
        assert_eq!(blob, b"bytes");
    }

    #[tokio::test]
    async fn test_duplicate_blob_collides() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        tx.create_object(
            &json!({}),
            true,
            &keys(&[("obj_id", "id-1"), ("subpath", "blob")]),
        )
        .await
        .unwrap();
        tx.create_blob(b"a", "blob", &keys(&[("obj_id", "id-1")])).await.unwrap();
        let err = tx
            .create_blob(b"b", "blob", &keys(&[("obj_id", "id-1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BlobKeyCollision { .. }));
    }

    #[tokio::test]
    async fn test_remove_blobs_by_partial_key() {
        let store = store();
        let mut tx = store.transaction().await.unwrap();
        tx.create_object(
            &json!({}),
            true,
            &keys(&[("obj_id", "id-1"), ("subpath", "blob")]),
        )
        .await
        .unwrap();
        tx.create_blob(b"a", "blob", &keys(&[("obj_id", "id-1")])).await.unwrap();

        tx.remove_blobs(&keys(&[("obj_id", "id-1")])).await.unwrap();
        let err = tx.get_blob("blob", &keys(&[("obj_id", "id-1")])).await.unwrap_err();
        assert!(err.is_no_such_object());
    }

    #[tokio::test]
    async fn test_commit_keeps_changes_and_rollback_discards() {
        let store = store();

        let mut tx = store.transaction().await.unwrap();
        tx.create_object(&json!({"n": 1}), true, &base_keys("kept")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.transaction().await.unwrap();
        tx.create_object(&json!({"n": 2}), true, &base_keys("discarded"))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.transaction().await.unwrap();
        assert_eq!(
            tx.get_matches(None, None, &base_keys("kept")).await.unwrap().len(),
            1
        );
        assert!(
            tx.get_matches(None, None, &base_keys("discarded"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = store();

        {
            let mut tx = store.transaction().await.unwrap();
            tx.create_object(&json!({}), true, &base_keys("dropped")).await.unwrap();
            // Dropped without commit.
        }

        let mut tx = store.transaction().await.unwrap();
        assert!(
            tx.get_matches(None, None, &base_keys("dropped"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_allow_rules_round_trip() {
        let rule = AllowRule {
            method: "GET".to_string(),
            client_id: "*".to_string(),
            user_id: "user".to_string(),
            subpath: "".to_string(),
            resource_id: "*".to_string(),
            resource_type: None,
            resource_field: None,
            resource_value: None,
        };

        let store = store();
        let mut tx = store.transaction().await.unwrap();
        assert!(!tx.has_allow_rule(&rule).await.unwrap());
        tx.add_allow_rule(&rule).await.unwrap();
        assert!(tx.has_allow_rule(&rule).await.unwrap());
        assert_eq!(tx.get_allow_rules().await.unwrap(), vec![rule.clone()]);
        tx.remove_allow_rule(&rule).await.unwrap();
        assert!(!tx.has_allow_rule(&rule).await.unwrap());
    }
}

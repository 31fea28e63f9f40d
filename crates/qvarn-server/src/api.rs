//! The API object: the resource type registry and the operations that cut
//! across collections.
//!
//! Resource types are stored in the object store as `resource_type`
//! resources (the type describing resource types stores itself), and an
//! immutable in-process cache fronts the store so route dispatch does not
//! hit the database for known paths.

use std::sync::Arc;

use axum::http::HeaderMap;
use dashmap::DashMap;
use serde_json::{Value, json};

use qvarn_core::ResourceType;
use qvarn_notifications::{ResourceChange, build_notification, listener_matches};
use qvarn_search::Condition;
use qvarn_storage::{ObjectKeys, ObjectStore, StoreTransaction, keys};

use crate::access_log;
use crate::collection::Collection;
use crate::error::ApiError;

pub struct QvarnApi {
    store: Arc<dyn ObjectStore>,
    baseurl: String,
    access_log_enabled: bool,
    types: DashMap<String, Arc<ResourceType>>,
}

impl QvarnApi {
    pub fn new(store: Arc<dyn ObjectStore>, baseurl: String, access_log_enabled: bool) -> Self {
        Self {
            store,
            baseurl,
            access_log_enabled,
            types: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn baseurl(&self) -> &str {
        &self.baseurl
    }

    pub async fn transaction(&self) -> Result<Box<dyn StoreTransaction>, ApiError> {
        Ok(self.store.transaction().await?)
    }

    /// Stores a resource type, replacing any previous copy under the same
    /// id, and caches it for dispatch.
    pub async fn add_resource_type(
        &self,
        tx: &mut dyn StoreTransaction,
        rt: &ResourceType,
    ) -> Result<(), ApiError> {
        let wanted = keys(&[("obj_id", rt.type_name()), ("subpath", "")]);
        tx.remove_objects(&wanted).await?;

        let obj = json!({
            "id": rt.type_name(),
            "type": "resource_type",
            "path": rt.path(),
            "spec": rt.as_spec(),
        });
        tx.create_object(&obj, true, &wanted).await?;

        self.types
            .insert(rt.path().to_string(), Arc::new(rt.clone()));
        Ok(())
    }

    /// Resolves the resource type served under `/<segment>`, consulting
    /// the cache first and the store on a miss.
    pub async fn resource_type_for_segment(
        &self,
        tx: &mut dyn StoreTransaction,
        segment: &str,
    ) -> Result<Arc<ResourceType>, ApiError> {
        let path = format!("/{segment}");
        if let Some(rt) = self.types.get(&path) {
            return Ok(Arc::clone(&rt));
        }

        let cond = Condition::all(vec![
            Condition::equal("path", &path),
            Condition::ResourceTypeIs("resource_type".to_string()),
        ]);
        let matches = tx
            .get_matches(Some(&cond), None, &ObjectKeys::new())
            .await?;
        let specs = resource_type_specs(&matches);
        let Some(spec) = specs.first() else {
            tracing::warn!(%path, "no resource type for path");
            return Err(ApiError::NoSuchResourceType(path));
        };

        let rt = Arc::new(ResourceType::from_spec(spec)?);
        self.types.insert(path, Arc::clone(&rt));
        Ok(rt)
    }

    /// Resolves a resource type by its type name.
    pub async fn resource_type_named(
        &self,
        tx: &mut dyn StoreTransaction,
        name: &str,
    ) -> Result<Arc<ResourceType>, ApiError> {
        if let Some(entry) = self
            .types
            .iter()
            .find(|entry| entry.value().type_name() == name)
        {
            return Ok(Arc::clone(entry.value()));
        }

        let cond = Condition::all(vec![
            Condition::equal("id", name),
            Condition::ResourceTypeIs("resource_type".to_string()),
        ]);
        let matches = tx
            .get_matches(Some(&cond), None, &ObjectKeys::new())
            .await?;
        let specs = resource_type_specs(&matches);
        match specs.len() {
            0 => Err(ApiError::NoSuchResourceType(name.to_string())),
            1 => {
                let rt = Arc::new(ResourceType::from_spec(specs[0])?);
                self.types.insert(rt.path().to_string(), Arc::clone(&rt));
                Ok(rt)
            }
            _ => Err(ApiError::TooManyResourceTypes(name.to_string())),
        }
    }

    pub fn collection(&self, rt: Arc<ResourceType>) -> Collection {
        Collection::new(Arc::clone(&self.store), rt)
    }

    pub async fn listener_collection(
        &self,
        tx: &mut dyn StoreTransaction,
    ) -> Result<Collection, ApiError> {
        let rt = self.resource_type_named(tx, "listener").await?;
        Ok(self.collection(rt))
    }

    /// Fans a change out to matching listeners: one notification resource
    /// per listener, in the same transaction as the change.
    pub async fn notify(
        &self,
        tx: &mut dyn StoreTransaction,
        resource_type: &str,
        resource_id: &str,
        revision: Option<&str>,
        change: ResourceChange,
    ) -> Result<(), ApiError> {
        let cond = Condition::ResourceTypeIs("listener".to_string());
        let listeners = tx
            .get_matches(Some(&cond), None, &ObjectKeys::new())
            .await?;

        let matching: Vec<&Value> = listeners
            .iter()
            .filter(|(_, listener)| {
                listener_matches(listener, resource_id, change, resource_type)
            })
            .map(|(_, listener)| listener)
            .collect();
        if matching.is_empty() {
            return Ok(());
        }

        let rt = self.resource_type_named(tx, "notification").await?;
        let notifications = self.collection(rt);
        for listener in matching {
            let listener_id = listener.get("id").and_then(Value::as_str).unwrap_or("");
            let notification =
                build_notification(listener_id, resource_id, revision, change);
            tracing::info!(listener_id, resource_id, change = %change, "creating notification");
            notifications.post_with_id(tx, &notification).await?;
        }
        Ok(())
    }

    /// Appends access log entries for a successful operation, when the
    /// access log is enabled and the type is not itself bookkeeping.
    pub async fn log_access(
        &self,
        tx: &mut dyn StoreTransaction,
        ids: &[String],
        revision: Option<&str>,
        resource_type: &str,
        operation: &str,
        headers: &HeaderMap,
    ) -> Result<(), ApiError> {
        if !self.access_log_enabled || access_log::is_excluded(resource_type) {
            return Ok(());
        }
        let rt = self.resource_type_named(tx, "access").await?;
        let coll = self.collection(rt);
        for entry in access_log::build_entries(ids, revision, resource_type, operation, headers) {
            coll.post_with_id(tx, &entry).await?;
        }
        Ok(())
    }
}

fn resource_type_specs(matches: &[(ObjectKeys, Value)]) -> Vec<&Value> {
    matches
        .iter()
        .filter_map(|(_, obj)| obj.get("spec"))
        .collect()
}

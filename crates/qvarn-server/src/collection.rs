//! The collection manager.
//!
//! A collection is one resource type bound to the store. It owns the CRUD
//! protocol: validation, prototype completion, id and revision minting,
//! sub-resource lifecycle and search execution. Every operation runs
//! inside a caller-supplied store transaction.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value, json};
use thiserror::Error;

use qvarn_auth::AccessParams;
use qvarn_core::{
    ResourceIdGenerator, ResourceType, ValidationError, add_missing_fields, flatten_object, schema,
    validate_new_resource, validate_new_resource_with_id, validate_resource_update,
};
use qvarn_search::{Condition, SearchError, SearchParameters, parse};
use qvarn_storage::{ObjectKeys, ObjectStore, StoreError, StoreTransaction, keys};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("there is no resource with keys {keys}")]
    NoSuchResource { keys: String },

    #[error("updated resource must carry the current revision: got {got}, expected {expected}")]
    WrongRevision { got: String, expected: String },

    #[error("no search criteria given")]
    NoSearchCriteria,

    #[error("resource does not contain field {field}")]
    UnknownSearchField { field: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectionError {
    fn no_such_resource(keys: &ObjectKeys) -> Self {
        Self::NoSuchResource {
            keys: qvarn_storage::error::format_keys(keys),
        }
    }
}

/// CRUD and search for one resource type.
pub struct Collection {
    store: Arc<dyn ObjectStore>,
    rt: Arc<ResourceType>,
    idgen: ResourceIdGenerator,
}

impl Collection {
    pub fn new(store: Arc<dyn ObjectStore>, rt: Arc<ResourceType>) -> Self {
        Self {
            store,
            rt,
            idgen: ResourceIdGenerator::new(),
        }
    }

    pub fn resource_type(&self) -> &Arc<ResourceType> {
        &self.rt
    }

    pub fn type_name(&self) -> &str {
        self.rt.type_name()
    }

    /// Creates a resource. The object must not carry `id` or `revision`;
    /// both are minted here.
    pub async fn post(
        &self,
        tx: &mut dyn StoreTransaction,
        obj: &Value,
    ) -> Result<Value, CollectionError> {
        validate_new_resource(obj, &self.rt)?;
        self.post_helper(tx, obj).await
    }

    /// Creates a resource, keeping a client-supplied `id` and `revision`
    /// when present. Reserved for callers with the `set_meta_fields`
    /// capability.
    pub async fn post_with_id(
        &self,
        tx: &mut dyn StoreTransaction,
        obj: &Value,
    ) -> Result<Value, CollectionError> {
        validate_new_resource_with_id(obj, &self.rt)?;
        self.post_helper(tx, obj).await
    }

    async fn post_helper(
        &self,
        tx: &mut dyn StoreTransaction,
        obj: &Value,
    ) -> Result<Value, CollectionError> {
        let mut new_obj = add_missing_fields(self.rt.prototype(), obj);
        let map = object_fields_mut(&mut new_obj)?;

        if is_unset(map.get("id")) {
            let id = self.idgen.new_id(self.rt.type_name());
            map.insert("id".to_string(), Value::String(id));
        }
        if is_unset(map.get("revision")) {
            let revision = self.idgen.new_id("revision");
            map.insert("revision".to_string(), Value::String(revision));
        }
        let obj_id = string_field(map, "id");

        tx.create_object(&new_obj, true, &base_keys(&obj_id)).await?;

        for (subpath, subproto) in self.rt.subpaths() {
            let empty = add_missing_fields(subproto, &json!({}));
            tx.create_object(&empty, true, &keys(&[("obj_id", &obj_id), ("subpath", subpath)]))
                .await?;
        }

        Ok(new_obj)
    }

    pub async fn get(
        &self,
        tx: &mut dyn StoreTransaction,
        obj_id: &str,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        self.get_object(tx, obj_id, "", params).await
    }

    pub async fn get_subresource(
        &self,
        tx: &mut dyn StoreTransaction,
        obj_id: &str,
        subpath: &str,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        self.get_object(tx, obj_id, subpath, params).await
    }

    async fn get_object(
        &self,
        tx: &mut dyn StoreTransaction,
        obj_id: &str,
        subpath: &str,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        let allow = self.allow_cond(tx, params).await?;
        let wanted = keys(&[("obj_id", obj_id), ("subpath", subpath)]);
        let matches = tx.get_matches(None, allow.as_ref(), &wanted).await?;
        matches
            .into_iter()
            .find(|(got, body)| allow_permits(allow.as_ref(), body, got))
            .map(|(_, body)| body)
            .ok_or_else(|| CollectionError::no_such_resource(&wanted))
    }

    /// Replaces a resource. The supplied `revision` must equal the stored
    /// one; a fresh revision is minted for the result. Sub-resources are
    /// left intact.
    pub async fn put(
        &self,
        tx: &mut dyn StoreTransaction,
        obj: &Value,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        validate_resource_update(obj, &self.rt)?;

        let obj_id = json_str(obj, "id");
        let revision = json_str(obj, "revision");

        let old = self.get(tx, &obj_id, params).await?;
        let current = json_str(&old, "revision");
        if current != revision {
            return Err(CollectionError::WrongRevision {
                got: revision,
                expected: current,
            });
        }

        let mut new_obj = obj.clone();
        new_obj["revision"] = Value::String(self.idgen.new_id("revision"));
        tx.remove_objects(&base_keys(&obj_id)).await?;
        tx.create_object(&new_obj, true, &base_keys(&obj_id)).await?;

        Ok(new_obj)
    }

    /// Replaces a sub-resource and bumps the base resource's revision. The
    /// returned sub-resource carries the new base revision.
    pub async fn put_subresource(
        &self,
        tx: &mut dyn StoreTransaction,
        sub_obj: &Value,
        subpath: &str,
        obj_id: &str,
        revision: &str,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        let mut new_sub = self
            .put_subresource_no_new_revision(tx, sub_obj, subpath, obj_id, revision, params)
            .await?;

        let mut parent = self.get(tx, obj_id, params).await?;
        let new_revision = self.idgen.new_id("revision");
        parent["revision"] = Value::String(new_revision.clone());
        tx.remove_objects(&base_keys(obj_id)).await?;
        tx.create_object(&parent, true, &base_keys(obj_id)).await?;

        new_sub["revision"] = Value::String(new_revision);
        Ok(new_sub)
    }

    /// Replaces a sub-resource without touching the base revision. Used by
    /// file writes under the `set_meta_fields` capability.
    pub async fn put_subresource_no_new_revision(
        &self,
        tx: &mut dyn StoreTransaction,
        sub_obj: &Value,
        subpath: &str,
        obj_id: &str,
        revision: &str,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        let parent = self.get(tx, obj_id, params).await?;
        let current = json_str(&parent, "revision");
        if current != revision {
            return Err(CollectionError::WrongRevision {
                got: revision.to_string(),
                expected: current,
            });
        }

        let wanted = keys(&[("obj_id", obj_id), ("subpath", subpath)]);
        tx.remove_objects(&wanted).await?;
        tx.create_object(sub_obj, true, &wanted).await?;

        Ok(sub_obj.clone())
    }

    /// Deletes a resource with its sub-resources and blobs.
    pub async fn delete(
        &self,
        tx: &mut dyn StoreTransaction,
        obj_id: &str,
        params: &AccessParams,
    ) -> Result<(), CollectionError> {
        self.get(tx, obj_id, params).await?;
        let wanted = keys(&[("obj_id", obj_id)]);
        tx.remove_objects(&wanted).await?;
        tx.remove_blobs(&wanted).await?;
        Ok(())
    }

    /// Lists the ids of this type's resources visible to the caller.
    pub async fn list(
        &self,
        tx: &mut dyn StoreTransaction,
        params: &AccessParams,
    ) -> Result<Value, CollectionError> {
        let allow = self.allow_cond(tx, params).await?;
        let cond = Condition::equal("type", self.rt.type_name());
        let matches = tx
            .get_matches(Some(&cond), allow.as_ref(), &ObjectKeys::new())
            .await?;
        let resources: Vec<Value> = matches
            .iter()
            .filter(|(got, obj)| {
                obj.get("type").and_then(Value::as_str) == Some(self.type_name())
                    && allow_permits(allow.as_ref(), obj, got)
            })
            .map(|(_, obj)| json!({"id": obj.get("id")}))
            .collect();
        Ok(json!({ "resources": resources }))
    }

    /// Runs a search: parse, validate fields, collect candidates through
    /// the store, re-filter precisely, sort, page, project.
    pub async fn search(
        &self,
        tx: &mut dyn StoreTransaction,
        criteria: &str,
        params: &AccessParams,
    ) -> Result<Vec<Value>, CollectionError> {
        if criteria.is_empty() {
            return Err(CollectionError::NoSearchCriteria);
        }

        let sp = parse(criteria)?;
        let cond = sp
            .cond
            .clone()
            .unwrap_or_else(|| Condition::equal("type", self.rt.type_name()));
        self.check_fields_are_allowed(&cond)?;

        let candidates = self.find_matches(tx, &cond, params).await?;

        // Precise re-filter: the aux count trick over-matches, so evaluate
        // the condition again. Leaves see the flattened pairs of the base
        // object and its sub-resources together, the same family of rows
        // the aux index holds for one object.
        let mut objects: Vec<Value> = candidates
            .into_iter()
            .filter(|candidate| {
                candidate.base.get("type").and_then(Value::as_str) == Some(self.type_name())
                    && cond.matches(&candidate.merged, &candidate.keys)
            })
            .map(|candidate| candidate.base)
            .collect();

        if !sp.sort_keys.is_empty() {
            sort_objects(&mut objects, &sp.sort_keys);
        }

        let picked = pick_range(objects, sp.offset, sp.limit);
        Ok(picked.iter().map(|obj| project(obj, &sp)).collect())
    }

    async fn find_matches(
        &self,
        tx: &mut dyn StoreTransaction,
        cond: &Condition,
        params: &AccessParams,
    ) -> Result<Vec<Candidate>, CollectionError> {
        let allow = self.allow_cond(tx, params).await?;
        let matches = tx
            .get_matches(Some(cond), allow.as_ref(), &ObjectKeys::new())
            .await?;

        // The candidate rows may be sub-resources; fetch every row of each
        // distinct object, still under the allow condition, and narrow the
        // backend's allow over-match down to the precise predicate. An
        // object with no visible base row is skipped.
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (got, _) in matches {
            let Some(obj_id) = got.get("obj_id") else {
                continue;
            };
            if !seen.insert(obj_id.clone()) {
                continue;
            }
            let rows: Vec<(ObjectKeys, Value)> = tx
                .get_matches(None, allow.as_ref(), &keys(&[("obj_id", obj_id)]))
                .await?
                .into_iter()
                .filter(|(row_keys, body)| allow_permits(allow.as_ref(), body, row_keys))
                .collect();
            let base = rows
                .iter()
                .find(|(row_keys, _)| row_keys.get("subpath").map(String::as_str) == Some(""));
            let Some((base_row_keys, base_body)) = base else {
                continue;
            };
            candidates.push(Candidate {
                keys: base_row_keys.clone(),
                base: base_body.clone(),
                merged: Value::Array(rows.iter().map(|(_, body)| body.clone()).collect()),
            });
        }
        Ok(candidates)
    }

    async fn allow_cond(
        &self,
        tx: &mut dyn StoreTransaction,
        params: &AccessParams,
    ) -> Result<Option<Condition>, CollectionError> {
        if !self.store.fine_grained_access_control() {
            return Ok(None);
        }
        let rules = tx.get_allow_rules().await?;
        Ok(Some(Condition::AccessIsAllowed {
            params: params.clone(),
            rules,
        }))
    }

    fn check_fields_are_allowed(&self, cond: &Condition) -> Result<(), CollectionError> {
        let allowed = self.allowed_field_names();
        for field in cond.fields() {
            if !allowed.contains(field) {
                return Err(CollectionError::UnknownSearchField {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Every path component of the base prototype and all sub-prototypes
    /// is searchable.
    fn allowed_field_names(&self) -> HashSet<String> {
        let mut names = HashSet::new();
        let mut add_proto = |proto: &Value| {
            for entry in schema(proto) {
                for name in entry.path {
                    names.insert(name);
                }
            }
        };
        add_proto(self.rt.prototype());
        for (_, subproto) in self.rt.subpaths() {
            add_proto(subproto);
        }
        names
    }
}

/// One search candidate: the base object, its store keys, and the merged
/// view of all of its rows that leaf conditions are re-evaluated against.
struct Candidate {
    keys: ObjectKeys,
    base: Value,
    merged: Value,
}

fn base_keys(obj_id: &str) -> ObjectKeys {
    keys(&[("obj_id", obj_id), ("subpath", "")])
}

/// The allow fragment compiled into backend queries checks only method,
/// subpath, client, user and resource id, so its rows over-match. Every
/// allow-gated row must pass the precise rule predicate too, the same way
/// the search condition is re-applied after the aux count trick.
fn allow_permits(allow: Option<&Condition>, obj: &Value, row_keys: &ObjectKeys) -> bool {
    allow.is_none_or(|cond| cond.matches(obj, row_keys))
}

fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn object_fields_mut(obj: &mut Value) -> Result<&mut Map<String, Value>, CollectionError> {
    obj.as_object_mut()
        .ok_or_else(|| CollectionError::Validation(ValidationError::NotADict))
}

fn string_field(map: &Map<String, Value>, field: &str) -> String {
    map.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn json_str(obj: &Value, field: &str) -> String {
    obj.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// A sortable rendering of a leaf value. Variant order ranks booleans
/// before integers before strings, which keeps mixed-type fields from
/// panicking mid-sort the way dynamic comparisons would.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

fn sort_objects(objects: &mut [Value], sort_keys: &[String]) {
    objects.sort_by_cached_key(|obj| {
        let pairs = flatten_object(obj);
        sort_keys
            .iter()
            .map(|field| {
                pairs
                    .iter()
                    .filter(|(name, _)| name == field)
                    .map(|(_, value)| sort_value(value))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    });
}

fn sort_value(value: &Value) -> SortValue {
    match value {
        Value::Bool(b) => SortValue::Bool(*b),
        Value::Number(n) => SortValue::Int(n.as_i64().unwrap_or(0)),
        Value::String(s) => SortValue::Str(s.clone()),
        other => SortValue::Str(other.to_string()),
    }
}

fn pick_range(objects: Vec<Value>, offset: Option<usize>, limit: Option<usize>) -> Vec<Value> {
    let len = objects.len();
    let start = offset.unwrap_or(0).min(len);
    let end = match limit {
        Some(limit) => (start + limit).min(len),
        None => len,
    };
    objects[start..end].to_vec()
}

fn project(obj: &Value, sp: &SearchParameters) -> Value {
    if sp.show_all {
        return obj.clone();
    }
    if sp.show_fields.is_empty() {
        return json!({"id": obj.get("id")});
    }
    let mut picked = Map::new();
    picked.insert("id".to_string(), obj.get("id").cloned().unwrap_or(Value::Null));
    for field in &sp.show_fields {
        if let Some(value) = obj.get(field) {
            picked.insert(field.clone(), value.clone());
        }
    }
    Value::Object(picked)
}

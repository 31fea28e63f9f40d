//! Resource type descriptions.
//!
//! A resource type is the immutable schema of a family of resources: its
//! type name, the URL path its collection is served under, and an ordered
//! list of versions. The last version is the live one; earlier versions are
//! carried along only so the full specification can be stored and returned.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while loading or interpreting a resource type
/// specification.
#[derive(Debug, Error)]
pub enum ResourceTypeError {
    #[error("resource type specification is not a mapping")]
    NotAMapping,

    #[error("resource type specification is missing field {0}")]
    MissingField(&'static str),

    #[error("resource type {0} declares no versions")]
    NoVersions(String),

    #[error("subpath {subpath} of resource type {type_name} has no prototype")]
    BadSubpath { type_name: String, subpath: String },

    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// An immutable resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceType {
    type_name: String,
    path: String,
    versions: Vec<Value>,
    latest: Version,
}

#[derive(Debug, Clone, PartialEq)]
struct Version {
    version: String,
    prototype: Value,
    subpaths: BTreeMap<String, Value>,
    files: Vec<String>,
}

impl ResourceType {
    /// Builds a resource type from its specification mapping, which has the
    /// shape `{type, path, versions: [{version, prototype, subpaths?,
    /// files?}, ...]}`.
    pub fn from_spec(spec: &Value) -> Result<Self, ResourceTypeError> {
        let map = spec.as_object().ok_or(ResourceTypeError::NotAMapping)?;
        let type_name = string_field(map, "type")?;
        let path = string_field(map, "path")?;
        let versions = map
            .get("versions")
            .and_then(Value::as_array)
            .ok_or(ResourceTypeError::MissingField("versions"))?
            .clone();
        let last = versions
            .last()
            .ok_or_else(|| ResourceTypeError::NoVersions(type_name.clone()))?;
        let latest = Version::from_spec(&type_name, last)?;
        Ok(Self {
            type_name,
            path,
            versions,
            latest,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn latest_version(&self) -> &str {
        &self.latest.version
    }

    /// The prototype of the latest version.
    pub fn prototype(&self) -> &Value {
        &self.latest.prototype
    }

    /// Sub-path names and their prototypes, in name order.
    pub fn subpaths(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.latest
            .subpaths
            .iter()
            .map(|(name, proto)| (name.as_str(), proto))
    }

    pub fn subprototype(&self, subpath: &str) -> Option<&Value> {
        self.latest.subpaths.get(subpath)
    }

    /// Sub-paths whose payload is stored as a binary blob.
    pub fn files(&self) -> &[String] {
        &self.latest.files
    }

    pub fn is_file(&self, subpath: &str) -> bool {
        self.latest.files.iter().any(|f| f == subpath)
    }

    /// The full specification mapping, suitable for storing and for
    /// rebuilding the type with [`ResourceType::from_spec`].
    pub fn as_spec(&self) -> Value {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.type_name.clone()));
        map.insert("path".to_string(), Value::String(self.path.clone()));
        map.insert("versions".to_string(), Value::Array(self.versions.clone()));
        Value::Object(map)
    }
}

impl Version {
    fn from_spec(type_name: &str, spec: &Value) -> Result<Self, ResourceTypeError> {
        let map = spec.as_object().ok_or(ResourceTypeError::NotAMapping)?;
        let version = string_field(map, "version")?;
        let prototype = map
            .get("prototype")
            .cloned()
            .ok_or(ResourceTypeError::MissingField("prototype"))?;

        let mut subpaths = BTreeMap::new();
        if let Some(declared) = map.get("subpaths").and_then(Value::as_object) {
            for (subpath, sub_spec) in declared {
                let proto = sub_spec
                    .get("prototype")
                    .cloned()
                    .ok_or_else(|| ResourceTypeError::BadSubpath {
                        type_name: type_name.to_string(),
                        subpath: subpath.clone(),
                    })?;
                subpaths.insert(subpath.clone(), proto);
            }
        }

        let files = map
            .get("files")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            version,
            prototype,
            subpaths,
            files,
        })
    }
}

fn string_field(map: &Map<String, Value>, field: &'static str) -> Result<String, ResourceTypeError> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ResourceTypeError::MissingField(field))
}

/// Loads every `*.yaml` resource type specification in a directory.
pub fn load_resource_types(dirname: &Path) -> Result<Vec<ResourceType>, ResourceTypeError> {
    let entries = fs::read_dir(dirname).map_err(|source| ResourceTypeError::Io {
        path: dirname.display().to_string(),
        source,
    })?;

    let mut resource_types = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ResourceTypeError::Io {
            path: dirname.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let text = fs::read_to_string(&path).map_err(|source| ResourceTypeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let spec: Value =
            serde_yaml::from_str(&text).map_err(|source| ResourceTypeError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        resource_types.push(ResourceType::from_spec(&spec)?);
    }
    resource_types.sort_by(|a, b| a.type_name.cmp(&b.type_name));
    Ok(resource_types)
}

/// Fills in the fields of `obj` that its prototype declares but the object
/// lacks, using the zero value of the declared leaf type. Mappings inside
/// lists are completed recursively. Fields the prototype does not know are
/// copied through untouched; callers validate before completing.
pub fn add_missing_fields(proto: &Value, obj: &Value) -> Value {
    match (proto.as_object(), obj.as_object()) {
        (Some(proto_map), Some(obj_map)) => Value::Object(fill_in(proto_map, obj_map)),
        _ => obj.clone(),
    }
}

fn fill_in(proto: &Map<String, Value>, obj: &Map<String, Value>) -> Map<String, Value> {
    let mut new = Map::new();

    for (field, proto_value) in proto {
        match proto_value {
            Value::String(_) => {
                if !obj.contains_key(field) {
                    new.insert(field.clone(), Value::String(String::new()));
                }
            }
            Value::Number(_) => {
                if !obj.contains_key(field) {
                    new.insert(field.clone(), Value::from(0));
                }
            }
            Value::Bool(_) => {
                if !obj.contains_key(field) {
                    new.insert(field.clone(), Value::Bool(false));
                }
            }
            Value::Array(proto_elems) => match obj.get(field) {
                None => {
                    new.insert(field.clone(), Value::Array(Vec::new()));
                }
                Some(Value::Array(items)) => {
                    if let Some(Value::Object(elem_proto)) = proto_elems.first() {
                        let completed = items
                            .iter()
                            .map(|item| match item.as_object() {
                                Some(map) => Value::Object(fill_in(elem_proto, map)),
                                None => item.clone(),
                            })
                            .collect();
                        new.insert(field.clone(), Value::Array(completed));
                    } else {
                        new.insert(field.clone(), Value::Array(items.clone()));
                    }
                }
                Some(other) => {
                    new.insert(field.clone(), other.clone());
                }
            },
            _ => {}
        }
    }

    for (field, value) in obj {
        if !new.contains_key(field) {
            new.insert(field.clone(), value.clone());
        }
    }

    new
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subject_spec() -> Value {
        json!({
            "type": "subject",
            "path": "/subjects",
            "versions": [
                {
                    "version": "v0",
                    "prototype": {
                        "id": "",
                        "type": "",
                        "revision": "",
                        "full_name": "",
                    },
                },
                {
                    "version": "v1",
                    "prototype": {
                        "id": "",
                        "type": "",
                        "revision": "",
                        "full_name": "",
                        "names": [{"sort_key": ""}],
                    },
                    "subpaths": {
                        "sub": {"prototype": {"subfield": ""}},
                        "blob": {"prototype": {"content_type": ""}},
                    },
                    "files": ["blob"],
                },
            ],
        })
    }

    #[test]
    fn test_uses_latest_version() {
        let rt = ResourceType::from_spec(&subject_spec()).unwrap();
        assert_eq!(rt.type_name(), "subject");
        assert_eq!(rt.path(), "/subjects");
        assert_eq!(rt.latest_version(), "v1");
        assert!(rt.prototype().get("names").is_some());
    }

    #[test]
    fn test_subpaths_and_files() {
        let rt = ResourceType::from_spec(&subject_spec()).unwrap();
        let subpaths: Vec<&str> = rt.subpaths().map(|(name, _)| name).collect();
        assert_eq!(subpaths, vec!["blob", "sub"]);
        assert!(rt.is_file("blob"));
        assert!(!rt.is_file("sub"));
        assert_eq!(rt.subprototype("sub"), Some(&json!({"subfield": ""})));
        assert_eq!(rt.subprototype("missing"), None);
    }

    #[test]
    fn test_spec_round_trips() {
        let spec = subject_spec();
        let rt = ResourceType::from_spec(&spec).unwrap();
        assert_eq!(rt.as_spec(), spec);
        let again = ResourceType::from_spec(&rt.as_spec()).unwrap();
        assert_eq!(again, rt);
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(matches!(
            ResourceType::from_spec(&json!([])),
            Err(ResourceTypeError::NotAMapping)
        ));
        assert!(matches!(
            ResourceType::from_spec(&json!({"type": "x", "path": "/x"})),
            Err(ResourceTypeError::MissingField("versions"))
        ));
        assert!(matches!(
            ResourceType::from_spec(&json!({"type": "x", "path": "/x", "versions": []})),
            Err(ResourceTypeError::NoVersions(_))
        ));
    }

    #[test]
    fn test_load_resource_types_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("subject.yaml"),
            "type: subject\npath: /subjects\nversions:\n- version: v0\n  prototype:\n    id: ''\n    type: ''\n    revision: ''\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let types = load_resource_types(dir.path()).unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].type_name(), "subject");
    }

    #[test]
    fn test_add_missing_fields_fills_defaults() {
        let proto = json!({
            "id": "",
            "type": "",
            "revision": "",
            "count": 0,
            "enabled": false,
            "tags": [""],
            "names": [{"full_name": "", "sort_key": ""}],
        });
        let obj = json!({
            "type": "subject",
            "names": [{"full_name": "Alfred"}],
        });
        let filled = add_missing_fields(&proto, &obj);
        assert_eq!(
            filled,
            json!({
                "id": "",
                "type": "subject",
                "revision": "",
                "count": 0,
                "enabled": false,
                "tags": [],
                "names": [{"full_name": "Alfred", "sort_key": ""}],
            })
        );
    }

    #[test]
    fn test_add_missing_fields_is_idempotent() {
        let proto = json!({
            "id": "",
            "type": "",
            "revision": "",
            "names": [{"full_name": ""}],
        });
        let obj = json!({"type": "subject", "names": [{}]});
        let once = add_missing_fields(&proto, &obj);
        let twice = add_missing_fields(&proto, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_add_missing_fields_keeps_unknown_fields() {
        let proto = json!({"id": ""});
        let obj = json!({"extra": "kept"});
        let filled = add_missing_fields(&proto, &obj);
        assert_eq!(filled, json!({"id": "", "extra": "kept"}));
    }
}

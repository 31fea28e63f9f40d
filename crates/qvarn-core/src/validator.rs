//! Validation of incoming resources against their resource type.
//!
//! The checks are structural: the body must be a mapping, its `type` must
//! match the collection, the meta fields must be present or absent as the
//! operation demands, and every field path must appear in the prototype's
//! schema with a compatible leaf kind.

use serde_json::Value;
use thiserror::Error;

use crate::resource_type::ResourceType;
use crate::schema::{compatible, schema};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("was expecting a mapping")]
    NotADict,

    #[error("resources must have a type field")]
    NoType,

    #[error("resource has type {actual}, but {expected} was expected")]
    WrongType { actual: String, expected: String },

    #[error("updated resources must have an id set")]
    NoId,

    #[error("new resources must not have an id set")]
    HasId,

    #[error("updated resources must have a revision set")]
    NoRevision,

    #[error("new resources must not have a revision set")]
    HasRevision,

    #[error("resource type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    #[error("resource type {type_name} has no sub-resource {subpath}")]
    UnknownSubpath { type_name: String, subpath: String },
}

/// Validates a resource arriving via POST: correct type, known fields, and
/// no client-supplied meta fields.
pub fn validate_new_resource(
    resource: &Value,
    rt: &ResourceType,
) -> Result<(), ValidationError> {
    validate_against_type(resource, rt)?;
    let obj = resource.as_object().ok_or(ValidationError::NotADict)?;
    if obj.contains_key("id") {
        return Err(ValidationError::HasId);
    }
    if obj.contains_key("revision") {
        return Err(ValidationError::HasRevision);
    }
    Ok(())
}

/// Like [`validate_new_resource`], but accepts client-supplied `id` and
/// `revision`. Only callers holding the `set_meta_fields` capability may
/// use this path.
pub fn validate_new_resource_with_id(
    resource: &Value,
    rt: &ResourceType,
) -> Result<(), ValidationError> {
    validate_against_type(resource, rt)
}

/// Validates a resource arriving via PUT: correct type, known fields, and
/// both meta fields present.
pub fn validate_resource_update(
    resource: &Value,
    rt: &ResourceType,
) -> Result<(), ValidationError> {
    validate_against_type(resource, rt)?;
    let obj = resource.as_object().ok_or(ValidationError::NotADict)?;
    if !obj.contains_key("id") {
        return Err(ValidationError::NoId);
    }
    if !obj.contains_key("revision") {
        return Err(ValidationError::NoRevision);
    }
    Ok(())
}

/// Validates a sub-resource body against the prototype of the named
/// sub-path.
pub fn validate_subresource(
    subpath: &str,
    rt: &ResourceType,
    body: &Value,
) -> Result<(), ValidationError> {
    if !body.is_object() {
        return Err(ValidationError::NotADict);
    }
    let proto = rt
        .subprototype(subpath)
        .ok_or_else(|| ValidationError::UnknownSubpath {
            type_name: rt.type_name().to_string(),
            subpath: subpath.to_string(),
        })?;
    check_fields(rt.type_name(), body, proto)
}

fn validate_against_type(resource: &Value, rt: &ResourceType) -> Result<(), ValidationError> {
    let obj = resource.as_object().ok_or(ValidationError::NotADict)?;
    let type_field = obj.get("type").ok_or(ValidationError::NoType)?;
    if type_field.as_str() != Some(rt.type_name()) {
        return Err(ValidationError::WrongType {
            actual: type_field.to_string(),
            expected: rt.type_name().to_string(),
        });
    }
    check_fields(rt.type_name(), resource, rt.prototype())
}

fn check_fields(type_name: &str, resource: &Value, proto: &Value) -> Result<(), ValidationError> {
    let wanted = schema(proto);
    for actual in schema(resource) {
        let ok = wanted
            .iter()
            .any(|w| w.path == actual.path && compatible(actual.kind, w.kind));
        if !ok {
            return Err(ValidationError::UnknownField {
                type_name: type_name.to_string(),
                field: actual.path.join("."),
            });
        }
    }
    Ok(())
}

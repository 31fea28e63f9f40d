//! Core resource model for Qvarn.
//!
//! This crate defines the pieces everything else builds on: resource types
//! with versioned prototypes, the schema and object flatteners, prototype
//! completion, resource validation, and identifier generation.

pub mod flatten;
pub mod idgen;
pub mod resource_type;
pub mod schema;
pub mod time;
pub mod validator;

pub use flatten::flatten_object;
pub use idgen::ResourceIdGenerator;
pub use resource_type::{
    ResourceType, ResourceTypeError, add_missing_fields, load_resource_types,
};
pub use schema::{ElemKind, LeafKind, SchemaEntry, compatible, schema};
pub use self::time::current_timestamp;
pub use validator::{
    ValidationError, validate_new_resource, validate_new_resource_with_id,
    validate_resource_update, validate_subresource,
};

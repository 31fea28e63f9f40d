//! Resource identifier generation.

use uuid::Uuid;

/// Generates opaque, unique resource identifiers and revisions.
///
/// The value is a type-prefixed UUID rendered as text. Only uniqueness and
/// equality matter; the prefix exists to make logs easier to read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceIdGenerator;

impl ResourceIdGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn new_id(&self, resource_type: &str) -> String {
        format!("{}-{}", resource_type, Uuid::new_v4().simple())
    }
}

//! Key schemas and key tuples.
//!
//! A store is opened with a declared set of named keys. Qvarn uses
//! `(obj_id, subpath)`, but the store does not assume that. Key values are
//! always strings; declaring a key of any other type is rejected when the
//! store is created.

use std::collections::BTreeMap;

use crate::error::StoreError;

/// A (possibly partial) key tuple: key name to value.
pub type ObjectKeys = BTreeMap<String, String>;

/// Builds a key tuple from name/value pairs.
pub fn keys(pairs: &[(&str, &str)]) -> ObjectKeys {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// The declarable key types. Only [`KeyType::Str`] is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Str,
    Int,
    Blob,
}

/// The declared keys of a store, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    names: Vec<String>,
}

impl KeySchema {
    /// Declares the keys of a store. Non-string key types are rejected
    /// with [`StoreError::WrongKeyType`].
    pub fn new(declared: &[(&str, KeyType)]) -> Result<Self, StoreError> {
        for (name, key_type) in declared {
            if *key_type != KeyType::Str {
                return Err(StoreError::wrong_key_type(*name));
            }
        }
        Ok(Self {
            names: declared.iter().map(|(name, _)| name.to_string()).collect(),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Checks that every key in the tuple is a declared key.
    pub fn check_keys(&self, keys: &ObjectKeys) -> Result<(), StoreError> {
        for key in keys.keys() {
            if !self.contains(key) {
                return Err(StoreError::unknown_key(key));
            }
        }
        Ok(())
    }

    /// Checks that the tuple names every declared key.
    pub fn check_complete(&self, keys: &ObjectKeys) -> Result<(), StoreError> {
        for name in &self.names {
            if !keys.contains_key(name) {
                return Err(StoreError::missing_key(name));
            }
        }
        Ok(())
    }
}

/// Whether `got` matches the (possibly partial) `wanted` tuple: every
/// wanted key must be present with the same value.
pub fn keys_match(got: &ObjectKeys, wanted: &ObjectKeys) -> bool {
    wanted
        .iter()
        .all(|(key, value)| got.get(key) == Some(value))
}

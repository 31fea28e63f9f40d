//! Storage abstraction for Qvarn.
//!
//! An object store keeps JSON objects and binary blobs addressed by a
//! declared tuple of string keys, plus the fine-grained allow-rule table.
//! All access happens through a transaction handle: commit on success,
//! roll back on error, exactly one outcome per transaction.
//!
//! Two backends implement the traits: the in-memory store in this crate
//! (used by tests) and the durable PostgreSQL store in `qvarn-db-postgres`.

pub mod error;
pub mod keys;
pub mod memory;
pub mod traits;

pub use error::StoreError;
pub use keys::{KeySchema, KeyType, ObjectKeys, keys};
pub use memory::MemoryObjectStore;
pub use traits::{ObjectStore, StoreTransaction};

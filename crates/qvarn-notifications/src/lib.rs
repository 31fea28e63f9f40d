//! Change notifications.
//!
//! Listeners are ordinary resources that subscribe to changes of one
//! resource type. When a resource is created, updated or deleted, every
//! matching listener gets a notification resource recording the change,
//! written in the same transaction as the change itself. This crate holds
//! the pure pieces: the change kinds, the listener matching predicate and
//! the notification record builder. The server wires them to storage.

pub mod listener;

pub use listener::{ResourceChange, build_notification, listener_matches};

//! Listener matching and notification records.

use std::fmt;

use serde_json::{Value, json};

use qvarn_core::current_timestamp;

/// The kind of change a notification records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceChange {
    Created,
    Updated,
    Deleted,
}

impl ResourceChange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a listener wants to hear about a change.
///
/// A listener matches when it watches the changed resource's type and one
/// of: it asked for new resources and the change is a creation; it listens
/// on all changes and the change is not a creation; or the resource id is
/// in its explicit `listen_on` list.
pub fn listener_matches(
    listener: &Value,
    resource_id: &str,
    change: ResourceChange,
    resource_type: &str,
) -> bool {
    if let Some(watched) = listener.get("listen_on_type").and_then(Value::as_str) {
        if !watched.is_empty() && watched != resource_type {
            return false;
        }
    }

    let flag = |name: &str| listener.get(name).and_then(Value::as_bool).unwrap_or(false);

    if change == ResourceChange::Created && flag("notify_of_new") {
        return true;
    }
    if change != ResourceChange::Created && flag("listen_on_all") {
        return true;
    }
    listener
        .get("listen_on")
        .and_then(Value::as_array)
        .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(resource_id)))
}

/// Builds the body of a notification resource for one matching listener.
/// The revision is absent for deletions.
pub fn build_notification(
    listener_id: &str,
    resource_id: &str,
    resource_revision: Option<&str>,
    change: ResourceChange,
) -> Value {
    json!({
        "type": "notification",
        "listener_id": listener_id,
        "resource_id": resource_id,
        "resource_revision": resource_revision,
        "resource_change": change.as_str(),
        "timestamp": current_timestamp(),
    })
}

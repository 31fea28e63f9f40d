//! Startup installation of resource types.
//!
//! The `resource_type` type stores itself, so it goes in first, followed
//! by the other builtin types and finally the user-declared ones from the
//! resource type directory. Everything happens in one transaction before
//! the server accepts requests.

use std::path::Path;

use serde_json::json;

use qvarn_core::{ResourceType, ResourceTypeError, load_resource_types};

use crate::api::QvarnApi;
use crate::error::ApiError;

/// The types every Qvarn instance has.
pub fn builtin_resource_types() -> Result<Vec<ResourceType>, ResourceTypeError> {
    let specs = [
        json!({
            "type": "resource_type",
            "path": "/resource_types",
            "versions": [{
                "version": "v0",
                "prototype": {
                    "id": "",
                    "type": "",
                    "revision": "",
                    "path": "",
                    "spec": {
                        "type": "",
                        "path": "",
                        "versions": [],
                    },
                },
            }],
        }),
        json!({
            "type": "listener",
            "path": "/listeners",
            "versions": [{
                "version": "v0",
                "prototype": {
                    "id": "",
                    "type": "",
                    "revision": "",
                    "notify_of_new": false,
                    "listen_on_all": false,
                    "listen_on": [""],
                    "listen_on_type": "",
                },
            }],
        }),
        json!({
            "type": "notification",
            "path": "/notifications",
            "versions": [{
                "version": "v0",
                "prototype": {
                    "id": "",
                    "type": "",
                    "revision": "",
                    "listener_id": "",
                    "resource_id": "",
                    "resource_revision": "",
                    "resource_change": "",
                    "timestamp": "",
                },
            }],
        }),
        json!({
            "type": "access",
            "path": "/accesses",
            "versions": [{
                "version": "v0",
                "prototype": {
                    "id": "",
                    "type": "",
                    "revision": "",
                    "resource_type": "",
                    "resource_ids": [""],
                    "resource_revision": "",
                    "operation": "",
                    "accessors": [{
                        "accessor_id": "",
                        "accessor_type": "",
                    }],
                    "why": "",
                    "timestamp": "",
                },
            }],
        }),
    ];
    specs.iter().map(ResourceType::from_spec).collect()
}

/// Installs the builtin types and the ones declared in the resource type
/// directory, in one transaction.
pub async fn install_resource_types(
    api: &QvarnApi,
    resource_type_dir: Option<&Path>,
) -> Result<(), ApiError> {
    let mut tx = api.transaction().await?;

    let result = async {
        for rt in builtin_resource_types()? {
            api.add_resource_type(tx.as_mut(), &rt).await?;
        }
        if let Some(dir) = resource_type_dir {
            for rt in load_resource_types(dir)? {
                tracing::info!(
                    type_name = rt.type_name(),
                    path = rt.path(),
                    "installing resource type"
                );
                api.add_resource_type(tx.as_mut(), &rt).await?;
            }
        }
        Ok::<(), ApiError>(())
    }
    .await;

    match result {
        Ok(()) => Ok(tx.commit().await?),
        Err(err) => {
            let _ = tx.rollback().await;
            Err(err)
        }
    }
}

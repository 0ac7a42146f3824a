//! Status publisher.
//!
//! Writes controller-owned status back onto a custom resource. Each write
//! re-reads the resource, computes the status against that fresh copy and
//! sends a merge patch carrying the copy's `resourceVersion`, so a stale
//! write is rejected by the API server instead of clobbering newer data.
//! One conflict is retried in-pass; a second one is returned to the caller.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::StatusOwner;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Read/status-write access to one kind of resource.
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Current copy of the named resource.
    async fn fetch(&self, name: &str) -> Result<K, ControllerError>;

    /// Merge-patches the status subresource. With `resource_version` set, a
    /// concurrent write since that version yields `ControllerError::Conflict`.
    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: serde_json::Value,
    ) -> Result<(), ControllerError>;
}

#[async_trait]
impl<K> ResourceStore<K> for Api<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn fetch(&self, name: &str) -> Result<K, ControllerError> {
        match self.get(name).await {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                Err(ControllerError::NotFound(name.to_string()))
            }
            Err(e) => Err(ControllerError::Kube(e)),
        }
    }

    async fn patch_status(
        &self,
        name: &str,
        resource_version: Option<String>,
        status: serde_json::Value,
    ) -> Result<(), ControllerError> {
        let patch = match resource_version {
            Some(rv) => serde_json::json!({ "metadata": { "resourceVersion": rv }, "status": status }),
            None => serde_json::json!({ "status": status }),
        };
        match self
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 409 => {
                Err(ControllerError::Conflict(api_err.message))
            }
            Err(e) => Err(ControllerError::Kube(e)),
        }
    }
}

/// Publishes the status computed by `compute` onto the named resource.
///
/// Returns the status now stored on the resource. No write happens when it
/// already equals the computed one.
pub async fn publish_status<K, F>(
    store: &dyn ResourceStore<K>,
    name: &str,
    compute: F,
) -> Result<K::Status, ControllerError>
where
    K: Resource + StatusOwner + Send + Sync,
    F: Fn(&K) -> K::Status + Send + Sync,
{
    let mut retried = false;
    loop {
        let current = store.fetch(name).await?;
        let desired = compute(&current);

        if current.current_status() == Some(&desired) {
            debug!("Status of {} unchanged, skipping write", name);
            return Ok(desired);
        }

        let body = serde_json::to_value(&desired)?;
        let resource_version = current.meta().resource_version.clone();

        match store.patch_status(name, resource_version, body).await {
            Ok(()) => return Ok(desired),
            Err(ControllerError::Conflict(msg)) if !retried => {
                warn!("Status write for {} conflicted ({}), retrying once", name, msg);
                retried = true;
            }
            Err(e) => return Err(e),
        }
    }
}

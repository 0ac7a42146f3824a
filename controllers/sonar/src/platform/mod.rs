//! Platform adapter.
//!
//! Cluster-side side effects needed while provisioning a Sonar instance,
//! behind a trait so reconcilers can run against an in-memory fake.

mod cluster;
#[cfg(test)]
pub mod mock;

pub use cluster::KubePlatform;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a platform adapter
#[derive(Debug, Error)]
pub enum PlatformError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Endpoint could not be resolved before the deadline
    #[error("Endpoint unresolved: {0}")]
    EndpointUnresolved(String),

    /// The named object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An object exists but lacks expected data
    #[error("Missing data: {0}")]
    MissingData(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlatformError {
    /// True when the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            PlatformError::NotFound(_) => true,
            PlatformError::Kube(kube::Error::Api(response)) => response.code == 404,
            _ => false,
        }
    }
}

/// Result of ensuring a config map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Identifies a generated object that should carry an owner reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectTarget {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// A component catalog entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub url: String,
    pub icon: String,
}

/// Capability surface consumed by the Sonar reconciler.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Creates a config map, or replaces its data if it differs.
    async fn ensure_config_map(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
        owner: &OwnerReference,
    ) -> Result<ApplyOutcome, PlatformError>;

    /// Creates or locates the CI script artifact sourced from a config map.
    async fn ensure_ci_script(&self, namespace: &str, name: &str, config_map: &str) -> Result<ObjectTarget, PlatformError>;

    /// Creates or locates a CI service account of the given kind.
    async fn ensure_ci_service_account(
        &self,
        namespace: &str,
        name: &str,
        kind: &str,
        credentials_secret: &str,
    ) -> Result<ObjectTarget, PlatformError>;

    /// Creates a secret if absent. Returns the data of the created or existing secret.
    async fn ensure_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
        owner: &OwnerReference,
    ) -> Result<BTreeMap<String, Vec<u8>>, PlatformError>;

    /// Externally reachable host of the named service.
    async fn resolve_endpoint(&self, namespace: &str, name: &str, timeout: Duration) -> Result<String, PlatformError>;

    /// Secret data by name. A missing secret is `PlatformError::NotFound`.
    async fn read_secret(&self, namespace: &str, name: &str) -> Result<BTreeMap<String, Vec<u8>>, PlatformError>;

    /// Adds `owner` to the target's owner references if missing.
    async fn set_owner(&self, namespace: &str, target: &ObjectTarget, owner: &OwnerReference) -> Result<(), PlatformError>;

    /// Creates a catalog entry if absent. An existing entry is not an error.
    async fn ensure_catalog_entry(&self, namespace: &str, entry: &CatalogEntry) -> Result<(), PlatformError>;

    /// Ready replicas of the named deployment. `None` when unknown.
    async fn ready_replicas(&self, namespace: &str, name: &str) -> Result<Option<i32>, PlatformError>;
}

/// Reads a UTF-8 value from secret data.
pub fn secret_value(data: &BTreeMap<String, Vec<u8>>, key: &str) -> Result<String, PlatformError> {
    let bytes = data
        .get(key)
        .ok_or_else(|| PlatformError::MissingData(format!("secret has no '{}' key", key)))?;
    String::from_utf8(bytes.clone())
        .map_err(|_| PlatformError::MissingData(format!("secret key '{}' is not UTF-8", key)))
}

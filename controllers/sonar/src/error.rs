//! Controller-specific error types.
//!
//! This module defines error types specific to the Sonar controller
//! that are not covered by upstream library errors.

use crate::platform::PlatformError;
use kube::Error as KubeError;
use sonar_client::SonarError;
use thiserror::Error;

/// Errors that can occur in the Sonar controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Sonar API error
    #[error("Sonar error: {0}")]
    Sonar(#[from] SonarError),

    /// Cluster-side side effect failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Invalid configuration or malformed spec
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Referenced resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Owning Sonar instance cannot be used yet
    #[error("Sonar unavailable: {0}")]
    SonarUnavailable(String),

    /// Supporting objects could not all be ensured
    #[error("Provisioning incomplete: {0}")]
    Provisioning(String),

    /// Some grant/revoke calls failed; applied changes are kept
    #[error("Partially applied: {failed} of {total} groups failed: {details}")]
    PartialApply {
        failed: usize,
        total: usize,
        details: String,
    },

    /// Optimistic-concurrency collision on a status write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Pass cancelled by deadline or shutdown
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Finalizer bookkeeping failed
    #[error("Finalizer error: {0}")]
    Finalizer(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Validation errors are terminal for the pass and not backed off.
    pub fn is_validation(&self) -> bool {
        matches!(self, ControllerError::InvalidConfig(_))
    }
}

//! Sonar client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Sonar API
#[derive(Debug, Error)]
pub enum SonarError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Sonar API returned an error
    #[error("Sonar API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, insufficient rights)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SonarError {
    /// True when the error means the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SonarError::NotFound(_))
    }
}

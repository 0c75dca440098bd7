//! Object store errors

use thiserror::Error;

/// Errors that can occur when reading or writing the object store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Object rejected by the store (missing name, bad shape, ...)
    #[error("Invalid object: {0}")]
    Invalid(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Map a kube client error onto the store taxonomy
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => StoreError::NotFound(what.to_string()),
                409 if response.reason == "AlreadyExists" => {
                    StoreError::AlreadyExists(what.to_string())
                }
                409 => StoreError::Conflict(format!("{}: {}", what, response.message)),
                422 => StoreError::Invalid(format!("{}: {}", what, response.message)),
                _ => StoreError::Kube(kube::Error::Api(response)),
            },
            other => StoreError::Kube(other),
        }
    }

    /// Whether the object was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether a concurrent writer won the race
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

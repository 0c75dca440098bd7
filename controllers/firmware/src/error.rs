//! Controller-specific error types.
//!
//! Errors from the object store and the Redfish facade are wrapped here so a
//! reconcile pass can bubble any of them up with `?`. The watcher uses
//! [`ControllerError::is_transient`] to decide between a quiet requeue and a
//! logged failure.

use kube::Error as KubeError;
use metal_store::StoreError;
use redfish_client::RedfishError;
use thiserror::Error;

/// Errors that can occur in the firmware controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Redfish API error
    #[error("Redfish error: {0}")]
    Redfish(#[from] RedfishError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource without name (or namespace where one is required)
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),

    /// Resource spec rejected before any work was done
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced server does not exist
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether retrying the same reconcile later can succeed without any
    /// change to the resource.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Kube(_) | ControllerError::ServerNotFound(_) => true,
            ControllerError::Store(e) => !matches!(e, StoreError::Invalid(_) | StoreError::Serialization(_)),
            ControllerError::Redfish(e) => e.is_transient(),
            ControllerError::Serialization(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::MissingObjectKey(_)
            | ControllerError::Validation(_)
            | ControllerError::Watch(_) => false,
        }
    }

    /// Whether a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(e) if e.is_conflict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ControllerError::Store(StoreError::Conflict("server a".into())).is_transient());
        assert!(ControllerError::Redfish(RedfishError::Transient("timeout".into())).is_transient());
        assert!(ControllerError::ServerNotFound("a".into()).is_transient());

        assert!(!ControllerError::Redfish(RedfishError::Fatal("rejected".into())).is_transient());
        assert!(!ControllerError::Validation("duplicate priority".into()).is_transient());
        assert!(!ControllerError::Store(StoreError::Invalid("no name".into())).is_transient());

        assert!(ControllerError::Store(StoreError::Conflict("server a".into())).is_conflict());
        assert!(!ControllerError::ServerNotFound("a".into()).is_conflict());
    }
}

//! Redfish client errors

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when talking to a BMC
#[derive(Debug, Error)]
pub enum RedfishError {
    /// Resource (system, manager, task, registry) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout, connection failure or server-side error; worth retrying
    #[error("Transient error: {0}")]
    Transient(String),

    /// The BMC is busy with another task
    #[error("Task in progress: {0}")]
    TaskInProgress(String),

    /// Request rejected or response unusable
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RedfishError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, context: &str, body: &str) -> Self {
        let message = format!("{context} failed: {status} - {body}");
        if status == StatusCode::NOT_FOUND {
            Self::NotFound(message)
        } else if status == StatusCode::CONFLICT || body.contains("TaskInProgress") {
            Self::TaskInProgress(message)
        } else if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            Self::Transient(message)
        } else {
            Self::Fatal(message)
        }
    }

    /// Whether the operation should simply be retried later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transient(_) | Self::TaskInProgress(_) => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::NotFound(_) | Self::Fatal(_) | Self::Serialization(_) => false,
        }
    }

    /// Whether the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

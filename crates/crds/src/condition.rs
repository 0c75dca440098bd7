//! Status conditions
//!
//! Conditions form an append-indexed log on a resource status. The `type`
//! string is unique within one status and either names a resource-wide tag
//! (`serverMaintenanceCreated`) or a step-scoped tag with a priority suffix
//! (`verifySetting-100`).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status value `True`
pub const CONDITION_TRUE: &str = "True";
/// Condition status value `False`
pub const CONDITION_FALSE: &str = "False";
/// Condition status value `Unknown`
pub const CONDITION_UNKNOWN: &str = "Unknown";

/// A single typed status record
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type, unique within a status
    #[serde(rename = "type")]
    pub r#type: String,

    /// One of `True`, `False`, `Unknown`
    pub status: String,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Time of the last status transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Generation of the resource when the condition was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Whether the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

//! BIOSSettings CRD
//!
//! Desired BIOS configuration for one server, expressed as a priority-ordered
//! settings flow. Each flow item is applied as a separate step with its own
//! per-priority conditions.

use crate::condition::Condition;
use crate::references::{LocalObjectReference, ObjectReference};
use crate::server_maintenance::ServerMaintenancePolicy;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BIOSSettings",
    status = "BIOSSettingsStatus",
    shortname = "biossettings",
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.serverRef.name"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsSpec {
    /// Target server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<LocalObjectReference>,

    /// BIOS version the settings were written for
    pub version: String,

    /// Ordered setting groups, applied by ascending priority
    #[serde(default)]
    pub settings_flow: Vec<SettingsFlowItem>,

    /// Policy for the maintenance requested on the server
    #[serde(default)]
    pub server_maintenance_policy: ServerMaintenancePolicy,

    /// Maintenance currently held for this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<ObjectReference>,

    /// Automatic retries after a non-validation failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auto_retry_count: Option<i32>,
}

/// One step of a settings flow
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SettingsFlowItem {
    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Strictly positive, unique within the flow
    pub priority: i32,

    /// Attribute values to apply in this step
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsStatus {
    /// Phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SettingsState>,

    /// Highest priority applied and verified
    #[serde(default)]
    pub applied_setting_priority: i32,

    /// Priority of the step being applied (0 before the first step)
    #[serde(default)]
    pub current_setting_priority: i32,

    /// When the flow last completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<DateTime<Utc>>,

    /// Step log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Automatic retries left
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_retry_count_remaining: Option<i32>,
}

/// Phase of a settings resource (BIOS or BMC)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum SettingsState {
    /// Waiting to start (version gate, maintenance negotiation)
    #[serde(alias = "pending")]
    Pending,
    /// A step is being applied
    #[serde(alias = "inProgress", alias = "inprogress")]
    InProgress,
    /// Between two steps of a flow
    #[serde(alias = "inWaiting", alias = "inwaiting")]
    InWaiting,
    /// Every step applied and verified
    #[serde(alias = "applied")]
    Applied,
    /// Stopped; needs a retry
    #[serde(alias = "failed")]
    Failed,
}

impl BIOSSettings {
    /// Phase, `None` before the first reconcile
    pub fn state(&self) -> Option<SettingsState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

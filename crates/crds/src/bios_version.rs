//! BIOSVersion CRD
//!
//! Desired BIOS firmware image for one server. The upgrade runs as an
//! asynchronous Redfish task whose monitor URI is kept in status.

use crate::condition::Condition;
use crate::references::{LocalObjectReference, ObjectReference};
use crate::server_maintenance::ServerMaintenancePolicy;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BIOSVersion",
    status = "BIOSVersionStatus",
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.serverRef.name"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionSpec {
    /// Target server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<LocalObjectReference>,

    /// Firmware version expected after the upgrade
    pub version: String,

    /// Firmware image
    pub image: ImageSpec,

    /// Upgrade even when the version already matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

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

/// Firmware image location
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image URI passed to the BMC update service
    #[serde(rename = "URI")]
    pub uri: String,

    /// Transfer protocol (HTTP, HTTPS, NFS, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_protocol: Option<String>,

    /// Credentials for fetching the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<LocalObjectReference>,
}

/// Upgrade policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum UpdatePolicy {
    /// Skip the upgrade when the version already matches
    Normal,
    /// Always flash the image
    Force,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionStatus {
    /// Phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<VersionState>,

    /// Remote upgrade task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_task: Option<UpgradeTask>,

    /// When the upgrade last completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<DateTime<Utc>>,

    /// Upgrade log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Automatic retries left
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_retry_count_remaining: Option<i32>,
}

/// Remote firmware upgrade task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTask {
    /// Task monitor URI
    #[serde(rename = "URI")]
    pub uri: String,

    /// Last observed task state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<UpgradeTaskState>,

    /// Last observed progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<i32>,
}

/// Observed state of a remote upgrade task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum UpgradeTaskState {
    /// Still running
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

/// Phase of a version resource (BIOS or BMC)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum VersionState {
    /// Waiting to start
    #[serde(alias = "pending")]
    Pending,
    /// Upgrade running
    #[serde(alias = "inProgress", alias = "inprogress")]
    InProgress,
    /// Version verified
    #[serde(alias = "completed")]
    Completed,
    /// Stopped; needs a retry
    #[serde(alias = "failed")]
    Failed,
}

impl BIOSVersion {
    /// Phase, `None` before the first reconcile
    pub fn state(&self) -> Option<VersionState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

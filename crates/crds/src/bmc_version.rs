//! BMCVersion CRD
//!
//! Desired BMC firmware image. Holds one maintenance reference per server the
//! BMC serves; every one of them must be in maintenance before flashing.

use crate::bios_version::{ImageSpec, UpdatePolicy, UpgradeTask, VersionState};
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
    kind = "BMCVersion",
    status = "BMCVersionStatus",
    printcolumn = r#"{"name":"BMC", "type":"string", "jsonPath":".spec.bmcRef.name"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BMCVersionSpec {
    /// Target BMC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<LocalObjectReference>,

    /// Firmware version expected after the upgrade
    pub version: String,

    /// Firmware image
    pub image: ImageSpec,

    /// Upgrade even when the version already matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

    /// Policy for the maintenances requested on served servers
    #[serde(default)]
    pub server_maintenance_policy: ServerMaintenancePolicy,

    /// Maintenances held for this resource, one per served server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_maintenance_refs: Vec<ObjectReference>,

    /// Automatic retries after a non-validation failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auto_retry_count: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCVersionStatus {
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

impl BMCVersion {
    /// Phase, `None` before the first reconcile
    pub fn state(&self) -> Option<VersionState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

//! BMCSettings CRD
//!
//! Desired manager attributes for one BMC. Because a BMC can serve several
//! servers, the resource holds one maintenance reference per served server.

use crate::bios_settings::SettingsState;
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
    kind = "BMCSettings",
    status = "BMCSettingsStatus",
    printcolumn = r#"{"name":"BMC", "type":"string", "jsonPath":".spec.bmcRef.name"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BMCSettingsSpec {
    /// Target BMC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<LocalObjectReference>,

    /// BMC firmware version the settings were written for
    pub version: String,

    /// Manager attribute values
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

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
pub struct BMCSettingsStatus {
    /// Phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SettingsState>,

    /// When the settings were last applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<DateTime<Utc>>,

    /// Step log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Automatic retries left
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_retry_count_remaining: Option<i32>,
}

impl BMCSettings {
    /// Phase, `None` before the first reconcile
    pub fn state(&self) -> Option<SettingsState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

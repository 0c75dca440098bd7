//! BMCSettingsSet CRD
//!
//! Fans a BMCSettings template out to every BMC matching a label selector.
//! Template maintenance references are filtered per child to the servers that
//! child's BMC serves.

use crate::bmc_settings::BMCSettingsSpec;
use crate::references::{LocalObjectReference, ObjectReference};
use crate::selector::LabelSelector;
use crate::server_maintenance::ServerMaintenancePolicy;
use crate::set_status::SetStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BMCSettingsSet",
    status = "SetStatus",
    printcolumn = r#"{"name":"Selected", "type":"integer", "jsonPath":".status.fullyLabeled"}"#,
    printcolumn = r#"{"name":"Completed", "type":"integer", "jsonPath":".status.completed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BMCSettingsSetSpec {
    /// BMCs to configure
    #[serde(default)]
    pub bmc_selector: LabelSelector,

    /// Template copied into every child
    pub bmc_settings_template: BMCSettingsTemplate,
}

/// BMCSettings fields shared by every child of a set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCSettingsTemplate {
    /// BMC firmware version the settings were written for
    pub version: String,

    /// Manager attribute values
    #[serde(default)]
    pub settings: BTreeMap<String, String>,

    /// Maintenance policy for children
    #[serde(default)]
    pub server_maintenance_policy: ServerMaintenancePolicy,

    /// Pre-created maintenances, filtered per BMC
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_maintenance_refs: Vec<ObjectReference>,

    /// Automatic retries for children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auto_retry_count: Option<i32>,
}

impl BMCSettingsTemplate {
    /// Child spec for `bmc` with an already filtered maintenance list
    pub fn to_spec(&self, bmc: &str, server_maintenance_refs: Vec<ObjectReference>) -> BMCSettingsSpec {
        BMCSettingsSpec {
            bmc_ref: Some(LocalObjectReference::new(bmc)),
            version: self.version.clone(),
            settings: self.settings.clone(),
            server_maintenance_policy: self.server_maintenance_policy,
            server_maintenance_refs,
            failed_auto_retry_count: self.failed_auto_retry_count,
        }
    }
}

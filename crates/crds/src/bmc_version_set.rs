//! BMCVersionSet CRD
//!
//! Fans a BMCVersion template out to every BMC matching a label selector.

use crate::bios_version::{ImageSpec, UpdatePolicy};
use crate::bmc_version::BMCVersionSpec;
use crate::references::{LocalObjectReference, ObjectReference};
use crate::selector::LabelSelector;
use crate::server_maintenance::ServerMaintenancePolicy;
use crate::set_status::SetStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BMCVersionSet",
    status = "SetStatus",
    printcolumn = r#"{"name":"Selected", "type":"integer", "jsonPath":".status.fullyLabeled"}"#,
    printcolumn = r#"{"name":"Completed", "type":"integer", "jsonPath":".status.completed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BMCVersionSetSpec {
    /// BMCs to upgrade
    #[serde(default)]
    pub bmc_selector: LabelSelector,

    /// Template copied into every child
    pub bmc_version_template: BMCVersionTemplate,
}

/// BMCVersion fields shared by every child of a set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCVersionTemplate {
    /// Expected firmware version
    pub version: String,

    /// Firmware image
    pub image: ImageSpec,

    /// Upgrade policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<UpdatePolicy>,

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

impl BMCVersionTemplate {
    /// Child spec for `bmc` with an already filtered maintenance list
    pub fn to_spec(&self, bmc: &str, server_maintenance_refs: Vec<ObjectReference>) -> BMCVersionSpec {
        BMCVersionSpec {
            bmc_ref: Some(LocalObjectReference::new(bmc)),
            version: self.version.clone(),
            image: self.image.clone(),
            update_policy: self.update_policy,
            server_maintenance_policy: self.server_maintenance_policy,
            server_maintenance_refs,
            failed_auto_retry_count: self.failed_auto_retry_count,
        }
    }
}

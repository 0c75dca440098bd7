//! BIOSVersionSet CRD
//!
//! Fans a BIOSVersion template out to every server matching a label selector.

use crate::bios_version::{BIOSVersionSpec, ImageSpec, UpdatePolicy};
use crate::references::LocalObjectReference;
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
    kind = "BIOSVersionSet",
    status = "SetStatus",
    printcolumn = r#"{"name":"Selected", "type":"integer", "jsonPath":".status.fullyLabeled"}"#,
    printcolumn = r#"{"name":"Completed", "type":"integer", "jsonPath":".status.completed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionSetSpec {
    /// Servers to upgrade
    #[serde(default)]
    pub server_selector: LabelSelector,

    /// Template copied into every child
    pub bios_version_template: BIOSVersionTemplate,
}

/// BIOSVersion fields shared by every child of a set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BIOSVersionTemplate {
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

    /// Automatic retries for children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auto_retry_count: Option<i32>,
}

impl BIOSVersionTemplate {
    /// Child spec for `server`, keeping the child's own maintenance reference
    pub fn to_spec(&self, server: &str, current: Option<&BIOSVersionSpec>) -> BIOSVersionSpec {
        BIOSVersionSpec {
            server_ref: Some(LocalObjectReference::new(server)),
            version: self.version.clone(),
            image: self.image.clone(),
            update_policy: self.update_policy,
            server_maintenance_policy: self.server_maintenance_policy,
            server_maintenance_ref: current.and_then(|c| c.server_maintenance_ref.clone()),
            failed_auto_retry_count: self.failed_auto_retry_count,
        }
    }
}

//! BIOSSettingsSet CRD
//!
//! Fans a BIOSSettings template out to every server matching a label selector.

use crate::bios_settings::{BIOSSettingsSpec, SettingsFlowItem};
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
    kind = "BIOSSettingsSet",
    status = "SetStatus",
    printcolumn = r#"{"name":"Selected", "type":"integer", "jsonPath":".status.fullyLabeled"}"#,
    printcolumn = r#"{"name":"Completed", "type":"integer", "jsonPath":".status.completed"}"#,
    printcolumn = r#"{"name":"Failed", "type":"integer", "jsonPath":".status.failed"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsSetSpec {
    /// Servers to configure
    #[serde(default)]
    pub server_selector: LabelSelector,

    /// Template copied into every child
    pub bios_settings_template: BIOSSettingsTemplate,
}

/// BIOSSettings fields shared by every child of a set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BIOSSettingsTemplate {
    /// BIOS version the settings were written for
    pub version: String,

    /// Ordered setting groups
    #[serde(default)]
    pub settings_flow: Vec<SettingsFlowItem>,

    /// Maintenance policy for children
    #[serde(default)]
    pub server_maintenance_policy: ServerMaintenancePolicy,

    /// Automatic retries for children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_auto_retry_count: Option<i32>,
}

impl BIOSSettingsTemplate {
    /// Child spec for `server`, keeping the child's own maintenance reference
    pub fn to_spec(
        &self,
        server: &str,
        current: Option<&BIOSSettingsSpec>,
    ) -> BIOSSettingsSpec {
        BIOSSettingsSpec {
            server_ref: Some(LocalObjectReference::new(server)),
            version: self.version.clone(),
            settings_flow: self.settings_flow.clone(),
            server_maintenance_policy: self.server_maintenance_policy,
            server_maintenance_ref: current.and_then(|c| c.server_maintenance_ref.clone()),
            failed_auto_retry_count: self.failed_auto_retry_count,
        }
    }
}

//! ServerMaintenance CRD
//!
//! A reservation of a server for exclusive access. At most one maintenance can
//! hold `server.spec.maintenanceRef` at a time; the lease is taken with a
//! resource-version checked replace of the Server.

use crate::references::LocalObjectReference;
use crate::server::Power;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "ServerMaintenance",
    namespaced,
    status = "ServerMaintenanceStatus",
    shortname = "sm",
    printcolumn = r#"{"name":"Server", "type":"string", "jsonPath":".spec.serverRef.name"}"#,
    printcolumn = r#"{"name":"Policy", "type":"string", "jsonPath":".spec.policy"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerMaintenanceSpec {
    /// Approval policy for entering maintenance
    #[serde(default)]
    pub policy: ServerMaintenancePolicy,

    /// Server to reserve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<LocalObjectReference>,

    /// Power to apply once the lease is held
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_power: Option<Power>,

    /// Boot configuration to serve while in maintenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_boot_configuration_template: Option<ServerBootConfigurationTemplate>,
}

/// Boot configuration synthesized while a server is in maintenance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerBootConfigurationTemplate {
    /// Name of the ServerBootConfiguration to create
    pub name: String,

    /// OS image to serve
    pub image: String,

    /// Ignition payload for the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_secret_ref: Option<LocalObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMaintenanceStatus {
    /// Lease state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServerMaintenanceState>,
}

/// How a maintenance obtains the server from its current owner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ServerMaintenancePolicy {
    /// Take the server regardless of the claim owner
    #[default]
    #[serde(alias = "enforced")]
    Enforced,
    /// Wait for the claim owner to approve
    #[serde(alias = "ownerApproval", alias = "ownerapproval")]
    OwnerApproval,
}

/// Maintenance lease state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ServerMaintenanceState {
    /// Waiting for eligibility or for the server lease
    #[serde(alias = "pending")]
    Pending,
    /// Lease held
    #[serde(alias = "inMaintenance", alias = "inmaintenance")]
    InMaintenance,
    /// Boot configuration failed
    #[serde(alias = "failed")]
    Failed,
    /// Work finished
    #[serde(alias = "completed")]
    Completed,
}

impl ServerMaintenance {
    /// Lease state, `None` before the first reconcile
    pub fn state(&self) -> Option<ServerMaintenanceState> {
        self.status.as_ref().and_then(|s| s.state)
    }
}

//! Server CRD
//!
//! The physical machine. The firmware controllers read its BMC wiring, claim and
//! power state, and write the exclusive references (`maintenanceRef`,
//! `biosSettingsRef`, `biosVersionRef`) plus `power`.

use crate::references::{LocalObjectReference, ObjectReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "Server",
    status = "ServerStatus",
    printcolumn = r#"{"name":"UUID", "type":"string", "jsonPath":".spec.uuid"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"PowerState", "type":"string", "jsonPath":".status.powerState"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// System UUID as reported by the BMC
    pub uuid: String,

    /// Desired power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,

    /// BMC serving this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<LocalObjectReference>,

    /// Inline BMC access, used when no BMC resource exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<BMCAccess>,

    /// Claim currently holding the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_claim_ref: Option<ObjectReference>,

    /// Maintenance currently holding the exclusive lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_ref: Option<ObjectReference>,

    /// BIOSSettings currently driving this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_settings_ref: Option<LocalObjectReference>,

    /// BIOSVersion currently driving this server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_version_ref: Option<LocalObjectReference>,

    /// Boot configuration synthesized by the active maintenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_boot_configuration_ref: Option<ObjectReference>,
}

/// Inline BMC access for servers without a BMC resource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCAccess {
    /// BMC address (IP or hostname)
    pub address: String,

    /// Redfish port, defaults to 443
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Credentials for the BMC
    pub bmc_secret_ref: LocalObjectReference,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Lifecycle state
    #[serde(default)]
    pub state: ServerState,

    /// Observed power state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<ServerPowerState>,

    /// Observed BIOS version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bios_version: Option<String>,
}

/// Desired power of a server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum Power {
    /// Powered on
    #[serde(alias = "on")]
    On,
    /// Powered off
    #[serde(alias = "off")]
    Off,
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ServerState {
    /// Newly registered
    #[default]
    #[serde(alias = "initial")]
    Initial,
    /// Being discovered by the probe agent
    #[serde(alias = "discovery")]
    Discovery,
    /// Ready to be claimed
    #[serde(alias = "available")]
    Available,
    /// Claimed by a ServerClaim
    #[serde(alias = "reserved")]
    Reserved,
    /// Discovery or management failed
    #[serde(alias = "error")]
    Error,
    /// Held by a ServerMaintenance
    #[serde(alias = "maintenance")]
    Maintenance,
}

/// Power state observed through the BMC
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ServerPowerState {
    /// Powered on
    On,
    /// Powered off
    Off,
    /// Transitioning to on
    PoweringOn,
    /// Transitioning to off
    PoweringOff,
    /// Paused
    Paused,
}

impl Server {
    /// Observed power state, if any
    pub fn power_state(&self) -> Option<ServerPowerState> {
        self.status.as_ref().and_then(|s| s.power_state)
    }

    /// Observed lifecycle state (`Initial` when no status has been written)
    pub fn state(&self) -> ServerState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}

//! BMC CRD
//!
//! A baseboard management controller endpoint. One BMC may serve several
//! servers (`server.spec.bmcRef`).

use crate::references::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "BMC",
    status = "BMCStatus",
    printcolumn = r#"{"name":"Address", "type":"string", "jsonPath":".spec.endpoint.address"}"#,
    printcolumn = r#"{"name":"Firmware", "type":"string", "jsonPath":".status.firmwareVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BMCSpec {
    /// Network endpoint of the BMC
    pub endpoint: BMCEndpointSpec,

    /// Credentials for the BMC
    pub bmc_secret_ref: LocalObjectReference,

    /// BMCSettings currently driving this BMC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc_settings_ref: Option<LocalObjectReference>,
}

/// BMC network endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCEndpointSpec {
    /// IP address or hostname
    pub address: String,

    /// Redfish port, defaults to 443
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BMCStatus {
    /// Reachability of the BMC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<BMCState>,

    /// Observed firmware version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// BMC reachability
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum BMCState {
    /// Reachable and managed
    Enabled,
    /// Not reachable or misconfigured
    Error,
    /// Not yet probed
    Pending,
}

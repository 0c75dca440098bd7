//! ServerBootConfiguration CRD
//!
//! Instructs the boot subsystem to serve an OS image to a server. Created by a
//! ServerMaintenance that carries a boot configuration template and owned by it.

use crate::references::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "ServerBootConfiguration",
    namespaced,
    status = "ServerBootConfigurationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerBootConfigurationSpec {
    /// Server to boot
    pub server_ref: LocalObjectReference,

    /// OS image to serve
    pub image: String,

    /// Ignition payload for the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignition_secret_ref: Option<LocalObjectReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerBootConfigurationStatus {
    /// Readiness of the boot configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ServerBootConfigurationState>,
}

/// Boot configuration readiness
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ServerBootConfigurationState {
    /// Being prepared
    #[serde(alias = "pending")]
    Pending,
    /// Served to the server
    #[serde(alias = "ready")]
    Ready,
    /// Could not be prepared
    #[serde(alias = "error")]
    Error,
}

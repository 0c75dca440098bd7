//! ServerClaim CRD
//!
//! A tenant's claim on a server. The firmware controllers only interact with
//! it through the maintenance annotations (`maintenance-needed`,
//! `maintenance-reason`, `maintenance-approval`).

use crate::references::LocalObjectReference;
use crate::server::Power;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "metal.ironcore.dev",
    version = "v1alpha1",
    kind = "ServerClaim",
    namespaced,
    status = "ServerClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerClaimSpec {
    /// Desired power of the claimed server
    pub power: Power,

    /// Claimed server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<LocalObjectReference>,

    /// OS image to boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerClaimStatus {
    /// Binding phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ServerClaimPhase>,
}

/// ServerClaim binding phase
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum ServerClaimPhase {
    /// Bound to a server
    Bound,
    /// Waiting for a server
    Unbound,
}

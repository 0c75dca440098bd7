//! BMCSecret CRD
//!
//! Credential material for a BMC. Values are base64 encoded, like a core
//! Secret's `data` map.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data key holding the base64-encoded username
pub const BMC_SECRET_USERNAME_KEY: &str = "username";
/// Data key holding the base64-encoded password
pub const BMC_SECRET_PASSWORD_KEY: &str = "password";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(group = "metal.ironcore.dev", version = "v1alpha1", kind = "BMCSecret")]
#[serde(rename_all = "camelCase")]
pub struct BMCSecretSpec {
    /// Base64-encoded credential values
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

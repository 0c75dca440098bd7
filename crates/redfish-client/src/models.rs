//! Redfish models
//!
//! Public types the controllers pass around, plus the subset of the Redfish
//! schema (ComputerSystem, Bios, Manager, Task, AttributeRegistry) the client
//! decodes. Field names on wire types follow the DMTF PascalCase schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute map with values rendered as strings
pub type Attributes = BTreeMap<String, String>;

/// Connection material for one BMC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcEndpoint {
    /// BMC address (IP or hostname)
    pub address: String,
    /// HTTPS port, 443 when unset
    pub port: Option<u16>,
    /// Basic-auth user
    pub username: String,
    /// Basic-auth password
    pub password: String,
}

/// Firmware image handed to SimpleUpdate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareImage {
    /// Image location
    pub uri: String,
    /// Transfer protocol (HTTP, HTTPS, NFS, ...), BMC default when unset
    pub transfer_protocol: Option<String>,
    /// Credentials for fetching the image
    pub username: Option<String>,
    /// Credentials for fetching the image
    pub password: Option<String>,
    /// Apply even when the BMC reports the same version
    pub force: bool,
}

/// ResetType values of ComputerSystem.Reset and Manager.Reset
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResetType {
    On,
    ForceOff,
    GracefulShutdown,
    GracefulRestart,
    ForceRestart,
    PowerCycle,
}

/// Coarse state of an asynchronous task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Failed,
}

/// Snapshot of a task monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub uri: String,
    pub state: TaskState,
    pub percent_complete: Option<i32>,
    pub message: Option<String>,
}

/// Manager (the BMC itself)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    pub id: String,
    pub firmware_version: Option<String>,
    pub state: Option<String>,
}

/// `{"@odata.id": ...}` link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ODataId {
    #[serde(rename = "@odata.id")]
    pub id: String,
}

/// Resource collection (Systems, Managers, Registries)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Collection {
    #[serde(default)]
    pub members: Vec<ODataId>,
}

/// ComputerSystem resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ComputerSystem {
    pub id: String,
    #[serde(rename = "UUID", default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub bios_version: Option<String>,
    #[serde(default)]
    pub power_state: Option<String>,
}

/// Bios (or manager Attributes) resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeResource {
    #[serde(default)]
    pub attribute_registry: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Manager resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagerResource {
    pub id: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub status: Option<ResourceStatus>,
}

/// Common `Status` block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub health: Option<String>,
}

/// Task resource
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskResource {
    #[serde(default)]
    pub task_state: Option<String>,
    #[serde(default)]
    pub task_status: Option<String>,
    #[serde(default)]
    pub percent_complete: Option<i32>,
    #[serde(default)]
    pub messages: Vec<TaskMessage>,
}

/// Message attached to a task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskMessage {
    #[serde(default)]
    pub message: Option<String>,
}

/// Registry file pointer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryFile {
    #[serde(default)]
    pub location: Vec<RegistryLocation>,
}

/// One location of a registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryLocation {
    #[serde(default)]
    pub uri: Option<String>,
}

/// Attribute registry (only the reset flags are read)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeRegistry {
    pub registry_entries: RegistryEntries,
}

/// Entries of an attribute registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryEntries {
    #[serde(default)]
    pub attributes: Vec<RegistryAttribute>,
}

/// One attribute definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistryAttribute {
    pub attribute_name: String,
    #[serde(default)]
    pub reset_required: Option<bool>,
}

impl TaskResource {
    /// Map DMTF task states onto [`TaskState`]
    pub fn coarse_state(&self) -> TaskState {
        let failed_status = matches!(self.task_status.as_deref(), Some("Critical"));
        match self.task_state.as_deref() {
            Some("Completed") if failed_status => TaskState::Failed,
            Some("Completed") => TaskState::Completed,
            Some("Exception" | "Killed" | "Cancelled") => TaskState::Failed,
            _ => TaskState::Running,
        }
    }
}

/// Render a Redfish attribute value as a string
pub fn attribute_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert a string back into the JSON type the BMC currently reports
pub fn attribute_from_string(value: &str, current: Option<&serde_json::Value>) -> serde_json::Value {
    match current {
        Some(serde_json::Value::Number(_)) => value
            .parse::<i64>()
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string())),
        Some(serde_json::Value::Bool(_)) => match value {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            other => serde_json::Value::String(other.to_string()),
        },
        _ => serde_json::Value::String(value.to_string()),
    }
}

//! RedfishClient trait for mocking
//!
//! This trait abstracts the RedfishClient to enable mocking in unit tests.
//! The concrete RedfishClient implements this trait, and tests use
//! `MockRedfishClient`.

use crate::error::RedfishError;
use crate::models::{Attributes, BmcEndpoint, FirmwareImage, Manager, ResetType, TaskInfo};

/// Trait for Redfish operations
///
/// System-scoped calls identify the computer system by its UUID. All async
/// methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait RedfishClientTrait: Send + Sync {
    // BIOS
    async fn get_bios_version(&self, bmc: &BmcEndpoint, system_uuid: &str) -> Result<String, RedfishError>;
    async fn get_bios_attributes(&self, bmc: &BmcEndpoint, system_uuid: &str) -> Result<Attributes, RedfishError>;
    async fn requires_reboot(&self, bmc: &BmcEndpoint, system_uuid: &str, attributes: &Attributes) -> Result<bool, RedfishError>;
    async fn set_bios_attributes(&self, bmc: &BmcEndpoint, system_uuid: &str, attributes: &Attributes) -> Result<(), RedfishError>;
    async fn upgrade_bios(&self, bmc: &BmcEndpoint, system_uuid: &str, image: &FirmwareImage) -> Result<String, RedfishError>;
    async fn reset_system(&self, bmc: &BmcEndpoint, system_uuid: &str, reset: ResetType) -> Result<(), RedfishError>;

    // Tasks
    async fn get_task(&self, bmc: &BmcEndpoint, task_uri: &str) -> Result<TaskInfo, RedfishError>;

    // Manager (BMC)
    async fn get_manager(&self, bmc: &BmcEndpoint) -> Result<Manager, RedfishError>;
    async fn reset_manager(&self, bmc: &BmcEndpoint, reset: ResetType) -> Result<(), RedfishError>;
    async fn get_bmc_version(&self, bmc: &BmcEndpoint) -> Result<String, RedfishError>;
    async fn upgrade_bmc(&self, bmc: &BmcEndpoint, image: &FirmwareImage) -> Result<String, RedfishError>;
    async fn get_bmc_attributes(&self, bmc: &BmcEndpoint) -> Result<Attributes, RedfishError>;
    async fn set_bmc_attributes(&self, bmc: &BmcEndpoint, attributes: &Attributes) -> Result<(), RedfishError>;
    async fn bmc_reset_required(&self, bmc: &BmcEndpoint, attributes: &Attributes) -> Result<bool, RedfishError>;
}

//! Redfish REST client
//!
//! Implements [`RedfishClientTrait`] against real BMCs. Systems are located by
//! UUID through the `Systems` collection, the manager is the first member of
//! `Managers`.

use crate::common::HttpClient;
use crate::error::RedfishError;
use crate::models::*;
use crate::redfish_trait::RedfishClientTrait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redfish API client
#[derive(Debug, Clone)]
pub struct RedfishClient {
    http: HttpClient,
}

impl RedfishClient {
    /// Create a client with a per-call timeout
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self, RedfishError> {
        Ok(Self {
            http: HttpClient::new(timeout, insecure_tls)?,
        })
    }

    /// Locate the ComputerSystem with `system_uuid`
    async fn find_system(&self, bmc: &BmcEndpoint, system_uuid: &str) -> Result<ComputerSystem, RedfishError> {
        let systems: Collection = self.http.get(bmc, "Systems").await?;
        for member in systems.members {
            let system: ComputerSystem = self.http.get(bmc, &member.id).await?;
            if system
                .uuid
                .as_deref()
                .is_some_and(|uuid| uuid.eq_ignore_ascii_case(system_uuid))
            {
                return Ok(system);
            }
        }
        Err(RedfishError::NotFound(format!(
            "no system with UUID {} on {}",
            system_uuid, bmc.address
        )))
    }

    async fn find_manager(&self, bmc: &BmcEndpoint) -> Result<ManagerResource, RedfishError> {
        let managers: Collection = self.http.get(bmc, "Managers").await?;
        let first = managers
            .members
            .first()
            .ok_or_else(|| RedfishError::NotFound(format!("no manager on {}", bmc.address)))?;
        self.http.get(bmc, &first.id).await
    }

    fn manager_attributes_path(manager: &ManagerResource) -> String {
        format!("Managers/{}/Attributes", manager.id)
    }

    /// Whether any of `keys` carries `ResetRequired` in the registry behind
    /// `resource`. Missing registries count as "reset required".
    async fn registry_requires_reset(
        &self,
        bmc: &BmcEndpoint,
        resource: &AttributeResource,
        keys: &Attributes,
    ) -> Result<bool, RedfishError> {
        let Some(registry) = resource.attribute_registry.as_deref() else {
            return Ok(true);
        };
        let file: RegistryFile = match self.http.get(bmc, &format!("Registries/{registry}")).await {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                debug!("Attribute registry {} not published, assuming reset", registry);
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        let Some(uri) = file.location.iter().find_map(|l| l.uri.clone()) else {
            return Ok(true);
        };
        let registry: AttributeRegistry = self.http.get(bmc, &uri).await?;
        Ok(keys.keys().any(|key| {
            registry
                .registry_entries
                .attributes
                .iter()
                .find(|a| &a.attribute_name == key)
                .is_none_or(|a| a.reset_required.unwrap_or(true))
        }))
    }

    /// PATCH body with values typed like the live attributes
    fn typed_attributes(current: &Map<String, Value>, attributes: &Attributes) -> Value {
        let typed: Map<String, Value> = attributes
            .iter()
            .map(|(k, v)| (k.clone(), attribute_from_string(v, current.get(k))))
            .collect();
        json!({ "Attributes": typed })
    }

    async fn simple_update(
        &self,
        bmc: &BmcEndpoint,
        target: &str,
        image: &FirmwareImage,
    ) -> Result<String, RedfishError> {
        let mut body = json!({
            "ImageURI": image.uri,
            "Targets": [target],
        });
        if let Value::Object(map) = &mut body {
            if let Some(protocol) = &image.transfer_protocol {
                map.insert("TransferProtocol".to_string(), json!(protocol));
            }
            if let Some(username) = &image.username {
                map.insert("Username".to_string(), json!(username));
            }
            if let Some(password) = &image.password {
                map.insert("Password".to_string(), json!(password));
            }
            if image.force {
                map.insert("ForceUpdate".to_string(), json!(true));
            }
        }
        info!("Requesting firmware update of {} on {} from {}", target, bmc.address, image.uri);
        self.http
            .post(bmc, "UpdateService/Actions/UpdateService.SimpleUpdate", &body)
            .await?
            .ok_or_else(|| RedfishError::Fatal(format!("SimpleUpdate on {} returned no task", bmc.address)))
    }
}

#[async_trait::async_trait]
impl RedfishClientTrait for RedfishClient {
    async fn get_bios_version(&self, bmc: &BmcEndpoint, system_uuid: &str) -> Result<String, RedfishError> {
        let system = self.find_system(bmc, system_uuid).await?;
        system
            .bios_version
            .ok_or_else(|| RedfishError::Fatal(format!("system {} reports no BiosVersion", system.id)))
    }

    async fn get_bios_attributes(&self, bmc: &BmcEndpoint, system_uuid: &str) -> Result<Attributes, RedfishError> {
        let system = self.find_system(bmc, system_uuid).await?;
        let bios: AttributeResource = self.http.get(bmc, &format!("Systems/{}/Bios", system.id)).await?;
        Ok(bios
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), attribute_to_string(v)))
            .collect())
    }

    async fn requires_reboot(&self, bmc: &BmcEndpoint, system_uuid: &str, attributes: &Attributes) -> Result<bool, RedfishError> {
        if attributes.is_empty() {
            return Ok(false);
        }
        let system = self.find_system(bmc, system_uuid).await?;
        let bios: AttributeResource = self.http.get(bmc, &format!("Systems/{}/Bios", system.id)).await?;
        self.registry_requires_reset(bmc, &bios, attributes).await
    }

    async fn set_bios_attributes(&self, bmc: &BmcEndpoint, system_uuid: &str, attributes: &Attributes) -> Result<(), RedfishError> {
        let system = self.find_system(bmc, system_uuid).await?;
        let bios: AttributeResource = self.http.get(bmc, &format!("Systems/{}/Bios", system.id)).await?;
        let body = Self::typed_attributes(&bios.attributes, attributes);
        self.http
            .patch(bmc, &format!("Systems/{}/Bios/Settings", system.id), &body)
            .await
    }

    async fn upgrade_bios(&self, bmc: &BmcEndpoint, system_uuid: &str, image: &FirmwareImage) -> Result<String, RedfishError> {
        let system = self.find_system(bmc, system_uuid).await?;
        self.simple_update(bmc, &format!("/redfish/v1/Systems/{}", system.id), image)
            .await
    }

    async fn reset_system(&self, bmc: &BmcEndpoint, system_uuid: &str, reset: ResetType) -> Result<(), RedfishError> {
        let system = self.find_system(bmc, system_uuid).await?;
        info!("Resetting system {} ({:?})", system.id, reset);
        self.http
            .post(
                bmc,
                &format!("Systems/{}/Actions/ComputerSystem.Reset", system.id),
                &json!({ "ResetType": reset }),
            )
            .await?;
        Ok(())
    }

    async fn get_task(&self, bmc: &BmcEndpoint, task_uri: &str) -> Result<TaskInfo, RedfishError> {
        let task: TaskResource = self.http.get(bmc, task_uri).await?;
        let state = task.coarse_state();
        if state == TaskState::Failed {
            warn!("Task {} on {} failed", task_uri, bmc.address);
        }
        Ok(TaskInfo {
            uri: task_uri.to_string(),
            state,
            percent_complete: task.percent_complete,
            message: task.messages.iter().find_map(|m| m.message.clone()),
        })
    }

    async fn get_manager(&self, bmc: &BmcEndpoint) -> Result<Manager, RedfishError> {
        let manager = self.find_manager(bmc).await?;
        Ok(Manager {
            id: manager.id,
            firmware_version: manager.firmware_version,
            state: manager.status.and_then(|s| s.state),
        })
    }

    async fn reset_manager(&self, bmc: &BmcEndpoint, reset: ResetType) -> Result<(), RedfishError> {
        let manager = self.find_manager(bmc).await?;
        info!("Resetting manager {} on {} ({:?})", manager.id, bmc.address, reset);
        self.http
            .post(
                bmc,
                &format!("Managers/{}/Actions/Manager.Reset", manager.id),
                &json!({ "ResetType": reset }),
            )
            .await?;
        Ok(())
    }

    async fn get_bmc_version(&self, bmc: &BmcEndpoint) -> Result<String, RedfishError> {
        let manager = self.find_manager(bmc).await?;
        manager
            .firmware_version
            .ok_or_else(|| RedfishError::Fatal(format!("manager {} reports no FirmwareVersion", manager.id)))
    }

    async fn upgrade_bmc(&self, bmc: &BmcEndpoint, image: &FirmwareImage) -> Result<String, RedfishError> {
        let manager = self.find_manager(bmc).await?;
        self.simple_update(bmc, &format!("/redfish/v1/Managers/{}", manager.id), image)
            .await
    }

    async fn get_bmc_attributes(&self, bmc: &BmcEndpoint) -> Result<Attributes, RedfishError> {
        let manager = self.find_manager(bmc).await?;
        let attributes: AttributeResource = self
            .http
            .get(bmc, &Self::manager_attributes_path(&manager))
            .await?;
        Ok(attributes
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), attribute_to_string(v)))
            .collect())
    }

    async fn set_bmc_attributes(&self, bmc: &BmcEndpoint, attributes: &Attributes) -> Result<(), RedfishError> {
        let manager = self.find_manager(bmc).await?;
        let path = Self::manager_attributes_path(&manager);
        let current: AttributeResource = self.http.get(bmc, &path).await?;
        let body = Self::typed_attributes(&current.attributes, attributes);
        self.http.patch(bmc, &path, &body).await
    }

    async fn bmc_reset_required(&self, bmc: &BmcEndpoint, attributes: &Attributes) -> Result<bool, RedfishError> {
        if attributes.is_empty() {
            return Ok(false);
        }
        let manager = self.find_manager(bmc).await?;
        let current: AttributeResource = self
            .http
            .get(bmc, &Self::manager_attributes_path(&manager))
            .await?;
        self.registry_requires_reset(bmc, &current, attributes).await
    }
}

//! BMCVersion reconciler
//!
//! Upgrades BMC firmware. Every server behind the BMC is held in maintenance
//! for the whole upgrade since the manager disappears while it restarts.

use super::bios_version::upgrade_task_state;
use super::leases::Hold;
use super::{retry, Reconciler, BMC_VERSION_FINALIZER};
use crate::annotations::{should_ignore, wants_retry};
use crate::conditions::{
    self, BMC_RESET, BMC_UPGRADE_COMPLETED, BMC_UPGRADE_ISSUED, BMC_UPGRADE_VERIFICATION, REMOTE_OPERATION_FAILED,
    SERVER_MAINTENANCE_CREATED, SERVER_MAINTENANCE_DELETED,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    elapsed_since, ensure_finalizer, has_finalizer, is_deleting, name_of, patch_status_if_changed, remove_finalizer,
};
use chrono::Utc;
use crds::{BMCVersion, BMCVersionStatus, ObjectReference, UpdatePolicy, UpgradeTask, UpgradeTaskState, VersionState};
use kube_runtime::controller::Action;
use redfish_client::{BmcEndpoint, TaskState};
use serde_json::json;
use tracing::{debug, info, warn};

const MAINTENANCE_REASON: &str = "BMC firmware upgrade";

struct BmcVersionPass<'a> {
    version: &'a BMCVersion,
    name: &'a str,
    bmc_name: String,
    endpoint: BmcEndpoint,
    maintenance_refs: Vec<ObjectReference>,
}

impl Reconciler {
    pub async fn reconcile_bmc_version(&self, version: &BMCVersion) -> Result<Action, ControllerError> {
        let name = name_of(version)?;
        if should_ignore(&version.metadata) {
            debug!("Skipping ignored BMCVersion {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(version) {
            if !has_finalizer(version, BMC_VERSION_FINALIZER) {
                return Ok(Action::await_change());
            }
            info!("Deleting BMCVersion {}", name);
            if self.release_maintenances(version).await? {
                return Ok(Action::requeue(self.config.approval_poll_interval));
            }
            remove_finalizer(&self.bmc_versions, version, BMC_VERSION_FINALIZER).await?;
            return Ok(Action::await_change());
        }

        info!("Reconciling BMCVersion {}", name);
        ensure_finalizer(&self.bmc_versions, version, BMC_VERSION_FINALIZER).await?;
        self.delete_orphaned_maintenances(version, &version.spec.server_maintenance_refs)
            .await?;

        let mut status = version.status.clone().unwrap_or_default();
        let result = self.drive_bmc_version(version, &mut status).await;
        let result = retry::settle(&format!("BMCVersion {name}"), result, &mut status, |s| {
            s.state = Some(VersionState::Failed)
        });
        patch_status_if_changed(&self.bmc_versions, name, version.status.as_ref(), &status).await?;
        result
    }

    async fn drive_bmc_version(
        &self,
        version: &BMCVersion,
        status: &mut BMCVersionStatus,
    ) -> Result<Action, ControllerError> {
        let name = name_of(version)?;
        retry::init_retries(status, version.spec.failed_auto_retry_count);

        if status.state == Some(VersionState::Failed) {
            let Some(trigger) = retry::retry_trigger(&version.metadata, status) else {
                debug!("BMCVersion {} failed, waiting for a retry request", name);
                return Ok(Action::await_change());
            };
            let holding = retry::rewind(status, None);
            for tag in [BMC_UPGRADE_ISSUED, BMC_UPGRADE_COMPLETED, BMC_RESET, BMC_UPGRADE_VERIFICATION] {
                conditions::remove(&mut status.conditions, tag);
            }
            status.upgrade_task = None;
            status.state = Some(if holding {
                VersionState::InProgress
            } else {
                VersionState::Pending
            });
            if trigger == retry::RetryTrigger::Requested {
                retry::clear_operation(&self.bmc_versions, version).await?;
            }
            info!("Retrying BMCVersion {} ({:?})", name, trigger);
            return Ok(Action::requeue(self.config.task_poll_interval));
        }
        if wants_retry(&version.metadata) {
            retry::clear_operation(&self.bmc_versions, version).await?;
        }

        let bmc_ref = version
            .spec
            .bmc_ref
            .as_ref()
            .ok_or_else(|| ControllerError::Validation("spec.bmcRef is required".to_string()))?;
        if version.spec.version.trim().is_empty() {
            return Err(ControllerError::Validation("spec.version is required".to_string()));
        }
        let Some(bmc) = self.bmcs.get_opt(&bmc_ref.name).await? else {
            warn!("BMCVersion {} targets missing BMC {}", name, bmc_ref.name);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        let mut pass = BmcVersionPass {
            version,
            name,
            bmc_name: bmc_ref.name.clone(),
            endpoint: self.bmc_endpoint(&bmc).await?,
            maintenance_refs: version.spec.server_maintenance_refs.clone(),
        };

        match status.state {
            None | Some(VersionState::Pending) => self.bmc_version_pending(&mut pass, status).await,
            Some(VersionState::InProgress) => self.bmc_version_in_progress(&mut pass, status).await,
            Some(VersionState::Completed) => {
                let current = self.redfish.get_bmc_version(&pass.endpoint).await?;
                if current == version.spec.version {
                    return Ok(Action::await_change());
                }
                info!("BMCVersion {} completed but BMC runs {}, starting over", name, current);
                status.conditions.clear();
                status.upgrade_task = None;
                self.bmc_version_pending(&mut pass, status).await
            }
            Some(VersionState::Failed) => Ok(Action::await_change()),
        }
    }

    async fn bmc_version_pending(
        &self,
        pass: &mut BmcVersionPass<'_>,
        status: &mut BMCVersionStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(VersionState::Pending);
        let current = self.redfish.get_bmc_version(&pass.endpoint).await?;
        let forced = pass.version.spec.update_policy == Some(UpdatePolicy::Force);
        if current == pass.version.spec.version && !forced {
            info!("BMCVersion {}: BMC {} already runs {}", pass.name, pass.bmc_name, current);
            status.state = Some(VersionState::Completed);
            return Ok(Action::await_change());
        }

        let servers = self.servers_of_bmc(&pass.bmc_name).await?;
        let requested = self
            .request_bmc_maintenances(
                pass.version,
                &servers,
                &pass.maintenance_refs,
                pass.version.spec.server_maintenance_policy,
                MAINTENANCE_REASON,
            )
            .await?;
        let Some(refs) = requested else {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        if refs != pass.version.spec.server_maintenance_refs {
            self.bmc_versions
                .patch(pass.name, &json!({ "spec": { "serverMaintenanceRefs": refs } }))
                .await?;
        }
        if !refs.is_empty() {
            conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_DELETED);
            conditions::set(
                &mut status.conditions,
                SERVER_MAINTENANCE_CREATED,
                true,
                "MaintenanceCreated",
                &format!("{} ServerMaintenance(s)", refs.len()),
            );
        }
        pass.maintenance_refs = refs;
        status.state = Some(VersionState::InProgress);
        info!(
            "BMCVersion {} upgrades BMC {} from {} to {}",
            pass.name, pass.bmc_name, current, pass.version.spec.version
        );
        self.bmc_version_in_progress(pass, status).await
    }

    async fn bmc_version_in_progress(
        &self,
        pass: &mut BmcVersionPass<'_>,
        status: &mut BMCVersionStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(VersionState::InProgress);
        let holding = conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED)
            && !conditions::is_true(&status.conditions, SERVER_MAINTENANCE_DELETED);
        if holding {
            match self.hold_on_all(&pass.maintenance_refs).await? {
                Hold::Held => {}
                Hold::Waiting => {
                    debug!("BMCVersion {} waits for its servers to enter maintenance", pass.name);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
                Hold::Withdrawn => {
                    info!("Maintenances of BMCVersion {} were withdrawn, starting over", pass.name);
                    conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_CREATED);
                    status.state = Some(VersionState::Pending);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
            }
        }

        if !conditions::is_true(&status.conditions, BMC_UPGRADE_ISSUED) {
            let forced = pass.version.spec.update_policy == Some(UpdatePolicy::Force);
            let image = self.firmware_image(&pass.version.spec.image, forced).await?;
            let task = self.redfish.upgrade_bmc(&pass.endpoint, &image).await?;
            info!("BMCVersion {} issued upgrade, task {}", pass.name, task);
            conditions::set(&mut status.conditions, BMC_UPGRADE_ISSUED, true, "UpgradeIssued", &task);
            status.upgrade_task = Some(UpgradeTask {
                uri: task,
                state: Some(UpgradeTaskState::Running),
                percent_complete: None,
            });
        }

        if !conditions::is_true(&status.conditions, BMC_UPGRADE_COMPLETED) {
            let Some(task) = status.upgrade_task.clone() else {
                warn!("BMCVersion {} lost its upgrade task, issuing again", pass.name);
                conditions::remove(&mut status.conditions, BMC_UPGRADE_ISSUED);
                return Ok(Action::requeue(self.config.task_poll_interval));
            };
            let info = self.redfish.get_task(&pass.endpoint, &task.uri).await?;
            status.upgrade_task = Some(UpgradeTask {
                uri: task.uri.clone(),
                state: Some(upgrade_task_state(info.state)),
                percent_complete: info.percent_complete,
            });
            match info.state {
                TaskState::Running => return Ok(Action::requeue(self.config.task_poll_interval)),
                TaskState::Failed => {
                    let message = info.message.unwrap_or_else(|| "upgrade task failed".to_string());
                    warn!("BMCVersion {} upgrade failed: {}", pass.name, message);
                    conditions::set(&mut status.conditions, BMC_UPGRADE_COMPLETED, false, "TaskFailed", &message);
                    conditions::set(&mut status.conditions, REMOTE_OPERATION_FAILED, true, "TaskFailed", &message);
                    status.state = Some(VersionState::Failed);
                    return Ok(Action::await_change());
                }
                TaskState::Completed => {
                    conditions::set(&mut status.conditions, BMC_UPGRADE_COMPLETED, true, "TaskCompleted", &task.uri);
                }
            }
        }

        let what = format!("BMCVersion {}", pass.name);
        if let Some(wait) = self.await_bmc_reset(&pass.endpoint, &mut status.conditions, &what).await? {
            return Ok(wait);
        }

        if !conditions::is_true(&status.conditions, BMC_UPGRADE_VERIFICATION) {
            let current = self.redfish.get_bmc_version(&pass.endpoint).await?;
            if current != pass.version.spec.version {
                let waited = conditions::since(&status.conditions, BMC_RESET)
                    .map(elapsed_since)
                    .unwrap_or_default();
                if waited <= self.config.settings_timeout {
                    return Ok(Action::requeue(self.config.version_poll_interval));
                }
                let message = format!("BMC runs {current} after upgrade to {}", pass.version.spec.version);
                conditions::set(&mut status.conditions, BMC_UPGRADE_VERIFICATION, false, "VersionMismatch", &message);
                conditions::set(&mut status.conditions, REMOTE_OPERATION_FAILED, true, "VersionMismatch", &message);
                status.state = Some(VersionState::Failed);
                return Ok(Action::await_change());
            }
            conditions::set(&mut status.conditions, BMC_UPGRADE_VERIFICATION, true, "VersionVerified", &current);
        }

        if !pass.maintenance_refs.is_empty() {
            self.bmc_versions
                .patch(pass.name, &json!({ "spec": { "serverMaintenanceRefs": null } }))
                .await?;
            pass.maintenance_refs.clear();
        }
        if conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED) {
            let remaining = self.release_maintenances(pass.version).await?;
            conditions::set(&mut status.conditions, SERVER_MAINTENANCE_DELETED, true, "MaintenanceDeleted", "");
            if remaining {
                return Ok(Action::requeue(self.config.approval_poll_interval));
            }
        }
        status.state = Some(VersionState::Completed);
        status.last_applied_time = Some(Utc::now());
        info!("BMCVersion {} completed on BMC {}", pass.name, pass.bmc_name);
        Ok(Action::await_change())
    }
}

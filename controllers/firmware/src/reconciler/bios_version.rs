//! BIOSVersion reconciler
//!
//! Upgrades the BIOS of one server: maintenance, SimpleUpdate, task polling,
//! a forced restart to activate the image, then version verification.

use super::leases::{Hold, Lease};
use super::{retry, Reconciler, BIOS_VERSION_FINALIZER};
use crate::annotations::{should_ignore, wants_retry};
use crate::conditions::{
    self, BIOS_UPGRADE_COMPLETED, BIOS_UPGRADE_ISSUED, BIOS_UPGRADE_REBOOT, BIOS_UPGRADE_VERIFICATION,
    REMOTE_OPERATION_FAILED, SERVER_MAINTENANCE_CREATED, SERVER_MAINTENANCE_DELETED,
};
use crate::error::ControllerError;
use crate::naming::ChildName;
use crate::reconcile_helpers::{
    elapsed_since, ensure_finalizer, has_finalizer, is_deleting, name_of, patch_status_if_changed, remove_finalizer,
};
use chrono::Utc;
use crds::{
    BIOSVersion, BIOSVersionStatus, LocalObjectReference, ObjectReference, Power, Server, UpdatePolicy, UpgradeTask,
    UpgradeTaskState, VersionState,
};
use kube_runtime::controller::Action;
use redfish_client::{BmcEndpoint, ResetType, TaskState};
use serde_json::json;
use tracing::{debug, info, warn};

const MAINTENANCE_REASON: &str = "BIOS firmware upgrade";

/// Conditions describing one upgrade attempt
const UPGRADE_CONDITIONS: [&str; 4] = [
    BIOS_UPGRADE_ISSUED,
    BIOS_UPGRADE_COMPLETED,
    BIOS_UPGRADE_REBOOT,
    BIOS_UPGRADE_VERIFICATION,
];

pub(crate) fn upgrade_task_state(state: TaskState) -> UpgradeTaskState {
    match state {
        TaskState::Running => UpgradeTaskState::Running,
        TaskState::Completed => UpgradeTaskState::Completed,
        TaskState::Failed => UpgradeTaskState::Failed,
    }
}

struct VersionPass<'a> {
    version: &'a BIOSVersion,
    name: &'a str,
    server: Server,
    endpoint: BmcEndpoint,
    maintenance_ref: Option<ObjectReference>,
}

impl VersionPass<'_> {
    fn forced(&self) -> bool {
        self.version.spec.update_policy == Some(UpdatePolicy::Force)
    }
}

impl Reconciler {
    pub async fn reconcile_bios_version(&self, version: &BIOSVersion) -> Result<Action, ControllerError> {
        let name = name_of(version)?;
        if should_ignore(&version.metadata) {
            debug!("Skipping ignored BIOSVersion {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(version) {
            return self.delete_bios_version(version).await;
        }

        info!("Reconciling BIOSVersion {}", name);
        ensure_finalizer(&self.bios_versions, version, BIOS_VERSION_FINALIZER).await?;
        let held: Vec<ObjectReference> = version.spec.server_maintenance_ref.iter().cloned().collect();
        self.delete_orphaned_maintenances(version, &held).await?;

        let mut status = version.status.clone().unwrap_or_default();
        let result = self.drive_bios_version(version, &mut status).await;
        let result = retry::settle(&format!("BIOSVersion {name}"), result, &mut status, |s| {
            s.state = Some(VersionState::Failed)
        });
        patch_status_if_changed(&self.bios_versions, name, version.status.as_ref(), &status).await?;
        result
    }

    async fn drive_bios_version(
        &self,
        version: &BIOSVersion,
        status: &mut BIOSVersionStatus,
    ) -> Result<Action, ControllerError> {
        let name = name_of(version)?;
        retry::init_retries(status, version.spec.failed_auto_retry_count);

        if status.state == Some(VersionState::Failed) {
            let Some(trigger) = retry::retry_trigger(&version.metadata, status) else {
                debug!("BIOSVersion {} failed, waiting for a retry request", name);
                return Ok(Action::await_change());
            };
            let holding = retry::rewind(status, None);
            for tag in UPGRADE_CONDITIONS {
                conditions::remove(&mut status.conditions, tag);
            }
            status.upgrade_task = None;
            status.state = Some(if holding {
                VersionState::InProgress
            } else {
                VersionState::Pending
            });
            if trigger == retry::RetryTrigger::Requested {
                retry::clear_operation(&self.bios_versions, version).await?;
            }
            info!("Retrying BIOSVersion {} ({:?})", name, trigger);
            return Ok(Action::requeue(self.config.task_poll_interval));
        }
        if wants_retry(&version.metadata) {
            retry::clear_operation(&self.bios_versions, version).await?;
        }

        let server_ref = version
            .spec
            .server_ref
            .as_ref()
            .ok_or_else(|| ControllerError::Validation("spec.serverRef is required".to_string()))?;
        if version.spec.version.trim().is_empty() {
            return Err(ControllerError::Validation("spec.version is required".to_string()));
        }
        let server = self
            .servers
            .get_opt(&server_ref.name)
            .await?
            .ok_or_else(|| ControllerError::ServerNotFound(server_ref.name.clone()))?;
        let Some(server) = self.claim_bios_version_ref(name, server).await? else {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        let endpoint = self.server_endpoint(&server).await?;
        let mut pass = VersionPass {
            version,
            name,
            server,
            endpoint,
            maintenance_ref: version.spec.server_maintenance_ref.clone(),
        };

        match status.state {
            None | Some(VersionState::Pending) => self.bios_version_pending(&mut pass, status).await,
            Some(VersionState::InProgress) => self.bios_version_in_progress(&mut pass, status).await,
            Some(VersionState::Completed) => {
                let current = self.redfish.get_bios_version(&pass.endpoint, &pass.server.spec.uuid).await?;
                if current == version.spec.version {
                    return Ok(Action::await_change());
                }
                info!(
                    "BIOSVersion {} completed but server runs {}, starting over",
                    name, current
                );
                status.conditions.clear();
                status.upgrade_task = None;
                self.bios_version_pending(&mut pass, status).await
            }
            Some(VersionState::Failed) => Ok(Action::await_change()),
        }
    }

    /// Make `server.spec.biosVersionRef` name this resource; a stale
    /// reference is taken over, a live sibling keeps the server
    async fn claim_bios_version_ref(&self, name: &str, server: Server) -> Result<Option<Server>, ControllerError> {
        if let Some(current) = &server.spec.bios_version_ref {
            if current.name == name {
                return Ok(Some(server));
            }
            if let Some(holder) = self.bios_versions.get_opt(&current.name).await? {
                if !is_deleting(&holder) {
                    debug!(
                        "Server {} is being upgraded by BIOSVersion {}, {} waits",
                        name_of(&server)?,
                        current.name,
                        name
                    );
                    return Ok(None);
                }
            }
        }
        let mut claimed = server;
        claimed.spec.bios_version_ref = Some(LocalObjectReference::new(name));
        Ok(Some(self.servers.replace(&claimed).await?))
    }

    async fn bios_version_pending(
        &self,
        pass: &mut VersionPass<'_>,
        status: &mut BIOSVersionStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(VersionState::Pending);
        let current = self.redfish.get_bios_version(&pass.endpoint, &pass.server.spec.uuid).await?;
        if current == pass.version.spec.version && !pass.forced() {
            info!("BIOSVersion {}: server already runs {}", pass.name, current);
            status.state = Some(VersionState::Completed);
            return Ok(Action::await_change());
        }

        let existing = match &pass.maintenance_ref {
            Some(reference) => self.referenced_maintenance(reference).await?,
            None => None,
        };
        let maintenance = match existing {
            Some(maintenance) => maintenance,
            None => {
                let lease = self
                    .request_maintenance(
                        pass.version,
                        name_of(&pass.server)?,
                        ChildName::Fixed(pass.name.to_string()),
                        pass.version.spec.server_maintenance_policy,
                        MAINTENANCE_REASON,
                    )
                    .await?;
                match lease {
                    Lease::Requested(maintenance) => maintenance,
                    Lease::Terminating => return Ok(Action::requeue(self.config.approval_poll_interval)),
                }
            }
        };
        let reference = ObjectReference::to_object(&maintenance);
        if pass.version.spec.server_maintenance_ref != reference {
            self.bios_versions
                .patch(pass.name, &json!({ "spec": { "serverMaintenanceRef": reference } }))
                .await?;
        }
        pass.maintenance_ref = reference;
        conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_DELETED);
        conditions::set(
            &mut status.conditions,
            SERVER_MAINTENANCE_CREATED,
            true,
            "MaintenanceCreated",
            &format!("ServerMaintenance {}", name_of(&maintenance)?),
        );
        status.state = Some(VersionState::InProgress);
        info!(
            "BIOSVersion {} upgrades server {} from {} to {}",
            pass.name,
            name_of(&pass.server)?,
            current,
            pass.version.spec.version
        );
        self.bios_version_in_progress(pass, status).await
    }

    async fn bios_version_in_progress(
        &self,
        pass: &mut VersionPass<'_>,
        status: &mut BIOSVersionStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(VersionState::InProgress);
        let uuid = pass.server.spec.uuid.clone();

        let released = conditions::is_true(&status.conditions, SERVER_MAINTENANCE_DELETED);
        if !released {
            match self.hold_on(pass.maintenance_ref.as_ref(), &pass.server).await? {
                Hold::Held => {}
                Hold::Waiting => {
                    debug!("BIOSVersion {} waits for its maintenance", pass.name);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
                Hold::Withdrawn => {
                    info!("Maintenance of BIOSVersion {} was withdrawn, starting over", pass.name);
                    conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_CREATED);
                    status.state = Some(VersionState::Pending);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
            }
        }

        if !conditions::is_true(&status.conditions, BIOS_UPGRADE_ISSUED) {
            if let Some(wait) = self.drive_power(&pass.server, Power::On).await? {
                return Ok(wait);
            }
            let image = self.firmware_image(&pass.version.spec.image, pass.forced()).await?;
            let task = self.redfish.upgrade_bios(&pass.endpoint, &uuid, &image).await?;
            info!("BIOSVersion {} issued upgrade, task {}", pass.name, task);
            conditions::set(&mut status.conditions, BIOS_UPGRADE_ISSUED, true, "UpgradeIssued", &task);
            status.upgrade_task = Some(UpgradeTask {
                uri: task,
                state: Some(UpgradeTaskState::Running),
                percent_complete: None,
            });
        }

        if !conditions::is_true(&status.conditions, BIOS_UPGRADE_COMPLETED) {
            let Some(task) = status.upgrade_task.clone() else {
                warn!("BIOSVersion {} lost its upgrade task, issuing again", pass.name);
                conditions::remove(&mut status.conditions, BIOS_UPGRADE_ISSUED);
                return Ok(Action::requeue(self.config.task_poll_interval));
            };
            let info = self.redfish.get_task(&pass.endpoint, &task.uri).await?;
            status.upgrade_task = Some(UpgradeTask {
                uri: task.uri.clone(),
                state: Some(upgrade_task_state(info.state)),
                percent_complete: info.percent_complete,
            });
            match info.state {
                TaskState::Running => {
                    debug!(
                        "BIOSVersion {} upgrade at {}%",
                        pass.name,
                        info.percent_complete.unwrap_or(0)
                    );
                    return Ok(Action::requeue(self.config.task_poll_interval));
                }
                TaskState::Failed => {
                    let message = info.message.unwrap_or_else(|| "upgrade task failed".to_string());
                    warn!("BIOSVersion {} upgrade failed: {}", pass.name, message);
                    conditions::set(&mut status.conditions, BIOS_UPGRADE_COMPLETED, false, "TaskFailed", &message);
                    conditions::set(&mut status.conditions, REMOTE_OPERATION_FAILED, true, "TaskFailed", &message);
                    status.state = Some(VersionState::Failed);
                    return Ok(Action::await_change());
                }
                TaskState::Completed => {
                    conditions::set(&mut status.conditions, BIOS_UPGRADE_COMPLETED, true, "TaskCompleted", &task.uri);
                }
            }
        }

        if !conditions::is_true(&status.conditions, BIOS_UPGRADE_REBOOT) {
            self.redfish
                .reset_system(&pass.endpoint, &uuid, ResetType::ForceRestart)
                .await?;
            conditions::set(&mut status.conditions, BIOS_UPGRADE_REBOOT, true, "SystemRestarted", "");
            info!("BIOSVersion {} restarted server {}", pass.name, name_of(&pass.server)?);
        }

        if !conditions::is_true(&status.conditions, BIOS_UPGRADE_VERIFICATION) {
            let current = self.redfish.get_bios_version(&pass.endpoint, &uuid).await?;
            if current != pass.version.spec.version {
                let waited = conditions::since(&status.conditions, BIOS_UPGRADE_REBOOT)
                    .map(elapsed_since)
                    .unwrap_or_default();
                if waited <= self.config.settings_timeout {
                    debug!("BIOSVersion {} waits for {} (server runs {})", pass.name, pass.version.spec.version, current);
                    return Ok(Action::requeue(self.config.version_poll_interval));
                }
                let message = format!("server runs {current} after upgrade to {}", pass.version.spec.version);
                conditions::set(&mut status.conditions, BIOS_UPGRADE_VERIFICATION, false, "VersionMismatch", &message);
                conditions::set(&mut status.conditions, REMOTE_OPERATION_FAILED, true, "VersionMismatch", &message);
                status.state = Some(VersionState::Failed);
                return Ok(Action::await_change());
            }
            conditions::set(&mut status.conditions, BIOS_UPGRADE_VERIFICATION, true, "VersionVerified", &current);
        }

        if pass.maintenance_ref.take().is_some() {
            self.bios_versions
                .patch(pass.name, &json!({ "spec": { "serverMaintenanceRef": null } }))
                .await?;
        }
        let remaining = self.release_maintenances(pass.version).await?;
        conditions::set(&mut status.conditions, SERVER_MAINTENANCE_DELETED, true, "MaintenanceDeleted", "");
        if remaining {
            debug!("BIOSVersion {} waits for its maintenance to go away", pass.name);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        status.state = Some(VersionState::Completed);
        status.last_applied_time = Some(Utc::now());
        info!("BIOSVersion {} completed on server {}", pass.name, name_of(&pass.server)?);
        Ok(Action::await_change())
    }

    async fn delete_bios_version(&self, version: &BIOSVersion) -> Result<Action, ControllerError> {
        if !has_finalizer(version, BIOS_VERSION_FINALIZER) {
            return Ok(Action::await_change());
        }
        let name = name_of(version)?;
        info!("Deleting BIOSVersion {}", name);
        if self.release_maintenances(version).await? {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        if let Some(server_ref) = &version.spec.server_ref {
            if let Some(server) = self.servers.get_opt(&server_ref.name).await? {
                if server.spec.bios_version_ref.as_ref().is_some_and(|r| r.name == name) {
                    let mut released = server;
                    released.spec.bios_version_ref = None;
                    self.servers.replace(&released).await?;
                }
            }
        }
        remove_finalizer(&self.bios_versions, version, BIOS_VERSION_FINALIZER).await?;
        Ok(Action::await_change())
    }
}

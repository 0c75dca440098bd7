//! BIOSSettings reconciler
//!
//! Applies a priority-ordered settings flow to one server. Phases:
//!
//! - `Pending`: version gate, diff against live attributes, maintenance
//!   request when the change needs the server
//! - `InProgress`: one step at a time (power on, issue, optional reboot,
//!   verify), every sub-step recorded as a `<tag>-<priority>` condition
//! - `InWaiting`: between two steps
//! - `Applied`: watched for drift
//! - `Failed`: left through `retry`
//!
//! Every sub-step checks its condition first, so a pass interrupted at any
//! point resumes where it stopped.

use super::leases::{Hold, Lease};
use super::{retry, Reconciler, BIOS_SETTINGS_FINALIZER};
use crate::annotations::{should_ignore, wants_retry};
use crate::conditions::{
    self, ISSUE_SETTINGS_UPDATE, MOVE_TO_NEXT_STEP, PENDING_VERSION_UPDATE, REBOOT_POWER_OFF, REBOOT_POWER_ON,
    SERVER_MAINTENANCE_CREATED, SERVER_MAINTENANCE_DELETED, SKIP_REBOOT, TIMEOUT_EXCEEDED, TIMEOUT_START,
    TURN_SERVER_ON, VERIFY_SETTING,
};
use crate::error::ControllerError;
use crate::flow::{self, LAST_STEP};
use crate::naming::ChildName;
use crate::reconcile_helpers::{
    elapsed_since, ensure_finalizer, has_finalizer, is_deleting, name_of, patch_status_if_changed, remove_finalizer,
};
use chrono::Utc;
use crds::{
    BIOSSettings, BIOSSettingsStatus, LocalObjectReference, ObjectReference, Power, Server, ServerPowerState,
    ServerState, SettingsFlowItem, SettingsState,
};
use kube_runtime::controller::Action;
use redfish_client::BmcEndpoint;
use serde_json::json;
use tracing::{debug, info, warn};

/// Reason recorded on maintenances requested for BIOS settings
const MAINTENANCE_REASON: &str = "BIOS settings update";

/// Everything one pass over a BIOSSettings works with
struct SettingsPass<'a> {
    settings: &'a BIOSSettings,
    name: &'a str,
    server: Server,
    endpoint: BmcEndpoint,
    flow: Vec<SettingsFlowItem>,
    maintenance_ref: Option<ObjectReference>,
}

impl Reconciler {
    pub async fn reconcile_bios_settings(&self, settings: &BIOSSettings) -> Result<Action, ControllerError> {
        let name = name_of(settings)?;
        if should_ignore(&settings.metadata) {
            debug!("Skipping ignored BIOSSettings {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(settings) {
            return self.delete_bios_settings(settings).await;
        }

        info!("Reconciling BIOSSettings {}", name);
        ensure_finalizer(&self.bios_settings, settings, BIOS_SETTINGS_FINALIZER).await?;
        let held: Vec<ObjectReference> = settings.spec.server_maintenance_ref.iter().cloned().collect();
        self.delete_orphaned_maintenances(settings, &held).await?;

        let mut status = settings.status.clone().unwrap_or_default();
        let result = self.drive_bios_settings(settings, &mut status).await;
        let result = retry::settle(&format!("BIOSSettings {name}"), result, &mut status, |s| {
            s.state = Some(SettingsState::Failed)
        });
        patch_status_if_changed(&self.bios_settings, name, settings.status.as_ref(), &status).await?;
        result
    }

    async fn drive_bios_settings(
        &self,
        settings: &BIOSSettings,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        let name = name_of(settings)?;
        retry::init_retries(status, settings.spec.failed_auto_retry_count);

        if status.state == Some(SettingsState::Failed) {
            return self.retry_bios_settings(settings, status).await;
        }
        if wants_retry(&settings.metadata) {
            retry::clear_operation(&self.bios_settings, settings).await?;
        }

        let flow = flow::normalize(&settings.spec.settings_flow)
            .map_err(|e| ControllerError::Validation(e.to_string()))?;
        let server_ref = settings
            .spec
            .server_ref
            .as_ref()
            .ok_or_else(|| ControllerError::Validation("spec.serverRef is required".to_string()))?;
        let server = self
            .servers
            .get_opt(&server_ref.name)
            .await?
            .ok_or_else(|| ControllerError::ServerNotFound(server_ref.name.clone()))?;

        let Some(server) = self.claim_bios_settings_ref(name, server).await? else {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        let endpoint = self.server_endpoint(&server).await?;
        let mut pass = SettingsPass {
            settings,
            name,
            server,
            endpoint,
            flow,
            maintenance_ref: settings.spec.server_maintenance_ref.clone(),
        };

        match status.state {
            None | Some(SettingsState::Pending) => self.bios_settings_pending(&mut pass, status).await,
            Some(SettingsState::InProgress | SettingsState::InWaiting) => {
                self.bios_settings_in_progress(&mut pass, status).await
            }
            Some(SettingsState::Applied) => self.bios_settings_applied(&mut pass, status).await,
            Some(SettingsState::Failed) => Ok(Action::await_change()),
        }
    }

    /// Make `server.spec.biosSettingsRef` name this resource.
    ///
    /// A reference to a BIOSSettings that is gone or being deleted is taken
    /// over; a live sibling keeps the server and `None` is returned.
    async fn claim_bios_settings_ref(&self, name: &str, server: Server) -> Result<Option<Server>, ControllerError> {
        if let Some(current) = &server.spec.bios_settings_ref {
            if current.name == name {
                return Ok(Some(server));
            }
            if let Some(holder) = self.bios_settings.get_opt(&current.name).await? {
                if !is_deleting(&holder) {
                    debug!(
                        "Server {} is managed by BIOSSettings {}, {} waits",
                        name_of(&server)?,
                        current.name,
                        name
                    );
                    return Ok(None);
                }
            }
            info!(
                "BIOSSettings {} takes over server {} from stale {}",
                name,
                name_of(&server)?,
                current.name
            );
        }
        let mut claimed = server;
        claimed.spec.bios_settings_ref = Some(LocalObjectReference::new(name));
        Ok(Some(self.servers.replace(&claimed).await?))
    }

    async fn bios_settings_pending(
        &self,
        pass: &mut SettingsPass<'_>,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(SettingsState::Pending);
        let uuid = pass.server.spec.uuid.as_str();

        let version = self.redfish.get_bios_version(&pass.endpoint, uuid).await?;
        if version != pass.settings.spec.version {
            conditions::set(
                &mut status.conditions,
                PENDING_VERSION_UPDATE,
                true,
                "VersionMismatch",
                &format!("BIOS reports {version}, settings are for {}", pass.settings.spec.version),
            );
            info!(
                "BIOSSettings {} waits for BIOS version {} (server runs {})",
                pass.name, pass.settings.spec.version, version
            );
            return Ok(Action::requeue(self.config.version_poll_interval));
        }
        if conditions::find(&status.conditions, PENDING_VERSION_UPDATE).is_some() {
            conditions::set(&mut status.conditions, PENDING_VERSION_UPDATE, false, "VersionMatched", "");
        }

        let Some(first) = pass.flow.first().map(|step| step.priority) else {
            return Err(ControllerError::Validation("settingsFlow is empty".to_string()));
        };
        let live = self.redfish.get_bios_attributes(&pass.endpoint, uuid).await?;
        let diff = flow::diff(&flow::merged_settings(&pass.flow), &live);
        if diff.is_empty() {
            let last = pass.flow.last().map_or(first, |step| step.priority);
            conditions::set_step(&mut status.conditions, VERIFY_SETTING, last, true, "SettingsVerified", "");
            self.mark_bios_settings_applied(pass, status);
            return Ok(Action::await_change());
        }

        let reboot = self.redfish.requires_reboot(&pass.endpoint, uuid, &diff).await?;
        let powered = pass.server.power_state() == Some(ServerPowerState::On);
        let in_use = matches!(pass.server.state(), ServerState::Reserved | ServerState::Maintenance);
        if reboot || !powered || in_use {
            if let Some(wait) = self.acquire_bios_settings_maintenance(pass, status).await? {
                return Ok(wait);
            }
        }

        status.current_setting_priority = first;
        status.applied_setting_priority = 0;
        status.state = Some(SettingsState::InProgress);
        info!(
            "BIOSSettings {} starts applying {} attribute(s) on server {}",
            pass.name,
            diff.len(),
            name_of(&pass.server)?
        );
        self.bios_settings_in_progress(pass, status).await
    }

    /// Request (or reuse) the maintenance for this resource and record it in
    /// `spec.serverMaintenanceRef`; returns an action while a previous request is terminating
    async fn acquire_bios_settings_maintenance(
        &self,
        pass: &mut SettingsPass<'_>,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Option<Action>, ControllerError> {
        let existing = match &pass.maintenance_ref {
            Some(reference) => self.referenced_maintenance(reference).await?,
            None => None,
        };
        let maintenance = match existing {
            Some(maintenance) => maintenance,
            None => {
                let lease = self
                    .request_maintenance(
                        pass.settings,
                        name_of(&pass.server)?,
                        ChildName::Fixed(pass.name.to_string()),
                        pass.settings.spec.server_maintenance_policy,
                        MAINTENANCE_REASON,
                    )
                    .await?;
                match lease {
                    Lease::Requested(maintenance) => maintenance,
                    Lease::Terminating => return Ok(Some(Action::requeue(self.config.approval_poll_interval))),
                }
            }
        };

        let reference = ObjectReference::to_object(&maintenance);
        if pass.settings.spec.server_maintenance_ref != reference {
            self.bios_settings
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
        Ok(None)
    }

    async fn bios_settings_in_progress(
        &self,
        pass: &mut SettingsPass<'_>,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(SettingsState::InProgress);
        let holding = conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED)
            && !conditions::is_true(&status.conditions, SERVER_MAINTENANCE_DELETED);
        if holding {
            match self.hold_on(pass.maintenance_ref.as_ref(), &pass.server).await? {
                Hold::Held => {}
                Hold::Waiting => {
                    debug!(
                        "BIOSSettings {} waits for its maintenance to take server {}",
                        pass.name,
                        name_of(&pass.server)?
                    );
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
                Hold::Withdrawn => {
                    info!("Maintenance of BIOSSettings {} was withdrawn, starting over", pass.name);
                    conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_CREATED);
                    status.state = Some(SettingsState::Pending);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
            }
        }

        let step = match flow::step(&pass.flow, status.current_setting_priority) {
            Some(step) => step.clone(),
            None => match flow::next_step(&pass.flow, status.applied_setting_priority) {
                Some(step) => {
                    warn!(
                        "BIOSSettings {} lost step {}, continuing with {}",
                        pass.name, status.current_setting_priority, step.priority
                    );
                    status.current_setting_priority = step.priority;
                    step.clone()
                }
                None => return self.complete_bios_settings(pass, status).await,
            },
        };
        let priority = step.priority;
        let uuid = pass.server.spec.uuid.clone();

        let started = conditions::since(&status.conditions, &conditions::step_type(TIMEOUT_START, priority));
        let verified = conditions::step_is_true(&status.conditions, VERIFY_SETTING, priority);
        match started {
            None => {
                conditions::set_step(&mut status.conditions, TIMEOUT_START, priority, true, "StepStarted", "");
            }
            Some(started) if !verified && elapsed_since(started) > self.config.settings_timeout => {
                warn!("BIOSSettings {} step {} timed out", pass.name, priority);
                conditions::set_step(
                    &mut status.conditions,
                    TIMEOUT_EXCEEDED,
                    priority,
                    true,
                    "Timeout",
                    &format!("step did not finish within {:?}", self.config.settings_timeout),
                );
                status.state = Some(SettingsState::Failed);
                return Ok(Action::await_change());
            }
            Some(_) => {}
        }

        // Without a maintenance the server was already found powered and free
        if holding && !conditions::step_is_true(&status.conditions, TURN_SERVER_ON, priority) {
            if let Some(wait) = self.drive_power(&pass.server, Power::On).await? {
                return Ok(wait);
            }
            conditions::set_step(&mut status.conditions, TURN_SERVER_ON, priority, true, "ServerPoweredOn", "");
        }

        if !conditions::step_is_true(&status.conditions, ISSUE_SETTINGS_UPDATE, priority) {
            let live = self.redfish.get_bios_attributes(&pass.endpoint, &uuid).await?;
            let delta = flow::diff(&step.settings, &live);
            let reboot = !delta.is_empty() && self.redfish.requires_reboot(&pass.endpoint, &uuid, &delta).await?;
            let reason = if reboot { "RebootRequired" } else { "RebootNotRequired" };
            conditions::set_step(&mut status.conditions, SKIP_REBOOT, priority, !reboot, reason, "");
            if !delta.is_empty() {
                self.redfish.set_bios_attributes(&pass.endpoint, &uuid, &delta).await?;
            }
            conditions::set_step(
                &mut status.conditions,
                ISSUE_SETTINGS_UPDATE,
                priority,
                true,
                "SettingsIssued",
                &format!("{} attribute(s) sent", delta.len()),
            );
            info!("BIOSSettings {} issued step {} ({} attribute(s))", pass.name, priority, delta.len());
        }

        let reboot = conditions::find_step(&status.conditions, SKIP_REBOOT, priority).is_some_and(|c| !c.is_true());
        if reboot {
            if !conditions::step_is_true(&status.conditions, REBOOT_POWER_OFF, priority) {
                if let Some(wait) = self.drive_power(&pass.server, Power::Off).await? {
                    return Ok(wait);
                }
                conditions::set_step(&mut status.conditions, REBOOT_POWER_OFF, priority, true, "ServerPoweredOff", "");
            }
            if !conditions::step_is_true(&status.conditions, REBOOT_POWER_ON, priority) {
                if let Some(wait) = self.drive_power(&pass.server, Power::On).await? {
                    return Ok(wait);
                }
                conditions::set_step(&mut status.conditions, REBOOT_POWER_ON, priority, true, "ServerPoweredOn", "");
            }
        }

        if !conditions::step_is_true(&status.conditions, VERIFY_SETTING, priority) {
            let live = self.redfish.get_bios_attributes(&pass.endpoint, &uuid).await?;
            let outstanding = flow::diff(&step.settings, &live);
            if !outstanding.is_empty() {
                debug!(
                    "BIOSSettings {} step {} waits for {} attribute(s)",
                    pass.name,
                    priority,
                    outstanding.len()
                );
                return Ok(Action::requeue(self.config.power_poll_interval));
            }
            conditions::set_step(&mut status.conditions, VERIFY_SETTING, priority, true, "SettingsVerified", "");
        }
        status.applied_setting_priority = priority;

        if let Some(next) = flow::next_step(&pass.flow, priority) {
            conditions::set_step(
                &mut status.conditions,
                MOVE_TO_NEXT_STEP,
                priority,
                true,
                "NextStep",
                &format!("continuing with step {}", next.priority),
            );
            status.current_setting_priority = next.priority;
            status.state = Some(SettingsState::InWaiting);
            return Ok(Action::requeue(self.config.power_poll_interval));
        }
        self.complete_bios_settings(pass, status).await
    }

    /// Release the maintenance and mark the flow applied
    async fn complete_bios_settings(
        &self,
        pass: &mut SettingsPass<'_>,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        let holding = conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED);
        if holding || pass.maintenance_ref.is_some() {
            if pass.maintenance_ref.take().is_some() {
                self.bios_settings
                    .patch(pass.name, &json!({ "spec": { "serverMaintenanceRef": null } }))
                    .await?;
            }
            let remaining = self.release_maintenances(pass.settings).await?;
            conditions::set(&mut status.conditions, SERVER_MAINTENANCE_DELETED, true, "MaintenanceDeleted", "");
            if remaining {
                debug!("BIOSSettings {} waits for its maintenance to go away", pass.name);
                return Ok(Action::requeue(self.config.approval_poll_interval));
            }
        }
        self.mark_bios_settings_applied(pass, status);
        Ok(Action::await_change())
    }

    fn mark_bios_settings_applied(&self, pass: &SettingsPass<'_>, status: &mut BIOSSettingsStatus) {
        status.state = Some(SettingsState::Applied);
        status.applied_setting_priority = LAST_STEP;
        status.current_setting_priority = LAST_STEP;
        status.last_applied_time = Some(Utc::now());
        info!("BIOSSettings {} applied on server {}", pass.name, pass.server.spec.uuid);
    }

    /// Applied resources start over when the BIOS drifts from the flow
    async fn bios_settings_applied(
        &self,
        pass: &mut SettingsPass<'_>,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        let uuid = pass.server.spec.uuid.as_str();
        let version = self.redfish.get_bios_version(&pass.endpoint, uuid).await?;
        let live = self.redfish.get_bios_attributes(&pass.endpoint, uuid).await?;
        let drifted = version != pass.settings.spec.version
            || !flow::diff(&flow::merged_settings(&pass.flow), &live).is_empty();
        if !drifted {
            return Ok(Action::await_change());
        }
        info!("BIOSSettings {} drifted from server {}, starting over", pass.name, uuid);
        status.conditions.clear();
        status.applied_setting_priority = 0;
        status.current_setting_priority = 0;
        self.bios_settings_pending(pass, status).await
    }

    async fn retry_bios_settings(
        &self,
        settings: &BIOSSettings,
        status: &mut BIOSSettingsStatus,
    ) -> Result<Action, ControllerError> {
        let name = name_of(settings)?;
        let Some(trigger) = retry::retry_trigger(&settings.metadata, status) else {
            debug!("BIOSSettings {} failed, waiting for a retry request", name);
            return Ok(Action::await_change());
        };
        let holding = retry::rewind(status, Some(status.current_setting_priority));
        status.state = Some(if holding {
            SettingsState::InProgress
        } else {
            SettingsState::Pending
        });
        if trigger == retry::RetryTrigger::Requested {
            retry::clear_operation(&self.bios_settings, settings).await?;
        }
        info!("Retrying BIOSSettings {} ({:?})", name, trigger);
        Ok(Action::requeue(self.config.power_poll_interval))
    }

    async fn delete_bios_settings(&self, settings: &BIOSSettings) -> Result<Action, ControllerError> {
        if !has_finalizer(settings, BIOS_SETTINGS_FINALIZER) {
            return Ok(Action::await_change());
        }
        let name = name_of(settings)?;
        info!("Deleting BIOSSettings {}", name);

        if self.release_maintenances(settings).await? {
            debug!("BIOSSettings {} waits for its maintenance to go away", name);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        if let Some(server_ref) = &settings.spec.server_ref {
            if let Some(server) = self.servers.get_opt(&server_ref.name).await? {
                if server.spec.bios_settings_ref.as_ref().is_some_and(|r| r.name == name) {
                    let mut released = server;
                    released.spec.bios_settings_ref = None;
                    self.servers.replace(&released).await?;
                    info!("Cleared biosSettingsRef on server {}", server_ref.name);
                }
            }
        }
        remove_finalizer(&self.bios_settings, settings, BIOS_SETTINGS_FINALIZER).await?;
        Ok(Action::await_change())
    }

    /// Ask for `target` power and report whether to wait for it.
    ///
    /// Nothing is written when the server already reports the state.
    pub(crate) async fn drive_power(&self, server: &Server, target: Power) -> Result<Option<Action>, ControllerError> {
        let observed = match target {
            Power::On => ServerPowerState::On,
            Power::Off => ServerPowerState::Off,
        };
        if server.power_state() == Some(observed) {
            return Ok(None);
        }
        if server.spec.power != Some(target) {
            self.servers
                .patch(name_of(server)?, &json!({ "spec": { "power": target } }))
                .await?;
            debug!("Requested power {:?} on server {}", target, name_of(server)?);
        }
        Ok(Some(Action::requeue(self.config.power_poll_interval)))
    }
}

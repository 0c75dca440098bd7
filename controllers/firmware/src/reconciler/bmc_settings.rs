//! BMCSettings reconciler
//!
//! Writes manager attributes on one BMC. When the changed attributes only
//! take effect after a manager reset, every server the BMC serves is put
//! into maintenance first.

use super::leases::Hold;
use super::{retry, Reconciler, BMC_SETTINGS_FINALIZER};
use crate::annotations::{should_ignore, wants_retry};
use crate::conditions::{
    self, BMC_RESET, ISSUE_SETTINGS_UPDATE, PENDING_VERSION_UPDATE, SERVER_MAINTENANCE_CREATED,
    SERVER_MAINTENANCE_DELETED, SKIP_BMC_RESET, TIMEOUT_EXCEEDED, TIMEOUT_START, VERIFY_BMC_SETTINGS,
};
use crate::error::ControllerError;
use crate::flow;
use crate::reconcile_helpers::{
    elapsed_since, ensure_finalizer, has_finalizer, is_deleting, name_of, patch_status_if_changed, remove_finalizer,
};
use chrono::Utc;
use crds::{BMCSettings, BMCSettingsStatus, LocalObjectReference, ObjectReference, SettingsState, BMC};
use kube_runtime::controller::Action;
use redfish_client::BmcEndpoint;
use serde_json::json;
use tracing::{debug, info, warn};

const MAINTENANCE_REASON: &str = "BMC settings update";

struct BmcSettingsPass<'a> {
    settings: &'a BMCSettings,
    name: &'a str,
    bmc: BMC,
    endpoint: BmcEndpoint,
    maintenance_refs: Vec<ObjectReference>,
}

impl Reconciler {
    pub async fn reconcile_bmc_settings(&self, settings: &BMCSettings) -> Result<Action, ControllerError> {
        let name = name_of(settings)?;
        if should_ignore(&settings.metadata) {
            debug!("Skipping ignored BMCSettings {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(settings) {
            return self.delete_bmc_settings(settings).await;
        }

        info!("Reconciling BMCSettings {}", name);
        ensure_finalizer(&self.bmc_settings, settings, BMC_SETTINGS_FINALIZER).await?;
        self.delete_orphaned_maintenances(settings, &settings.spec.server_maintenance_refs)
            .await?;

        let mut status = settings.status.clone().unwrap_or_default();
        let result = self.drive_bmc_settings(settings, &mut status).await;
        let result = retry::settle(&format!("BMCSettings {name}"), result, &mut status, |s| {
            s.state = Some(SettingsState::Failed)
        });
        patch_status_if_changed(&self.bmc_settings, name, settings.status.as_ref(), &status).await?;
        result
    }

    async fn drive_bmc_settings(
        &self,
        settings: &BMCSettings,
        status: &mut BMCSettingsStatus,
    ) -> Result<Action, ControllerError> {
        let name = name_of(settings)?;
        retry::init_retries(status, settings.spec.failed_auto_retry_count);

        if status.state == Some(SettingsState::Failed) {
            let Some(trigger) = retry::retry_trigger(&settings.metadata, status) else {
                debug!("BMCSettings {} failed, waiting for a retry request", name);
                return Ok(Action::await_change());
            };
            let holding = retry::rewind(status, None);
            conditions::remove(&mut status.conditions, TIMEOUT_START);
            conditions::remove(&mut status.conditions, BMC_RESET);
            status.state = Some(if holding {
                SettingsState::InProgress
            } else {
                SettingsState::Pending
            });
            if trigger == retry::RetryTrigger::Requested {
                retry::clear_operation(&self.bmc_settings, settings).await?;
            }
            info!("Retrying BMCSettings {} ({:?})", name, trigger);
            return Ok(Action::requeue(self.config.power_poll_interval));
        }
        if wants_retry(&settings.metadata) {
            retry::clear_operation(&self.bmc_settings, settings).await?;
        }

        let bmc_ref = settings
            .spec
            .bmc_ref
            .as_ref()
            .ok_or_else(|| ControllerError::Validation("spec.bmcRef is required".to_string()))?;
        let Some(bmc) = self.bmcs.get_opt(&bmc_ref.name).await? else {
            warn!("BMCSettings {} targets missing BMC {}", name, bmc_ref.name);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        let Some(bmc) = self.claim_bmc_settings_ref(name, bmc).await? else {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };
        let endpoint = self.bmc_endpoint(&bmc).await?;
        let mut pass = BmcSettingsPass {
            settings,
            name,
            bmc,
            endpoint,
            maintenance_refs: settings.spec.server_maintenance_refs.clone(),
        };

        match status.state {
            None | Some(SettingsState::Pending) => self.bmc_settings_pending(&mut pass, status).await,
            Some(SettingsState::InProgress | SettingsState::InWaiting) => {
                self.bmc_settings_in_progress(&mut pass, status).await
            }
            Some(SettingsState::Applied) => {
                let version = self.redfish.get_bmc_version(&pass.endpoint).await?;
                let live = self.redfish.get_bmc_attributes(&pass.endpoint).await?;
                if version == settings.spec.version && flow::diff(&settings.spec.settings, &live).is_empty() {
                    return Ok(Action::await_change());
                }
                info!("BMCSettings {} drifted from BMC {}, starting over", name, bmc_ref.name);
                status.conditions.clear();
                self.bmc_settings_pending(&mut pass, status).await
            }
            Some(SettingsState::Failed) => Ok(Action::await_change()),
        }
    }

    /// Make `bmc.spec.bmcSettingsRef` name this resource, taking over stale
    /// references
    async fn claim_bmc_settings_ref(&self, name: &str, bmc: BMC) -> Result<Option<BMC>, ControllerError> {
        if let Some(current) = &bmc.spec.bmc_settings_ref {
            if current.name == name {
                return Ok(Some(bmc));
            }
            if let Some(holder) = self.bmc_settings.get_opt(&current.name).await? {
                if !is_deleting(&holder) {
                    debug!("BMC {} is managed by BMCSettings {}, {} waits", name_of(&bmc)?, current.name, name);
                    return Ok(None);
                }
            }
        }
        let mut claimed = bmc;
        claimed.spec.bmc_settings_ref = Some(LocalObjectReference::new(name));
        Ok(Some(self.bmcs.replace(&claimed).await?))
    }

    async fn bmc_settings_pending(
        &self,
        pass: &mut BmcSettingsPass<'_>,
        status: &mut BMCSettingsStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(SettingsState::Pending);
        let version = self.redfish.get_bmc_version(&pass.endpoint).await?;
        if version != pass.settings.spec.version {
            conditions::set(
                &mut status.conditions,
                PENDING_VERSION_UPDATE,
                true,
                "VersionMismatch",
                &format!("BMC runs {version}, settings are for {}", pass.settings.spec.version),
            );
            info!("BMCSettings {} waits for BMC version {}", pass.name, pass.settings.spec.version);
            return Ok(Action::requeue(self.config.version_poll_interval));
        }
        if conditions::find(&status.conditions, PENDING_VERSION_UPDATE).is_some() {
            conditions::set(&mut status.conditions, PENDING_VERSION_UPDATE, false, "VersionMatched", "");
        }

        let live = self.redfish.get_bmc_attributes(&pass.endpoint).await?;
        let diff = flow::diff(&pass.settings.spec.settings, &live);
        if diff.is_empty() {
            conditions::set(&mut status.conditions, VERIFY_BMC_SETTINGS, true, "SettingsVerified", "");
            return Ok(self.mark_bmc_settings_applied(pass, status));
        }

        let reset = self.redfish.bmc_reset_required(&pass.endpoint, &diff).await?;
        let reason = if reset { "ResetRequired" } else { "ResetNotRequired" };
        conditions::set(&mut status.conditions, SKIP_BMC_RESET, !reset, reason, "");
        if reset {
            let servers = self.servers_of_bmc(name_of(&pass.bmc)?).await?;
            let requested = self
                .request_bmc_maintenances(
                    pass.settings,
                    &servers,
                    &pass.maintenance_refs,
                    pass.settings.spec.server_maintenance_policy,
                    MAINTENANCE_REASON,
                )
                .await?;
            let Some(refs) = requested else {
                return Ok(Action::requeue(self.config.approval_poll_interval));
            };
            if refs != pass.settings.spec.server_maintenance_refs {
                self.bmc_settings
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
        }

        status.state = Some(SettingsState::InProgress);
        info!("BMCSettings {} starts applying {} attribute(s)", pass.name, diff.len());
        self.bmc_settings_in_progress(pass, status).await
    }

    async fn bmc_settings_in_progress(
        &self,
        pass: &mut BmcSettingsPass<'_>,
        status: &mut BMCSettingsStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(SettingsState::InProgress);
        let holding = conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED)
            && !conditions::is_true(&status.conditions, SERVER_MAINTENANCE_DELETED);
        if holding {
            match self.hold_on_all(&pass.maintenance_refs).await? {
                Hold::Held => {}
                Hold::Waiting => {
                    debug!("BMCSettings {} waits for its servers to enter maintenance", pass.name);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
                Hold::Withdrawn => {
                    info!("Maintenances of BMCSettings {} were withdrawn, starting over", pass.name);
                    conditions::remove(&mut status.conditions, SERVER_MAINTENANCE_CREATED);
                    status.state = Some(SettingsState::Pending);
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
            }
        }

        let verified = conditions::is_true(&status.conditions, VERIFY_BMC_SETTINGS);
        match conditions::since(&status.conditions, TIMEOUT_START) {
            None => {
                conditions::set(&mut status.conditions, TIMEOUT_START, true, "Started", "");
            }
            Some(started) if !verified && elapsed_since(started) > self.config.settings_timeout => {
                warn!("BMCSettings {} timed out", pass.name);
                conditions::set(
                    &mut status.conditions,
                    TIMEOUT_EXCEEDED,
                    true,
                    "Timeout",
                    &format!("settings not applied within {:?}", self.config.settings_timeout),
                );
                status.state = Some(SettingsState::Failed);
                return Ok(Action::await_change());
            }
            Some(_) => {}
        }

        if !conditions::is_true(&status.conditions, ISSUE_SETTINGS_UPDATE) {
            let live = self.redfish.get_bmc_attributes(&pass.endpoint).await?;
            let delta = flow::diff(&pass.settings.spec.settings, &live);
            if !delta.is_empty() {
                self.redfish.set_bmc_attributes(&pass.endpoint, &delta).await?;
            }
            conditions::set(
                &mut status.conditions,
                ISSUE_SETTINGS_UPDATE,
                true,
                "SettingsIssued",
                &format!("{} attribute(s) sent", delta.len()),
            );
            info!("BMCSettings {} issued {} attribute(s)", pass.name, delta.len());
        }

        let reset = conditions::find(&status.conditions, SKIP_BMC_RESET).is_some_and(|c| !c.is_true());
        if reset {
            let what = format!("BMCSettings {}", pass.name);
            if let Some(wait) = self.await_bmc_reset(&pass.endpoint, &mut status.conditions, &what).await? {
                return Ok(wait);
            }
        }

        if !verified {
            let live = self.redfish.get_bmc_attributes(&pass.endpoint).await?;
            let outstanding = flow::diff(&pass.settings.spec.settings, &live);
            if !outstanding.is_empty() {
                debug!("BMCSettings {} waits for {} attribute(s)", pass.name, outstanding.len());
                return Ok(Action::requeue(self.config.power_poll_interval));
            }
            conditions::set(&mut status.conditions, VERIFY_BMC_SETTINGS, true, "SettingsVerified", "");
        }

        if !pass.maintenance_refs.is_empty() {
            self.bmc_settings
                .patch(pass.name, &json!({ "spec": { "serverMaintenanceRefs": null } }))
                .await?;
            pass.maintenance_refs.clear();
        }
        if conditions::is_true(&status.conditions, SERVER_MAINTENANCE_CREATED) {
            let remaining = self.release_maintenances(pass.settings).await?;
            conditions::set(&mut status.conditions, SERVER_MAINTENANCE_DELETED, true, "MaintenanceDeleted", "");
            if remaining {
                debug!("BMCSettings {} waits for its maintenances to go away", pass.name);
                return Ok(Action::requeue(self.config.approval_poll_interval));
            }
        }
        Ok(self.mark_bmc_settings_applied(pass, status))
    }

    fn mark_bmc_settings_applied(&self, pass: &BmcSettingsPass<'_>, status: &mut BMCSettingsStatus) -> Action {
        status.state = Some(SettingsState::Applied);
        status.last_applied_time = Some(Utc::now());
        info!("BMCSettings {} applied on BMC {}", pass.name, pass.endpoint.address);
        Action::await_change()
    }

    async fn delete_bmc_settings(&self, settings: &BMCSettings) -> Result<Action, ControllerError> {
        if !has_finalizer(settings, BMC_SETTINGS_FINALIZER) {
            return Ok(Action::await_change());
        }
        let name = name_of(settings)?;
        info!("Deleting BMCSettings {}", name);
        if self.release_maintenances(settings).await? {
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        if let Some(bmc_ref) = &settings.spec.bmc_ref {
            if let Some(bmc) = self.bmcs.get_opt(&bmc_ref.name).await? {
                if bmc.spec.bmc_settings_ref.as_ref().is_some_and(|r| r.name == name) {
                    let mut released = bmc;
                    released.spec.bmc_settings_ref = None;
                    self.bmcs.replace(&released).await?;
                }
            }
        }
        remove_finalizer(&self.bmc_settings, settings, BMC_SETTINGS_FINALIZER).await?;
        Ok(Action::await_change())
    }
}

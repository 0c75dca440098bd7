//! ServerMaintenance reconciler
//!
//! Hands a server to at most one maintenance at a time. The lease is
//! `server.spec.maintenanceRef`, written with a resource-version checked
//! replace so two maintenances racing for the same server cannot both win.

use super::{Reconciler, CONFLICT_REQUEUE, MAINTENANCE_FINALIZER};
use crate::annotations::{
    claim_needs_maintenance_patch, claim_release_patch, maintenance_approved, maintenance_reason, should_ignore,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::{
    controller_reference, ensure_finalizer, has_finalizer, is_controlled_by, is_deleting, merge_diff, name_of,
    patch_status_if_changed, remove_finalizer,
};
use crds::{
    LocalObjectReference, ObjectReference, Server, ServerBootConfiguration, ServerBootConfigurationSpec,
    ServerBootConfigurationState, ServerMaintenance, ServerMaintenancePolicy, ServerMaintenanceState,
    ServerMaintenanceStatus,
};
use kube_runtime::controller::Action;
use metal_store::Store;
use serde_json::json;
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_server_maintenance(&self, maintenance: &ServerMaintenance) -> Result<Action, ControllerError> {
        let name = name_of(maintenance)?;
        let namespace = maintenance
            .metadata
            .namespace
            .as_deref()
            .ok_or(ControllerError::MissingObjectKey("metadata.namespace"))?;
        if should_ignore(&maintenance.metadata) {
            debug!("Skipping ignored ServerMaintenance {}/{}", namespace, name);
            return Ok(Action::await_change());
        }
        let store = self.maintenances.within(namespace);

        if is_deleting(maintenance) {
            return self.release_server(maintenance, &store).await;
        }

        info!("Reconciling ServerMaintenance {}/{}", namespace, name);
        ensure_finalizer(&store, maintenance, MAINTENANCE_FINALIZER).await?;

        let mut status = maintenance.status.clone().unwrap_or_default();
        let action = match maintenance.state() {
            None | Some(ServerMaintenanceState::Pending) => {
                self.maintenance_pending(maintenance, &mut status).await?
            }
            Some(ServerMaintenanceState::InMaintenance) => {
                self.maintenance_active(maintenance, &mut status).await?
            }
            Some(ServerMaintenanceState::Failed | ServerMaintenanceState::Completed) => Action::await_change(),
        };
        patch_status_if_changed(&store, name, maintenance.status.as_ref(), &status).await?;
        Ok(action)
    }

    /// Server a maintenance targets; `None` when it does not name one or the
    /// server is gone
    async fn maintained_server(&self, maintenance: &ServerMaintenance) -> Result<Option<Server>, ControllerError> {
        match &maintenance.spec.server_ref {
            Some(server_ref) => Ok(self.servers.get_opt(&server_ref.name).await?),
            None => Ok(None),
        }
    }

    async fn maintenance_pending(
        &self,
        maintenance: &ServerMaintenance,
        status: &mut ServerMaintenanceStatus,
    ) -> Result<Action, ControllerError> {
        status.state = Some(ServerMaintenanceState::Pending);
        let Some(server) = self.maintained_server(maintenance).await? else {
            warn!(
                "ServerMaintenance {} targets a missing server, waiting",
                name_of(maintenance)?
            );
            return Ok(Action::requeue(self.config.approval_poll_interval));
        };

        if let Some(claim_ref) = &server.spec.server_claim_ref {
            let claims = self
                .claims
                .within(claim_ref.namespace.as_deref().unwrap_or(&self.config.manager_namespace));
            match claims.get_opt(&claim_ref.name).await? {
                Some(claim) => {
                    let reason = maintenance_reason(&maintenance.metadata);
                    if let Some(patch) = claim_needs_maintenance_patch(&claim.metadata, reason) {
                        claims.patch(&claim_ref.name, &patch).await?;
                        info!("Asked owner of ServerClaim {} for maintenance", claim_ref.name);
                    }
                    if maintenance.spec.policy == ServerMaintenancePolicy::OwnerApproval
                        && !maintenance_approved(&claim.metadata)
                    {
                        debug!(
                            "ServerMaintenance {} waits for approval on ServerClaim {}",
                            name_of(maintenance)?,
                            claim_ref.name
                        );
                        return Ok(Action::requeue(self.config.approval_poll_interval));
                    }
                }
                None => debug!("ServerClaim {} is gone, treating server as unclaimed", claim_ref.name),
            }
        }

        let holds = server
            .spec
            .maintenance_ref
            .as_ref()
            .is_some_and(|r| r.refers_to(maintenance));
        let server = if holds {
            server
        } else {
            if let Some(holder) = &server.spec.maintenance_ref {
                if self.referenced_maintenance(holder).await?.is_some() {
                    debug!(
                        "Server {} is held by ServerMaintenance {}, {} stays pending",
                        name_of(&server)?,
                        holder.name,
                        name_of(maintenance)?
                    );
                    return Ok(Action::requeue(self.config.approval_poll_interval));
                }
            }
            let mut claimed = server.clone();
            claimed.spec.maintenance_ref = ObjectReference::to_object(maintenance);
            if maintenance.spec.server_boot_configuration_template.is_none() {
                if let Some(power) = maintenance.spec.server_power {
                    claimed.spec.power = Some(power);
                }
            }
            match self.servers.replace(&claimed).await {
                Ok(updated) => {
                    info!(
                        "ServerMaintenance {} took server {}",
                        name_of(maintenance)?,
                        name_of(&updated)?
                    );
                    updated
                }
                Err(e) if e.is_conflict() => {
                    debug!("Lost race for server {}, retrying", name_of(&server)?);
                    return Ok(Action::requeue(CONFLICT_REQUEUE));
                }
                Err(e) => return Err(e.into()),
            }
        };

        status.state = Some(ServerMaintenanceState::InMaintenance);
        self.apply_boot_configuration(maintenance, &server, status).await
    }

    async fn maintenance_active(
        &self,
        maintenance: &ServerMaintenance,
        status: &mut ServerMaintenanceStatus,
    ) -> Result<Action, ControllerError> {
        let Some(server) = self.maintained_server(maintenance).await? else {
            return Ok(Action::await_change());
        };
        let holds = server
            .spec
            .maintenance_ref
            .as_ref()
            .is_some_and(|r| r.refers_to(maintenance));
        if !holds {
            warn!(
                "ServerMaintenance {} lost server {}, going back to Pending",
                name_of(maintenance)?,
                name_of(&server)?
            );
            status.state = Some(ServerMaintenanceState::Pending);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        self.apply_boot_configuration(maintenance, &server, status).await
    }

    /// Create or update the requested boot configuration and, once it is
    /// ready, point the server at it and apply the requested power
    async fn apply_boot_configuration(
        &self,
        maintenance: &ServerMaintenance,
        server: &Server,
        status: &mut ServerMaintenanceStatus,
    ) -> Result<Action, ControllerError> {
        let Some(template) = &maintenance.spec.server_boot_configuration_template else {
            return Ok(Action::await_change());
        };
        let namespace = maintenance
            .metadata
            .namespace
            .as_deref()
            .unwrap_or(&self.config.manager_namespace);
        let configs = self.boot_configs.within(namespace);
        let desired = ServerBootConfigurationSpec {
            server_ref: LocalObjectReference::new(name_of(server)?),
            image: template.image.clone(),
            ignition_secret_ref: template.ignition_secret_ref.clone(),
        };

        let config = match configs.get_opt(&template.name).await? {
            Some(existing) => {
                let current = serde_json::to_value(&existing.spec)?;
                match merge_diff(&current, &serde_json::to_value(&desired)?) {
                    Some(patch) => configs.patch(&template.name, &json!({ "spec": patch })).await?,
                    None => existing,
                }
            }
            None => {
                let mut config = ServerBootConfiguration::new(&template.name, desired);
                config.metadata.namespace = Some(namespace.to_string());
                config.metadata.owner_references = Some(vec![controller_reference(maintenance)?]);
                let created = configs.create(&config).await?;
                info!("Created ServerBootConfiguration {}/{}", namespace, template.name);
                created
            }
        };

        match config.status.as_ref().and_then(|s| s.state) {
            Some(ServerBootConfigurationState::Ready) => {
                let reference = ObjectReference::to_object(&config);
                if server.spec.maintenance_boot_configuration_ref == reference {
                    return Ok(Action::await_change());
                }
                let mut updated = server.clone();
                updated.spec.maintenance_boot_configuration_ref = reference;
                if let Some(power) = maintenance.spec.server_power {
                    updated.spec.power = Some(power);
                }
                match self.servers.replace(&updated).await {
                    Ok(_) => {
                        info!("Server {} boots from {}/{}", name_of(server)?, namespace, template.name);
                        Ok(Action::await_change())
                    }
                    Err(e) if e.is_conflict() => Ok(Action::requeue(CONFLICT_REQUEUE)),
                    Err(e) => Err(e.into()),
                }
            }
            Some(ServerBootConfigurationState::Error) => {
                warn!(
                    "ServerBootConfiguration {}/{} failed, ServerMaintenance {} fails",
                    namespace,
                    template.name,
                    name_of(maintenance)?
                );
                status.state = Some(ServerMaintenanceState::Failed);
                Ok(Action::await_change())
            }
            _ => {
                debug!("Waiting for ServerBootConfiguration {}/{}", namespace, template.name);
                Ok(Action::requeue(self.config.approval_poll_interval))
            }
        }
    }

    /// Give the server back and let the maintenance go
    async fn release_server(
        &self,
        maintenance: &ServerMaintenance,
        store: &Store<ServerMaintenance>,
    ) -> Result<Action, ControllerError> {
        if !has_finalizer(maintenance, MAINTENANCE_FINALIZER) {
            return Ok(Action::await_change());
        }
        info!("Releasing ServerMaintenance {}", name_of(maintenance)?);

        if let Some(server) = self.maintained_server(maintenance).await? {
            let holds = server
                .spec
                .maintenance_ref
                .as_ref()
                .is_some_and(|r| r.refers_to(maintenance));
            if holds {
                let mut released = server.clone();
                released.spec.maintenance_ref = None;
                released.spec.maintenance_boot_configuration_ref = None;
                match self.servers.replace(&released).await {
                    Ok(_) => info!("Server {} released", name_of(&server)?),
                    Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
            if let Some(claim_ref) = &server.spec.server_claim_ref {
                let claims = self
                    .claims
                    .within(claim_ref.namespace.as_deref().unwrap_or(&self.config.manager_namespace));
                if let Some(claim) = claims.get_opt(&claim_ref.name).await? {
                    if let Some(patch) = claim_release_patch(&claim.metadata) {
                        claims.patch(&claim_ref.name, &patch).await?;
                    }
                }
            }
        } else {
            debug!("Server of ServerMaintenance {} is gone", name_of(maintenance)?);
        }

        if let Some(template) = &maintenance.spec.server_boot_configuration_template {
            let namespace = maintenance
                .metadata
                .namespace
                .as_deref()
                .unwrap_or(&self.config.manager_namespace);
            let configs = self.boot_configs.within(namespace);
            if let Some(config) = configs.get_opt(&template.name).await? {
                if is_controlled_by(&config.metadata, maintenance) {
                    configs.delete(&template.name).await?;
                }
            }
        }

        remove_finalizer(store, maintenance, MAINTENANCE_FINALIZER).await?;
        Ok(Action::await_change())
    }
}

//! Maintenance leases requested by the settings and version reconcilers.
//!
//! A work item asks for exclusive access to a server by creating a
//! ServerMaintenance it controls (in the manager namespace) and recording the
//! reference in its own spec. The arbiter in `maintenance` hands the server
//! over; these helpers only create, find, check and delete the requests.

use super::Reconciler;
use crate::annotations::MAINTENANCE_REASON_ANNOTATION;
use crate::error::ControllerError;
use crate::naming::{self, ChildName};
use crate::reconcile_helpers::{controller_reference, is_controlled_by, is_deleting, name_of};
use crds::{
    LocalObjectReference, ObjectReference, Power, Server, ServerMaintenance, ServerMaintenancePolicy,
    ServerMaintenanceSpec, ServerMaintenanceState,
};
use kube::Resource;
use metal_store::{ListOptions, StoreError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A maintenance request as seen by its owner
#[derive(Debug)]
pub(crate) enum Lease {
    /// Request exists and is live
    Requested(ServerMaintenance),
    /// A previous request with the same name is still being torn down
    Terminating,
}

/// Where a work item stands with the maintenance it recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hold {
    /// The maintenance holds the server
    Held,
    /// The maintenance exists but has not taken the server yet
    Waiting,
    /// The reference was cleared or the maintenance is gone
    Withdrawn,
}

impl Reconciler {
    /// State of the single-server lease behind `reference`
    pub(crate) async fn hold_on(
        &self,
        reference: Option<&ObjectReference>,
        server: &Server,
    ) -> Result<Hold, ControllerError> {
        let Some(reference) = reference else {
            return Ok(Hold::Withdrawn);
        };
        Ok(match self.referenced_maintenance(reference).await? {
            None => Hold::Withdrawn,
            Some(m) if Self::maintenance_holds(&m, server) => Hold::Held,
            Some(m) if is_deleting(&m) => Hold::Withdrawn,
            Some(_) => Hold::Waiting,
        })
    }

    /// Maintenance behind `reference`, `None` when it is gone or was replaced
    pub(crate) async fn referenced_maintenance(
        &self,
        reference: &ObjectReference,
    ) -> Result<Option<ServerMaintenance>, ControllerError> {
        let namespace = reference
            .namespace
            .as_deref()
            .unwrap_or(&self.config.manager_namespace);
        let found = self.maintenances.within(namespace).get_opt(&reference.name).await?;
        Ok(found.filter(|m| reference.uid.is_none() || reference.refers_to(m)))
    }

    /// Maintenances controlled by `owner`, in any namespace
    pub(crate) async fn owned_maintenances<K>(&self, owner: &K) -> Result<Vec<ServerMaintenance>, ControllerError>
    where
        K: Resource,
    {
        Ok(self
            .maintenances
            .list(&ListOptions::default())
            .await?
            .into_iter()
            .filter(|m| is_controlled_by(&m.metadata, owner))
            .collect())
    }

    /// Get or create the maintenance `owner` uses for `server`
    pub(crate) async fn request_maintenance<K>(
        &self,
        owner: &K,
        server: &str,
        name: ChildName,
        policy: ServerMaintenancePolicy,
        reason: &str,
    ) -> Result<Lease, ControllerError>
    where
        K: Resource<DynamicType = ()>,
    {
        let owned = self.owned_maintenances(owner).await?;
        let for_server = |m: &&ServerMaintenance| m.spec.server_ref.as_ref().is_some_and(|r| r.name == server);
        if let Some(existing) = owned.iter().filter(for_server).find(|m| !is_deleting(*m)) {
            return Ok(Lease::Requested(existing.clone()));
        }

        let namespace = self.config.manager_namespace.as_str();
        let mut maintenance = ServerMaintenance::new(
            "",
            ServerMaintenanceSpec {
                policy,
                server_ref: Some(LocalObjectReference::new(server)),
                server_power: Some(Power::On),
                server_boot_configuration_template: None,
            },
        );
        let fixed_name = match &name {
            ChildName::Fixed(name) => Some(name.clone()),
            ChildName::Generated(_) => None,
        };
        naming::apply(&mut maintenance.metadata, name);
        maintenance.metadata.namespace = Some(namespace.to_string());
        maintenance.metadata.owner_references = Some(vec![controller_reference(owner)?]);
        maintenance.metadata.annotations = Some(BTreeMap::from([(
            MAINTENANCE_REASON_ANNOTATION.to_string(),
            reason.to_string(),
        )]));

        let store = self.maintenances.within(namespace);
        match store.create(&maintenance).await {
            Ok(created) => {
                info!(
                    "Requested ServerMaintenance {}/{} on server {}",
                    namespace,
                    name_of(&created)?,
                    server
                );
                Ok(Lease::Requested(created))
            }
            Err(StoreError::AlreadyExists(what)) => {
                let Some(fixed_name) = fixed_name else {
                    return Err(StoreError::AlreadyExists(what).into());
                };
                let existing = store.get(&fixed_name).await?;
                if !is_controlled_by(&existing.metadata, owner) {
                    return Err(ControllerError::Validation(format!(
                        "ServerMaintenance {namespace}/{fixed_name} exists and belongs to someone else"
                    )));
                }
                if is_deleting(&existing) {
                    debug!("ServerMaintenance {}/{} still terminating", namespace, fixed_name);
                    return Ok(Lease::Terminating);
                }
                Ok(Lease::Requested(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether `maintenance` is active and recorded as the server's holder
    pub(crate) fn maintenance_holds(maintenance: &ServerMaintenance, server: &Server) -> bool {
        maintenance.state() == Some(ServerMaintenanceState::InMaintenance)
            && server
                .spec
                .maintenance_ref
                .as_ref()
                .is_some_and(|r| r.refers_to(maintenance))
    }

    /// State of a BMC-wide lease, one maintenance per served server
    pub(crate) async fn hold_on_all(&self, refs: &[ObjectReference]) -> Result<Hold, ControllerError> {
        if refs.is_empty() {
            return Ok(Hold::Withdrawn);
        }
        let mut hold = Hold::Held;
        for reference in refs {
            let Some(maintenance) = self.referenced_maintenance(reference).await? else {
                return Ok(Hold::Withdrawn);
            };
            if is_deleting(&maintenance) {
                return Ok(Hold::Withdrawn);
            }
            let server = match &maintenance.spec.server_ref {
                Some(server_ref) => self.servers.get_opt(&server_ref.name).await?,
                None => None,
            };
            if !server.is_some_and(|s| Self::maintenance_holds(&maintenance, &s)) {
                hold = Hold::Waiting;
            }
        }
        Ok(hold)
    }

    /// Delete the maintenances `owner` controls.
    ///
    /// Returns whether any of them still exists (terminating).
    pub(crate) async fn release_maintenances<K>(&self, owner: &K) -> Result<bool, ControllerError>
    where
        K: Resource,
    {
        let owned = self.owned_maintenances(owner).await?;
        for maintenance in owned.iter().filter(|m| !is_deleting(*m)) {
            let namespace = maintenance
                .metadata
                .namespace
                .as_deref()
                .unwrap_or(&self.config.manager_namespace);
            self.maintenances.within(namespace).delete(name_of(maintenance)?).await?;
            info!("Released ServerMaintenance {}/{}", namespace, name_of(maintenance)?);
        }
        let remaining = self.owned_maintenances(owner).await?;
        Ok(!remaining.is_empty())
    }

    /// Delete owned maintenances the owner no longer references
    pub(crate) async fn delete_orphaned_maintenances<K>(
        &self,
        owner: &K,
        refs: &[ObjectReference],
    ) -> Result<(), ControllerError>
    where
        K: Resource,
    {
        for maintenance in self.owned_maintenances(owner).await? {
            if is_deleting(&maintenance) {
                continue;
            }
            let referenced = refs.iter().any(|r| {
                r.name == name_of(&maintenance).unwrap_or_default()
                    && (r.uid.is_none() || r.uid == maintenance.metadata.uid)
            });
            if referenced {
                continue;
            }
            let namespace = maintenance
                .metadata
                .namespace
                .as_deref()
                .unwrap_or(&self.config.manager_namespace);
            info!(
                "Deleting orphaned ServerMaintenance {}/{}",
                namespace,
                name_of(&maintenance)?
            );
            self.maintenances.within(namespace).delete(name_of(&maintenance)?).await?;
        }
        Ok(())
    }

    /// Servers managed by the BMC named `bmc`
    pub(crate) async fn servers_of_bmc(&self, bmc: &str) -> Result<Vec<Server>, ControllerError> {
        Ok(self
            .servers
            .list(&ListOptions::default().field("spec.bmcRef.name", bmc))
            .await?)
    }

    /// One maintenance per server for a BMC-wide work item.
    ///
    /// Existing references whose maintenance targets a served server are kept;
    /// missing servers get a request of their own. Returns `None` while a
    /// previous request is still terminating.
    pub(crate) async fn request_bmc_maintenances<K>(
        &self,
        owner: &K,
        servers: &[Server],
        existing: &[ObjectReference],
        policy: ServerMaintenancePolicy,
        reason: &str,
    ) -> Result<Option<Vec<ObjectReference>>, ControllerError>
    where
        K: Resource<DynamicType = ()>,
    {
        let owner_name = name_of(owner)?;
        let mut refs = Vec::with_capacity(servers.len());
        for server in servers {
            let server_name = name_of(server)?;
            let mut kept = None;
            for reference in existing {
                if let Some(m) = self.referenced_maintenance(reference).await? {
                    if !is_deleting(&m) && m.spec.server_ref.as_ref().is_some_and(|r| r.name == server_name) {
                        kept = ObjectReference::to_object(&m);
                        break;
                    }
                }
            }
            if let Some(reference) = kept {
                refs.push(reference);
                continue;
            }
            let name = naming::child_name(owner_name, server_name);
            match self.request_maintenance(owner, server_name, name, policy, reason).await? {
                Lease::Requested(m) => refs.extend(ObjectReference::to_object(&m)),
                Lease::Terminating => return Ok(None),
            }
        }
        Ok(Some(refs))
    }
}

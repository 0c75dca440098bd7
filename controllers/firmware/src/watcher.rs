//! Kubernetes resource watchers.
//!
//! Every kind runs on its own `kube_runtime::Controller` through the generic
//! [`watch_resource`] helper, which wires the shared [`Reconciler`], the
//! configured debounce/concurrency and the error policy.
//!
//! Secondary watches map related objects back to the resource that cares:
//! servers to the BIOS work items they reference, BMCs to their settings,
//! boot configurations to their maintenance and children to their set.

use crate::annotations::ChangeFilter;
use crate::error::ControllerError;
use crate::reconciler::{Reconciler, CONFLICT_REQUEUE};
use crds::{
    BIOSSettings, BIOSSettingsSet, BIOSVersion, BIOSVersionSet, BMCSettings, BMCSettingsSet, BMCVersion,
    BMCVersionSet, Server, ServerBootConfiguration, ServerMaintenance, BMC,
};
use futures::StreamExt;
use kube::{Api, Client, Resource};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller};
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff key of an object
fn object_key<K: Resource>(resource_name: &str, obj: &K) -> String {
    let meta = obj.meta();
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) => format!("{}/{}/{}", resource_name, ns, name),
        None => format!("{}/{}", resource_name, name),
    }
}

/// Runs `controller` until its watch streams end.
///
/// Successful passes reset the error backoff of the object. Failed passes
/// requeue: conflicts right away, everything else after the per-object
/// exponential delay.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + serde::de::DeserializeOwned + 'static,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(resource_name, obj.as_ref());
        if error.is_conflict() {
            debug!("Conflict on {}, retrying: {}", key, error);
            return Action::requeue(CONFLICT_REQUEUE);
        }
        let delay = ctx.error_delay(&key);
        if error.is_transient() {
            warn!("Reconciling {} failed, requeue in {:?}: {}", key, delay, error);
        } else {
            error!("Reconciling {} failed: {}", key, error);
        }
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(resource_name, obj.as_ref());
            let action = reconcile_fn(Arc::clone(&ctx), obj).await?;
            ctx.reconciled(&key);
            Ok(action)
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(reconciler.config.reconcile_debounce)
        .concurrency(reconciler.config.max_concurrent_reconciles);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", resource_name, obj.name),
                Err(e) => debug!("{} controller: {}", resource_name, e),
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Maps a child to the set controlling it, skipping annotation-only updates
fn owning_set<S, C>(filter: Arc<ChangeFilter>) -> impl Fn(C) -> Option<ObjectRef<S>> + Send + Sync + 'static
where
    S: Resource<DynamicType = ()>,
    C: Resource + Serialize,
{
    move |child: C| {
        if !filter.changed(&child) {
            return None;
        }
        child
            .meta()
            .owner_references
            .as_ref()?
            .iter()
            .find(|owner| owner.controller == Some(true) && owner.kind == S::kind(&()))
            .map(|owner| ObjectRef::new(&owner.name))
    }
}

/// Watches the firmware resources and their dependencies.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client) -> Self {
        Self { reconciler, client }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    /// Watches ServerMaintenance resources and the boot configurations they own.
    pub async fn watch_server_maintenances(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ServerMaintenance>(), watcher::Config::default())
            .owns(self.api::<ServerBootConfiguration>(), watcher::Config::default())
            .watches(self.api::<Server>(), watcher::Config::default(), |server: Server| {
                let reference = server.spec.maintenance_ref?;
                let namespace = reference.namespace?;
                Some(ObjectRef::new(&reference.name).within(&namespace))
            });
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_server_maintenance(&resource).await }),
            "ServerMaintenance",
        )
        .await
    }

    /// Watches BIOSSettings resources and the servers they configure.
    pub async fn watch_bios_settings(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<BIOSSettings>(), watcher::Config::default()).watches(
            self.api::<Server>(),
            watcher::Config::default(),
            |server: Server| server.spec.bios_settings_ref.map(|r| ObjectRef::new(&r.name)),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bios_settings(&resource).await }),
            "BIOSSettings",
        )
        .await
    }

    /// Watches BIOSVersion resources and the servers they upgrade.
    pub async fn watch_bios_versions(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<BIOSVersion>(), watcher::Config::default()).watches(
            self.api::<Server>(),
            watcher::Config::default(),
            |server: Server| server.spec.bios_version_ref.map(|r| ObjectRef::new(&r.name)),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bios_version(&resource).await }),
            "BIOSVersion",
        )
        .await
    }

    /// Watches BMCSettings resources and the BMCs they configure.
    pub async fn watch_bmc_settings(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<BMCSettings>(), watcher::Config::default()).watches(
            self.api::<BMC>(),
            watcher::Config::default(),
            |bmc: BMC| bmc.spec.bmc_settings_ref.map(|r| ObjectRef::new(&r.name)),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bmc_settings(&resource).await }),
            "BMCSettings",
        )
        .await
    }

    /// Watches BMCVersion resources.
    pub async fn watch_bmc_versions(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<BMCVersion>(), watcher::Config::default());
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bmc_version(&resource).await }),
            "BMCVersion",
        )
        .await
    }

    /// Watches BMCs for operator requests.
    pub async fn watch_bmcs(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<BMC>(), watcher::Config::default());
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bmc(&resource).await }),
            "BMC",
        )
        .await
    }

    /// Watches BIOSSettingsSet resources and their children.
    pub async fn watch_bios_settings_sets(&self) -> Result<(), ControllerError> {
        let filter = Arc::new(ChangeFilter::new());
        let controller = Controller::new(self.api::<BIOSSettingsSet>(), watcher::Config::default()).watches(
            self.api::<BIOSSettings>(),
            watcher::Config::default(),
            owning_set::<BIOSSettingsSet, BIOSSettings>(filter),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bios_settings_set(&resource).await }),
            "BIOSSettingsSet",
        )
        .await
    }

    /// Watches BIOSVersionSet resources and their children.
    pub async fn watch_bios_version_sets(&self) -> Result<(), ControllerError> {
        let filter = Arc::new(ChangeFilter::new());
        let controller = Controller::new(self.api::<BIOSVersionSet>(), watcher::Config::default()).watches(
            self.api::<BIOSVersion>(),
            watcher::Config::default(),
            owning_set::<BIOSVersionSet, BIOSVersion>(filter),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bios_version_set(&resource).await }),
            "BIOSVersionSet",
        )
        .await
    }

    /// Watches BMCSettingsSet resources and their children.
    pub async fn watch_bmc_settings_sets(&self) -> Result<(), ControllerError> {
        let filter = Arc::new(ChangeFilter::new());
        let controller = Controller::new(self.api::<BMCSettingsSet>(), watcher::Config::default()).watches(
            self.api::<BMCSettings>(),
            watcher::Config::default(),
            owning_set::<BMCSettingsSet, BMCSettings>(filter),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bmc_settings_set(&resource).await }),
            "BMCSettingsSet",
        )
        .await
    }

    /// Watches BMCVersionSet resources and their children.
    pub async fn watch_bmc_version_sets(&self) -> Result<(), ControllerError> {
        let filter = Arc::new(ChangeFilter::new());
        let controller = Controller::new(self.api::<BMCVersionSet>(), watcher::Config::default()).watches(
            self.api::<BMCVersion>(),
            watcher::Config::default(),
            owning_set::<BMCVersionSet, BMCVersion>(filter),
        );
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, resource| Box::pin(async move { reconciler.reconcile_bmc_version_set(&resource).await }),
            "BMCVersionSet",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::OPERATION_ANNOTATION;
    use crds::{BIOSSettingsSpec, BIOSSettingsSetSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn child_of(set: &str) -> BIOSSettings {
        let mut child = BIOSSettings::new("child", BIOSSettingsSpec::default());
        child.metadata.uid = Some("uid-child".to_string());
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: crds::API_VERSION.to_string(),
            kind: "BIOSSettingsSet".to_string(),
            name: set.to_string(),
            uid: "uid-set".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        child
    }

    #[test]
    fn test_object_key() {
        let set = BIOSSettingsSet::new("fleet", BIOSSettingsSetSpec::default());
        assert_eq!(object_key("BIOSSettingsSet", &set), "BIOSSettingsSet/fleet");

        let mut maintenance = ServerMaintenance::new("m", Default::default());
        maintenance.metadata.namespace = Some("ops".to_string());
        assert_eq!(object_key("ServerMaintenance", &maintenance), "ServerMaintenance/ops/m");
    }

    #[test]
    fn test_owning_set_skips_annotation_only_updates() {
        let mapper = owning_set::<BIOSSettingsSet, BIOSSettings>(Arc::new(ChangeFilter::new()));
        let mut child = child_of("fleet");

        assert_eq!(mapper(child.clone()).map(|r| r.name), Some("fleet".to_string()));
        assert!(mapper(child.clone()).is_none());

        child
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(OPERATION_ANNOTATION.to_string(), "ignore".to_string());
        assert!(mapper(child.clone()).is_none());

        child.spec.version = "2".to_string();
        assert_eq!(mapper(child).map(|r| r.name), Some("fleet".to_string()));
    }

    #[test]
    fn test_owning_set_ignores_foreign_owners() {
        let mapper = owning_set::<BIOSVersionSet, BIOSSettings>(Arc::new(ChangeFilter::new()));
        assert!(mapper(child_of("fleet")).is_none());
    }
}

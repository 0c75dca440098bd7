//! Main controller implementation.
//!
//! Builds the shared [`Reconciler`] over the cluster store and the Redfish
//! client, starts one watcher per kind plus the probe server and runs until
//! any of them exits.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::probes::{self, Readiness};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use kube::Client;
use metal_store::KubeStore;
use redfish_client::RedfishClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type WatchHandle = JoinHandle<Result<(), ControllerError>>;

/// Main controller for BIOS and BMC firmware resources.
#[derive(Debug)]
pub struct Controller {
    server_maintenance_watcher: WatchHandle,
    bios_settings_watcher: WatchHandle,
    bios_version_watcher: WatchHandle,
    bmc_settings_watcher: WatchHandle,
    bmc_version_watcher: WatchHandle,
    bmc_watcher: WatchHandle,
    bios_settings_set_watcher: WatchHandle,
    bios_version_set_watcher: WatchHandle,
    bmc_settings_set_watcher: WatchHandle,
    bmc_version_set_watcher: WatchHandle,
    probe_server: WatchHandle,
}

macro_rules! spawn_watch {
    ($watcher:expr, $method:ident) => {{
        let watcher = Arc::clone(&$watcher);
        tokio::spawn(async move { watcher.$method().await })
    }};
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing firmware controller");

        let kube_client = Client::try_default().await?;
        let redfish = RedfishClient::new(config.redfish_timeout, config.redfish_insecure_tls)?;

        let readiness = Readiness::default();
        let probe_server = tokio::spawn(probes::serve(config.probe_addr, readiness.clone()));

        let backend = Arc::new(KubeStore::new(kube_client.clone()));
        let reconciler = Arc::new(Reconciler::new(backend, Arc::new(redfish), config));
        let watcher = Arc::new(Watcher::new(reconciler, kube_client));

        let controller = Self {
            server_maintenance_watcher: spawn_watch!(watcher, watch_server_maintenances),
            bios_settings_watcher: spawn_watch!(watcher, watch_bios_settings),
            bios_version_watcher: spawn_watch!(watcher, watch_bios_versions),
            bmc_settings_watcher: spawn_watch!(watcher, watch_bmc_settings),
            bmc_version_watcher: spawn_watch!(watcher, watch_bmc_versions),
            bmc_watcher: spawn_watch!(watcher, watch_bmcs),
            bios_settings_set_watcher: spawn_watch!(watcher, watch_bios_settings_sets),
            bios_version_set_watcher: spawn_watch!(watcher, watch_bios_version_sets),
            bmc_settings_set_watcher: spawn_watch!(watcher, watch_bmc_settings_sets),
            bmc_version_set_watcher: spawn_watch!(watcher, watch_bmc_version_sets),
            probe_server,
        };
        readiness.mark_ready();
        Ok(controller)
    }

    /// Runs the controller until a watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Firmware controller running");

        let (name, result) = tokio::select! {
            result = &mut self.server_maintenance_watcher => ("ServerMaintenance watcher", result),
            result = &mut self.bios_settings_watcher => ("BIOSSettings watcher", result),
            result = &mut self.bios_version_watcher => ("BIOSVersion watcher", result),
            result = &mut self.bmc_settings_watcher => ("BMCSettings watcher", result),
            result = &mut self.bmc_version_watcher => ("BMCVersion watcher", result),
            result = &mut self.bmc_watcher => ("BMC watcher", result),
            result = &mut self.bios_settings_set_watcher => ("BIOSSettingsSet watcher", result),
            result = &mut self.bios_version_set_watcher => ("BIOSVersionSet watcher", result),
            result = &mut self.bmc_settings_set_watcher => ("BMCSettingsSet watcher", result),
            result = &mut self.bmc_version_set_watcher => ("BMCVersionSet watcher", result),
            result = &mut self.probe_server => ("probe server", result),
        };

        result
            .map_err(|e| ControllerError::Watch(format!("{} panicked: {}", name, e)))?
            .map_err(|e| ControllerError::Watch(format!("{} error: {}", name, e)))?;
        info!("{} exited, shutting down", name);
        Ok(())
    }
}

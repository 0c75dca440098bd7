//! Reconciliation logic for the firmware CRDs.
//!
//! One `Reconciler` serves every controller. Each kind lives in its own
//! module:
//! - `maintenance`: the ServerMaintenance arbiter (server lease, boot config)
//! - `bios_settings`, `bmc_settings`: attribute flows
//! - `bios_version`, `bmc_version`: firmware upgrades
//! - `bmc_operations`: operator requests on BMCs (`force-reset`)
//! - `sets`: fan-out of the four kinds over label selectors
//!
//! Shared plumbing sits in `endpoint` (BMC credentials), `leases`
//! (requesting and releasing maintenances) and `retry` (Failed handling).

pub mod bios_settings;
pub mod bios_version;
pub mod bmc_operations;
#[cfg(test)]
mod bmc_operations_test;
pub mod bmc_settings;
#[cfg(test)]
mod bmc_settings_test;
pub mod bmc_version;
#[cfg(test)]
mod bmc_version_test;
pub mod endpoint;
pub mod leases;
pub mod maintenance;
#[cfg(test)]
mod maintenance_test;
pub mod retry;
pub mod sets;

use crate::backoff::{BackoffTracker, ExponentialBackoff};
use crate::config::OperatorConfig;
use crds::{
    BIOSSettings, BIOSSettingsSet, BIOSVersion, BIOSVersionSet, BMCSecret, BMCSettings, BMCSettingsSet,
    BMCVersion, BMCVersionSet, Server, ServerBootConfiguration, ServerClaim, ServerMaintenance, BMC,
};
use metal_store::{ObjectStore, Store};
use redfish_client::RedfishClientTrait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Finalizer of ServerMaintenance
pub const MAINTENANCE_FINALIZER: &str = "metal.ironcore.dev/servermaintenance";
/// Finalizer of BIOSSettings
pub const BIOS_SETTINGS_FINALIZER: &str = "metal.ironcore.dev/biossettings";
/// Finalizer of BIOSVersion
pub const BIOS_VERSION_FINALIZER: &str = "metal.ironcore.dev/biosversion";
/// Finalizer of BMCSettings
pub const BMC_SETTINGS_FINALIZER: &str = "metal.ironcore.dev/bmcsettings";
/// Finalizer of BMCVersion
pub const BMC_VERSION_FINALIZER: &str = "metal.ironcore.dev/bmcversion";
/// Finalizer of BIOSSettingsSet
pub const BIOS_SETTINGS_SET_FINALIZER: &str = "metal.ironcore.dev/biossettingsset";
/// Finalizer of BIOSVersionSet
pub const BIOS_VERSION_SET_FINALIZER: &str = "metal.ironcore.dev/biosversionset";
/// Finalizer of BMCSettingsSet
pub const BMC_SETTINGS_SET_FINALIZER: &str = "metal.ironcore.dev/bmcsettingsset";
/// Finalizer of BMCVersionSet
pub const BMC_VERSION_SET_FINALIZER: &str = "metal.ironcore.dev/bmcversionset";

/// Requeue after losing an optimistic-concurrency race
pub(crate) const CONFLICT_REQUEUE: Duration = Duration::from_millis(100);

/// Reconciles every firmware-related resource.
pub struct Reconciler {
    pub(crate) redfish: Arc<dyn RedfishClientTrait>,
    pub(crate) config: OperatorConfig,
    // Inventory
    pub(crate) servers: Store<Server>,
    pub(crate) bmcs: Store<BMC>,
    pub(crate) bmc_secrets: Store<BMCSecret>,
    pub(crate) claims: Store<ServerClaim>,
    // Leases
    pub(crate) maintenances: Store<ServerMaintenance>,
    pub(crate) boot_configs: Store<ServerBootConfiguration>,
    // Work items
    pub(crate) bios_settings: Store<BIOSSettings>,
    pub(crate) bios_versions: Store<BIOSVersion>,
    pub(crate) bmc_settings: Store<BMCSettings>,
    pub(crate) bmc_versions: Store<BMCVersion>,
    // Sets
    pub(crate) bios_settings_sets: Store<BIOSSettingsSet>,
    pub(crate) bios_version_sets: Store<BIOSVersionSet>,
    pub(crate) bmc_settings_sets: Store<BMCSettingsSet>,
    pub(crate) bmc_version_sets: Store<BMCVersionSet>,
    /// Consecutive reconcile errors per resource key
    backoff: BackoffTracker,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over `backend` talking to BMCs through `redfish`.
    pub fn new(
        backend: Arc<dyn ObjectStore>,
        redfish: Arc<dyn RedfishClientTrait>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            redfish,
            config,
            servers: Store::all(Arc::clone(&backend)),
            bmcs: Store::all(Arc::clone(&backend)),
            bmc_secrets: Store::all(Arc::clone(&backend)),
            claims: Store::all(Arc::clone(&backend)),
            maintenances: Store::all(Arc::clone(&backend)),
            boot_configs: Store::all(Arc::clone(&backend)),
            bios_settings: Store::all(Arc::clone(&backend)),
            bios_versions: Store::all(Arc::clone(&backend)),
            bmc_settings: Store::all(Arc::clone(&backend)),
            bmc_versions: Store::all(Arc::clone(&backend)),
            bios_settings_sets: Store::all(Arc::clone(&backend)),
            bios_version_sets: Store::all(Arc::clone(&backend)),
            bmc_settings_sets: Store::all(Arc::clone(&backend)),
            bmc_version_sets: Store::all(backend),
            backoff: BackoffTracker::new(ExponentialBackoff::new(
                Duration::from_secs(5),
                Duration::from_secs(300),
            )),
        }
    }

    /// Delay before retrying `key` after a failed reconcile
    pub(crate) fn error_delay(&self, key: &str) -> Duration {
        self.backoff.next_delay(key)
    }

    /// Forget the error history of `key`
    pub(crate) fn reconciled(&self, key: &str) {
        self.backoff.reset(key);
    }
}

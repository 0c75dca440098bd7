//! Firmware Controller
//!
//! Keeps server BIOS and BMC settings and firmware versions in line with the
//! declared resources:
//! - ServerMaintenance: arbitrates exclusive access to a server
//! - BIOSSettings / BMCSettings: apply attribute maps, rebooting when needed
//! - BIOSVersion / BMCVersion: run firmware upgrades through Redfish
//! - the four Set kinds: fan the above out over label-selected targets
//!
//! Disruptive work only happens inside an approved maintenance window.

mod annotations;
mod backoff;
mod conditions;
mod config;
mod controller;
mod error;
mod flow;
mod naming;
mod probes;
mod reconcile_helpers;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::OperatorConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("rustls crypto provider already installed".to_string()))?;

    info!("Starting firmware controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Manager namespace: {}", config.manager_namespace);
    info!("  Max concurrent reconciles: {}", config.max_concurrent_reconciles);
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

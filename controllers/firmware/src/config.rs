//! Operator configuration from environment variables.
//!
//! Every knob has a default; only values that fail to parse are errors.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration of the firmware controller
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace for created ServerMaintenances and boot configurations
    pub manager_namespace: String,
    /// Worker concurrency per controller
    pub max_concurrent_reconciles: u16,
    /// Controller event debounce
    pub reconcile_debounce: Duration,
    /// Per-call Redfish timeout
    pub redfish_timeout: Duration,
    /// Accept self-signed BMC certificates
    pub redfish_insecure_tls: bool,
    /// Power-state polling interval
    pub power_poll_interval: Duration,
    /// Per-step settings timeout ceiling
    pub settings_timeout: Duration,
    /// Firmware task poll interval
    pub task_poll_interval: Duration,
    /// Re-check interval while waiting for a firmware version
    pub version_poll_interval: Duration,
    /// Re-check interval for owner approval and lease hand-over
    pub approval_poll_interval: Duration,
    /// How long a BMC may stay unreachable after a reset
    pub bmc_reset_grace: Duration,
    /// Lower bound of the BMC readiness poll
    pub bmc_reset_backoff_min: Duration,
    /// Upper bound of the BMC readiness poll
    pub bmc_reset_backoff_max: Duration,
    /// Periodic set re-evaluation
    pub set_resync_interval: Duration,
    /// Health probe listen address
    pub probe_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            manager_namespace: "default".to_string(),
            max_concurrent_reconciles: 5,
            reconcile_debounce: Duration::from_millis(500),
            redfish_timeout: Duration::from_secs(30),
            redfish_insecure_tls: true,
            power_poll_interval: Duration::from_millis(1000),
            settings_timeout: Duration::from_secs(600),
            task_poll_interval: Duration::from_secs(10),
            version_poll_interval: Duration::from_secs(30),
            approval_poll_interval: Duration::from_secs(10),
            bmc_reset_grace: Duration::from_secs(300),
            bmc_reset_backoff_min: Duration::from_secs(2),
            bmc_reset_backoff_max: Duration::from_secs(30),
            set_resync_interval: Duration::from_secs(60),
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            manager_namespace: lookup("MANAGER_NAMESPACE")
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or(defaults.manager_namespace),
            max_concurrent_reconciles: parse(&lookup, "MAX_CONCURRENT_RECONCILES")?
                .unwrap_or(defaults.max_concurrent_reconciles),
            reconcile_debounce: millis(&lookup, "RECONCILE_DEBOUNCE_MS")?
                .unwrap_or(defaults.reconcile_debounce),
            redfish_timeout: secs(&lookup, "REDFISH_TIMEOUT_SECS")?.unwrap_or(defaults.redfish_timeout),
            redfish_insecure_tls: parse(&lookup, "REDFISH_INSECURE_TLS")?
                .unwrap_or(defaults.redfish_insecure_tls),
            power_poll_interval: millis(&lookup, "POWER_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.power_poll_interval),
            settings_timeout: secs(&lookup, "SETTINGS_TIMEOUT_SECS")?.unwrap_or(defaults.settings_timeout),
            task_poll_interval: secs(&lookup, "TASK_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.task_poll_interval),
            version_poll_interval: secs(&lookup, "VERSION_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.version_poll_interval),
            approval_poll_interval: secs(&lookup, "APPROVAL_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.approval_poll_interval),
            bmc_reset_grace: secs(&lookup, "BMC_RESET_GRACE_SECS")?.unwrap_or(defaults.bmc_reset_grace),
            bmc_reset_backoff_min: secs(&lookup, "BMC_RESET_BACKOFF_MIN_SECS")?
                .unwrap_or(defaults.bmc_reset_backoff_min),
            bmc_reset_backoff_max: secs(&lookup, "BMC_RESET_BACKOFF_MAX_SECS")?
                .unwrap_or(defaults.bmc_reset_backoff_max),
            set_resync_interval: secs(&lookup, "SET_RESYNC_INTERVAL_SECS")?
                .unwrap_or(defaults.set_resync_interval),
            probe_addr: parse(&lookup, "PROBE_ADDR")?.unwrap_or(defaults.probe_addr),
        };

        if config.max_concurrent_reconciles == 0 {
            return Err(ControllerError::InvalidConfig(
                "MAX_CONCURRENT_RECONCILES must be at least 1".to_string(),
            ));
        }
        if config.bmc_reset_backoff_min > config.bmc_reset_backoff_max {
            return Err(ControllerError::InvalidConfig(
                "BMC_RESET_BACKOFF_MIN_SECS must not exceed BMC_RESET_BACKOFF_MAX_SECS".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
    }
}

fn secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(lookup, key)?.map(Duration::from_secs))
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(lookup, key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = OperatorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.manager_namespace, "default");
        assert_eq!(config.max_concurrent_reconciles, 5);
        assert_eq!(config.reconcile_debounce, Duration::from_millis(500));
        assert!(config.redfish_insecure_tls);
        assert_eq!(config.settings_timeout, Duration::from_secs(600));
        assert_eq!(config.probe_addr.port(), 8081);
    }

    #[test]
    fn test_overrides() {
        let config = OperatorConfig::from_lookup(lookup_from(&[
            ("MANAGER_NAMESPACE", "metal-system"),
            ("MAX_CONCURRENT_RECONCILES", "2"),
            ("POWER_POLL_INTERVAL_MS", "50"),
            ("REDFISH_INSECURE_TLS", "false"),
            ("BMC_RESET_BACKOFF_MAX_SECS", "10"),
            ("PROBE_ADDR", "127.0.0.1:9090"),
        ]))
        .unwrap();
        assert_eq!(config.manager_namespace, "metal-system");
        assert_eq!(config.max_concurrent_reconciles, 2);
        assert_eq!(config.power_poll_interval, Duration::from_millis(50));
        assert!(!config.redfish_insecure_tls);
        assert_eq!(config.bmc_reset_backoff_max, Duration::from_secs(10));
        assert_eq!(config.probe_addr, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_parse_failure_names_variable() {
        let err = OperatorConfig::from_lookup(lookup_from(&[("SETTINGS_TIMEOUT_SECS", "ten")])).unwrap_err();
        match err {
            ControllerError::InvalidConfig(message) => assert!(message.contains("SETTINGS_TIMEOUT_SECS")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_inverted_backoff_bounds() {
        let result = OperatorConfig::from_lookup(lookup_from(&[
            ("BMC_RESET_BACKOFF_MIN_SECS", "60"),
            ("BMC_RESET_BACKOFF_MAX_SECS", "5"),
        ]));
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }
}

//! Condition slice helpers.
//!
//! Conditions are keyed by `type`; resource-wide tags are used verbatim and
//! step tags get a `-<priority>` suffix. Setting a condition that already has
//! the same status keeps its transition time, so re-running a step is not a
//! status write.

use chrono::{DateTime, Utc};
use crds::{Condition, CONDITION_FALSE, CONDITION_TRUE};

/// BIOS or BMC firmware differs from `spec.version`
pub const PENDING_VERSION_UPDATE: &str = "pendingVersionUpdate";
/// A maintenance was requested for the work
pub const SERVER_MAINTENANCE_CREATED: &str = "serverMaintenanceCreated";
/// The maintenance was released after the work
pub const SERVER_MAINTENANCE_DELETED: &str = "serverMaintenanceDeleted";
/// The spec was rejected
pub const SETTINGS_VALIDATION_FAILED: &str = "settingsValidationFailed";
/// A Redfish call failed in a way retrying will not fix
pub const REMOTE_OPERATION_FAILED: &str = "remoteOperationFailed";

/// Step clock start
pub const TIMEOUT_START: &str = "timeoutStart";
/// Step ran past the settings timeout
pub const TIMEOUT_EXCEEDED: &str = "timeoutExceeded";
/// Server powered on for the step
pub const TURN_SERVER_ON: &str = "turnServerOn";
/// Whether the step's changes take effect without reboot (True = no reboot)
pub const SKIP_REBOOT: &str = "skipReboot";
/// Settings sent to the BMC
pub const ISSUE_SETTINGS_UPDATE: &str = "issueSettingsUpdate";
/// Server observed off during the reboot
pub const REBOOT_POWER_OFF: &str = "rebootPowerOff";
/// Server observed on after the reboot
pub const REBOOT_POWER_ON: &str = "rebootPowerOn";
/// Live values match the step
pub const VERIFY_SETTING: &str = "verifySetting";
/// Flow advanced past the step
pub const MOVE_TO_NEXT_STEP: &str = "moveToNextStep";

/// Whether the BMC settings take effect without a manager reset
pub const SKIP_BMC_RESET: &str = "skipBMCReset";
/// Live BMC attributes match the desired settings
pub const VERIFY_BMC_SETTINGS: &str = "verifyBMCSettings";
/// Manager reset issued (False) and manager back (True)
pub const BMC_RESET: &str = "bmcReset";

/// BIOS image handed to the update service
pub const BIOS_UPGRADE_ISSUED: &str = "biosVersionUpgradeIssued";
/// BIOS update task finished
pub const BIOS_UPGRADE_COMPLETED: &str = "biosVersionUpgradeCompleted";
/// System restarted to activate the BIOS image
pub const BIOS_UPGRADE_REBOOT: &str = "biosVersionUpgradeReboot";
/// BIOS reports the expected version
pub const BIOS_UPGRADE_VERIFICATION: &str = "biosVersionUpgradeVerification";

/// BMC image handed to the update service
pub const BMC_UPGRADE_ISSUED: &str = "bmcVersionUpgradeIssued";
/// BMC update task finished
pub const BMC_UPGRADE_COMPLETED: &str = "bmcVersionUpgradeCompleted";
/// BMC reports the expected version
pub const BMC_UPGRADE_VERIFICATION: &str = "bmcVersionUpgradeVerification";

/// Condition type of a step-scoped tag
pub fn step_type(tag: &str, priority: i32) -> String {
    format!("{tag}-{priority}")
}

/// Find a condition by type
pub fn find<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Find a step-scoped condition
pub fn find_step<'a>(conditions: &'a [Condition], tag: &str, priority: i32) -> Option<&'a Condition> {
    find(conditions, &step_type(tag, priority))
}

/// Whether a condition exists with status `True`
pub fn is_true(conditions: &[Condition], r#type: &str) -> bool {
    find(conditions, r#type).is_some_and(Condition::is_true)
}

/// Whether a step-scoped condition exists with status `True`
pub fn step_is_true(conditions: &[Condition], tag: &str, priority: i32) -> bool {
    is_true(conditions, &step_type(tag, priority))
}

/// Transition time of a condition
pub fn since(conditions: &[Condition], r#type: &str) -> Option<DateTime<Utc>> {
    find(conditions, r#type).and_then(|c| c.last_transition_time)
}

/// Record a condition.
///
/// A condition whose status does not change keeps its transition time; only
/// reason and message are refreshed. Returns whether anything changed.
pub fn set(conditions: &mut Vec<Condition>, r#type: &str, status: bool, reason: &str, message: &str) -> bool {
    let status = if status { CONDITION_TRUE } else { CONDITION_FALSE };
    match conditions.iter_mut().find(|c| c.r#type == r#type) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = Some(Utc::now());
                changed = true;
            }
            if existing.reason.as_deref() != Some(reason) {
                existing.reason = Some(reason.to_string());
                changed = true;
            }
            if existing.message.as_deref() != Some(message) {
                existing.message = Some(message.to_string());
                changed = true;
            }
            changed
        }
        None => {
            conditions.push(Condition {
                r#type: r#type.to_string(),
                status: status.to_string(),
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
                last_transition_time: Some(Utc::now()),
                observed_generation: None,
            });
            true
        }
    }
}

/// Record a step-scoped condition
pub fn set_step(
    conditions: &mut Vec<Condition>,
    tag: &str,
    priority: i32,
    status: bool,
    reason: &str,
    message: &str,
) -> bool {
    set(conditions, &step_type(tag, priority), status, reason, message)
}

/// Remove a condition; returns whether it existed
pub fn remove(conditions: &mut Vec<Condition>, r#type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.r#type != r#type);
    conditions.len() != before
}

/// Remove every condition whose type starts with `prefix`
pub fn remove_prefixed(conditions: &mut Vec<Condition>, prefix: &str) {
    conditions.retain(|c| !c.r#type.starts_with(prefix));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_type_format() {
        assert_eq!(step_type(VERIFY_SETTING, 1), "verifySetting-1");
        assert_eq!(step_type(MOVE_TO_NEXT_STEP, 100), "moveToNextStep-100");
    }

    #[test]
    fn test_set_is_idempotent_and_keeps_transition_time() {
        let mut conditions = Vec::new();
        assert!(set_step(&mut conditions, TIMEOUT_START, 1, true, "StepStarted", ""));
        let started = since(&conditions, "timeoutStart-1");
        assert!(!set_step(&mut conditions, TIMEOUT_START, 1, true, "StepStarted", ""));
        assert_eq!(since(&conditions, "timeoutStart-1"), started);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_status_flip_updates_in_place() {
        let mut conditions = Vec::new();
        set(&mut conditions, PENDING_VERSION_UPDATE, true, "VersionMismatch", "a != b");
        assert!(is_true(&conditions, PENDING_VERSION_UPDATE));
        assert!(set(&mut conditions, PENDING_VERSION_UPDATE, false, "VersionMatched", ""));
        assert!(!is_true(&conditions, PENDING_VERSION_UPDATE));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_types_stay_unique_across_steps() {
        let mut conditions = Vec::new();
        for priority in [100, 1000] {
            set_step(&mut conditions, VERIFY_SETTING, priority, true, "Verified", "");
            set_step(&mut conditions, VERIFY_SETTING, priority, true, "Verified", "");
        }
        assert_eq!(conditions.len(), 2);
        assert!(find_step(&conditions, VERIFY_SETTING, 100).is_some());
        assert!(step_is_true(&conditions, VERIFY_SETTING, 1000));
    }

    #[test]
    fn test_remove_and_remove_prefixed() {
        let mut conditions = Vec::new();
        set_step(&mut conditions, TIMEOUT_EXCEEDED, 1, true, "Timeout", "");
        set_step(&mut conditions, TIMEOUT_EXCEEDED, 2, true, "Timeout", "");
        set(&mut conditions, SERVER_MAINTENANCE_CREATED, true, "Created", "");
        assert!(remove(&mut conditions, SERVER_MAINTENANCE_CREATED));
        assert!(!remove(&mut conditions, SERVER_MAINTENANCE_CREATED));
        remove_prefixed(&mut conditions, TIMEOUT_EXCEEDED);
        assert!(conditions.is_empty());
    }
}

//! Failure bookkeeping shared by the settings and version reconcilers.
//!
//! A resource leaves `Failed` in exactly one place: [`rewind`]. It is reached
//! through the `retry` annotation or, for failures that are not validation
//! errors, automatically while `autoRetryCountRemaining` is positive. Both
//! paths spend one retry.

use crate::annotations::{clear_operation_patch, operation, wants_retry};
use crate::conditions::{
    self, REMOTE_OPERATION_FAILED, SERVER_MAINTENANCE_CREATED, SERVER_MAINTENANCE_DELETED,
    SETTINGS_VALIDATION_FAILED, TIMEOUT_EXCEEDED, TIMEOUT_START,
};
use crate::error::ControllerError;
use crate::reconcile_helpers::name_of;
use crds::{BIOSSettingsStatus, BIOSVersionStatus, BMCSettingsStatus, BMCVersionStatus, Condition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use kube_runtime::controller::Action;
use metal_store::Store;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// Status blocks that carry a condition log and a retry budget
pub(crate) trait Retryable {
    fn conditions(&self) -> &[Condition];
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
    fn retries_mut(&mut self) -> &mut Option<i32>;
    fn retries_left(&self) -> Option<i32>;
}

macro_rules! retryable {
    ($($status:ty),*) => {
        $(impl Retryable for $status {
            fn conditions(&self) -> &[Condition] {
                &self.conditions
            }
            fn conditions_mut(&mut self) -> &mut Vec<Condition> {
                &mut self.conditions
            }
            fn retries_mut(&mut self) -> &mut Option<i32> {
                &mut self.auto_retry_count_remaining
            }
            fn retries_left(&self) -> Option<i32> {
                self.auto_retry_count_remaining
            }
        })*
    };
}

retryable!(BIOSSettingsStatus, BMCSettingsStatus, BIOSVersionStatus, BMCVersionStatus);

/// Why a failed resource is picked up again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryTrigger {
    /// `operation=retry` on the resource
    Requested,
    /// Retry budget left after a remote failure
    Automatic,
}

/// Seed the retry budget from `failedAutoRetryCount` on the first pass
pub(crate) fn init_retries<S: Retryable>(status: &mut S, configured: Option<i32>) {
    let remaining = status.retries_mut();
    if remaining.is_none() {
        *remaining = configured;
    }
}

/// Whether a failed resource should leave `Failed` now
pub(crate) fn retry_trigger<S: Retryable>(meta: &ObjectMeta, status: &S) -> Option<RetryTrigger> {
    if wants_retry(meta) {
        return Some(RetryTrigger::Requested);
    }
    let validation = conditions::is_true(status.conditions(), SETTINGS_VALIDATION_FAILED);
    let budget = status.retries_left().is_some_and(|left| left > 0);
    (!validation && budget).then_some(RetryTrigger::Automatic)
}

/// Spend one retry and drop the failure conditions.
///
/// `step` restarts that step's clock. Returns whether the resource still
/// holds a maintenance, i.e. whether it goes back to its in-progress phase
/// rather than `Pending`.
pub(crate) fn rewind<S: Retryable>(status: &mut S, step: Option<i32>) -> bool {
    if let Some(left) = status.retries_mut().as_mut() {
        if *left > 0 {
            *left -= 1;
        }
    }
    let log = status.conditions_mut();
    conditions::remove(log, REMOTE_OPERATION_FAILED);
    conditions::remove(log, SETTINGS_VALIDATION_FAILED);
    conditions::remove_prefixed(log, TIMEOUT_EXCEEDED);
    if let Some(priority) = step {
        conditions::remove(log, &conditions::step_type(TIMEOUT_START, priority));
    }
    conditions::is_true(log, SERVER_MAINTENANCE_CREATED) && !conditions::is_true(log, SERVER_MAINTENANCE_DELETED)
}

/// Record a Redfish failure that retrying the same call will not fix
pub(crate) fn record_remote_failure<S: Retryable>(status: &mut S, error: &ControllerError) {
    conditions::set(
        status.conditions_mut(),
        REMOTE_OPERATION_FAILED,
        true,
        "RemoteOperationFailed",
        &error.to_string(),
    );
}

/// Record a rejected spec
pub(crate) fn record_validation_failure<S: Retryable>(status: &mut S, message: &str) {
    conditions::set(
        status.conditions_mut(),
        SETTINGS_VALIDATION_FAILED,
        true,
        "ValidationFailed",
        message,
    );
}

/// Turn a failed pass into the `Failed` phase where retrying it unchanged
/// cannot help; transient errors pass through for a requeue.
pub(crate) fn settle<S, F>(
    what: &str,
    result: Result<Action, ControllerError>,
    status: &mut S,
    mark_failed: F,
) -> Result<Action, ControllerError>
where
    S: Retryable,
    F: FnOnce(&mut S),
{
    match result {
        Err(ControllerError::Validation(message)) => {
            warn!("{} rejected: {}", what, message);
            record_validation_failure(status, &message);
            mark_failed(status);
            Ok(Action::await_change())
        }
        Err(error @ ControllerError::Redfish(_)) if !error.is_transient() => {
            warn!("{} failed: {}", what, error);
            record_remote_failure(status, &error);
            mark_failed(status);
            Ok(Action::await_change())
        }
        other => other,
    }
}

/// Remove the operation annotation once it has been acted on
pub(crate) async fn clear_operation<K>(store: &Store<K>, obj: &K) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    if operation(obj.meta()).is_none() {
        return Ok(());
    }
    store.patch(name_of(obj)?, &clear_operation_patch()).await?;
    debug!("Cleared operation annotation on {}", name_of(obj)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::OPERATION_ANNOTATION;
    use std::collections::BTreeMap;

    fn retry_meta() -> ObjectMeta {
        ObjectMeta {
            annotations: Some(BTreeMap::from([(OPERATION_ANNOTATION.to_string(), "retry".to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_init_retries_only_once() {
        let mut status = BIOSSettingsStatus::default();
        init_retries(&mut status, Some(2));
        assert_eq!(status.auto_retry_count_remaining, Some(2));
        status.auto_retry_count_remaining = Some(1);
        init_retries(&mut status, Some(2));
        assert_eq!(status.auto_retry_count_remaining, Some(1));
    }

    #[test]
    fn test_validation_failures_need_an_operator() {
        let mut status = BIOSSettingsStatus {
            auto_retry_count_remaining: Some(3),
            ..Default::default()
        };
        record_validation_failure(&mut status, "duplicate priority 5");
        assert_eq!(retry_trigger(&ObjectMeta::default(), &status), None);
        assert_eq!(retry_trigger(&retry_meta(), &status), Some(RetryTrigger::Requested));
    }

    #[test]
    fn test_remote_failures_retry_while_budget_lasts() {
        let mut status = BMCVersionStatus {
            auto_retry_count_remaining: Some(1),
            ..Default::default()
        };
        record_remote_failure(&mut status, &ControllerError::Validation("x".into()));
        assert_eq!(retry_trigger(&ObjectMeta::default(), &status), Some(RetryTrigger::Automatic));

        rewind(&mut status, None);
        assert_eq!(status.auto_retry_count_remaining, Some(0));
        assert!(status.conditions.is_empty());
        assert_eq!(retry_trigger(&ObjectMeta::default(), &status), None);
    }

    #[test]
    fn test_rewind_restores_phase_and_restarts_step_clock() {
        let mut status = BIOSSettingsStatus::default();
        conditions::set(&mut status.conditions, SERVER_MAINTENANCE_CREATED, true, "Created", "");
        conditions::set_step(&mut status.conditions, TIMEOUT_START, 100, true, "StepStarted", "");
        conditions::set_step(&mut status.conditions, TIMEOUT_START, 1000, true, "StepStarted", "");
        conditions::set_step(&mut status.conditions, TIMEOUT_EXCEEDED, 1000, true, "Timeout", "");

        assert!(rewind(&mut status, Some(1000)));
        assert!(conditions::find_step(&status.conditions, TIMEOUT_START, 100).is_some());
        assert!(conditions::find_step(&status.conditions, TIMEOUT_START, 1000).is_none());
        assert!(conditions::find_step(&status.conditions, TIMEOUT_EXCEEDED, 1000).is_none());
        assert_eq!(status.auto_retry_count_remaining, None);

        conditions::set(&mut status.conditions, SERVER_MAINTENANCE_DELETED, true, "Deleted", "");
        assert!(!rewind(&mut status, Some(1000)));
    }
}

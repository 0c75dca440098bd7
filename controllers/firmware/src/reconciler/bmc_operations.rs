//! Manager resets.
//!
//! `operation=force-reset` on a BMC asks for a graceful manager restart. The
//! BMC settings and version reconcilers reset managers too and then wait for
//! them to answer again through [`Reconciler::await_bmc_reset`].

use super::{retry, Reconciler};
use crate::annotations::{should_ignore, wants_force_reset};
use crate::backoff::ExponentialBackoff;
use crate::conditions::{self, BMC_RESET};
use crate::error::ControllerError;
use crate::reconcile_helpers::{elapsed_since, name_of};
use crds::{Condition, BMC};
use kube_runtime::controller::Action;
use redfish_client::{BmcEndpoint, RedfishError, ResetType};
use std::time::Duration;
use tracing::{debug, info, warn};

impl Reconciler {
    pub async fn reconcile_bmc(&self, bmc: &BMC) -> Result<Action, ControllerError> {
        let name = name_of(bmc)?;
        if should_ignore(&bmc.metadata) || !wants_force_reset(&bmc.metadata) {
            return Ok(Action::await_change());
        }
        info!("Force-resetting BMC {}", name);
        let endpoint = self.bmc_endpoint(bmc).await?;
        self.redfish.reset_manager(&endpoint, ResetType::GracefulRestart).await?;
        retry::clear_operation(&self.bmcs, bmc).await?;
        Ok(Action::await_change())
    }

    /// Reset the manager once and wait for it to answer again.
    ///
    /// Progress lives in the `bmcReset` condition: False while the manager is
    /// away, True once it answered. Returns an action while waiting and a
    /// fatal Redfish error once the grace window is exhausted.
    pub(crate) async fn await_bmc_reset(
        &self,
        endpoint: &BmcEndpoint,
        log: &mut Vec<Condition>,
        what: &str,
    ) -> Result<Option<Action>, ControllerError> {
        let backoff = ExponentialBackoff::new(self.config.bmc_reset_backoff_min, self.config.bmc_reset_backoff_max);
        let Some(issued) = conditions::find(log, BMC_RESET).cloned() else {
            self.redfish.reset_manager(endpoint, ResetType::GracefulRestart).await?;
            conditions::set(log, BMC_RESET, false, "ResetIssued", "waiting for the manager");
            info!("{} reset BMC {}", what, endpoint.address);
            return Ok(Some(Action::requeue(backoff.for_elapsed(Duration::ZERO))));
        };
        if issued.is_true() {
            return Ok(None);
        }

        let waited = issued.last_transition_time.map(elapsed_since).unwrap_or_default();
        match self.redfish.get_manager(endpoint).await {
            Ok(manager) => {
                conditions::set(log, BMC_RESET, true, "ManagerReady", &manager.id);
                debug!("BMC {} answered after {:?}", endpoint.address, waited);
                Ok(None)
            }
            Err(e) if e.is_transient() && waited <= self.config.bmc_reset_grace => {
                debug!("BMC {} not back yet: {}", endpoint.address, e);
                Ok(Some(Action::requeue(backoff.for_elapsed(waited))))
            }
            Err(e) if e.is_transient() => {
                warn!("BMC {} did not come back within {:?}", endpoint.address, self.config.bmc_reset_grace);
                Err(RedfishError::Fatal(format!(
                    "BMC {} unreachable {:?} after reset: {e}",
                    endpoint.address, waited
                ))
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

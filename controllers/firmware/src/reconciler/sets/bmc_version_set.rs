//! BMCVersionSet: one BMCVersion per selected BMC

use super::{ChildPhase, FanOut, SetChild};
use crate::annotations::should_ignore;
use crate::error::ControllerError;
use crate::reconcile_helpers::{ensure_finalizer, is_deleting, name_of};
use crate::reconciler::{Reconciler, BMC_VERSION_SET_FINALIZER};
use crds::{BMCVersion, BMCVersionSet};
use kube_runtime::controller::Action;
use serde_json::Value;
use tracing::{debug, info};

impl SetChild for BMCVersion {
    fn target(&self) -> Option<&str> {
        self.spec.bmc_ref.as_ref().map(|r| r.name.as_str())
    }

    fn phase(&self) -> ChildPhase {
        self.state().into()
    }

    fn spec_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.spec)
    }
}

impl Reconciler {
    pub async fn reconcile_bmc_version_set(&self, set: &BMCVersionSet) -> Result<Action, ControllerError> {
        let name = name_of(set)?;
        let children = self.owned_children(set, &self.bmc_versions).await?;
        self.propagate_operation(set, &self.bmc_versions, &children).await?;
        if should_ignore(&set.metadata) {
            debug!("Skipping ignored BMCVersionSet {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(set) {
            return self
                .delete_set(set, &self.bmc_version_sets, &self.bmc_versions, &children, BMC_VERSION_SET_FINALIZER)
                .await;
        }

        info!("Reconciling BMCVersionSet {}", name);
        ensure_finalizer(&self.bmc_version_sets, set, BMC_VERSION_SET_FINALIZER).await?;

        let template = &set.spec.bmc_version_template;
        let mut plan = FanOut::new(children);
        for bmc in self.selected_bmcs(&set.spec.bmc_selector).await? {
            let bmc_name = name_of(&bmc)?;
            let local = plan
                .child_for(bmc_name)
                .map(|c| c.spec.server_maintenance_refs.clone())
                .unwrap_or_default();
            let refs = self
                .maintenance_refs_for_bmc(&template.server_maintenance_refs, bmc_name, &local)
                .await?;
            plan.desire(bmc_name, &template.to_spec(bmc_name, refs))?;
        }
        self.fan_out(set, &self.bmc_version_sets, &self.bmc_versions, set.status.as_ref(), plan)
            .await
    }
}

//! BMCSettingsSet: one BMCSettings per selected BMC

use super::{ChildPhase, FanOut, SetChild};
use crate::annotations::should_ignore;
use crate::error::ControllerError;
use crate::reconcile_helpers::{ensure_finalizer, is_deleting, name_of};
use crate::reconciler::{Reconciler, BMC_SETTINGS_SET_FINALIZER};
use crds::{BMCSettings, BMCSettingsSet};
use kube_runtime::controller::Action;
use serde_json::Value;
use tracing::{debug, info};

impl SetChild for BMCSettings {
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
    pub async fn reconcile_bmc_settings_set(&self, set: &BMCSettingsSet) -> Result<Action, ControllerError> {
        let name = name_of(set)?;
        let children = self.owned_children(set, &self.bmc_settings).await?;
        self.propagate_operation(set, &self.bmc_settings, &children).await?;
        if should_ignore(&set.metadata) {
            debug!("Skipping ignored BMCSettingsSet {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(set) {
            return self
                .delete_set(set, &self.bmc_settings_sets, &self.bmc_settings, &children, BMC_SETTINGS_SET_FINALIZER)
                .await;
        }

        info!("Reconciling BMCSettingsSet {}", name);
        ensure_finalizer(&self.bmc_settings_sets, set, BMC_SETTINGS_SET_FINALIZER).await?;

        let template = &set.spec.bmc_settings_template;
        let mut plan = FanOut::new(children);
        for bmc in self.selected_bmcs(&set.spec.bmc_selector).await? {
            let bmc_name = name_of(&bmc)?;
            let local = plan
                .child_for(bmc_name)
                .map(|c| c.spec.server_maintenance_refs.clone());
            let has_child = local.is_some();
            let refs = self
                .maintenance_refs_for_bmc(&template.server_maintenance_refs, bmc_name, &local.unwrap_or_default())
                .await?;
            plan.desire(bmc_name, &template.to_spec(bmc_name, refs))?;
            if has_child {
                continue;
            }
            if let Some(current) = &bmc.spec.bmc_settings_ref {
                if self.bmc_settings.get_opt(&current.name).await?.is_some() {
                    plan.block(bmc_name);
                }
            }
        }
        self.fan_out(set, &self.bmc_settings_sets, &self.bmc_settings, set.status.as_ref(), plan)
            .await
    }
}

//! BIOSVersionSet: one BIOSVersion per selected server

use super::{ChildPhase, FanOut, SetChild};
use crate::annotations::should_ignore;
use crate::error::ControllerError;
use crate::reconcile_helpers::{ensure_finalizer, is_deleting, name_of};
use crate::reconciler::{Reconciler, BIOS_VERSION_SET_FINALIZER};
use crds::{BIOSVersion, BIOSVersionSet};
use kube_runtime::controller::Action;
use serde_json::Value;
use tracing::{debug, info};

impl SetChild for BIOSVersion {
    fn target(&self) -> Option<&str> {
        self.spec.server_ref.as_ref().map(|r| r.name.as_str())
    }

    fn phase(&self) -> ChildPhase {
        self.state().into()
    }

    fn spec_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(&self.spec)
    }
}

impl Reconciler {
    pub async fn reconcile_bios_version_set(&self, set: &BIOSVersionSet) -> Result<Action, ControllerError> {
        let name = name_of(set)?;
        let children = self.owned_children(set, &self.bios_versions).await?;
        self.propagate_operation(set, &self.bios_versions, &children).await?;
        if should_ignore(&set.metadata) {
            debug!("Skipping ignored BIOSVersionSet {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(set) {
            return self
                .delete_set(set, &self.bios_version_sets, &self.bios_versions, &children, BIOS_VERSION_SET_FINALIZER)
                .await;
        }

        info!("Reconciling BIOSVersionSet {}", name);
        ensure_finalizer(&self.bios_version_sets, set, BIOS_VERSION_SET_FINALIZER).await?;

        let template = &set.spec.bios_version_template;
        let mut plan = FanOut::new(children);
        for server in self.selected_servers(&set.spec.server_selector).await? {
            let server_name = name_of(&server)?;
            let child = plan.child_for(server_name);
            let spec = template.to_spec(server_name, child.map(|c| &c.spec));
            let has_child = child.is_some();
            plan.desire(server_name, &spec)?;
            if has_child {
                continue;
            }
            if let Some(current) = &server.spec.bios_version_ref {
                if self.bios_versions.get_opt(&current.name).await?.is_some() {
                    plan.block(server_name);
                }
            }
        }
        self.fan_out(set, &self.bios_version_sets, &self.bios_versions, set.status.as_ref(), plan)
            .await
    }
}

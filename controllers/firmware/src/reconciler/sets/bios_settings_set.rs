//! BIOSSettingsSet: one BIOSSettings per selected server

use super::{ChildPhase, FanOut, SetChild};
use crate::annotations::should_ignore;
use crate::error::ControllerError;
use crate::reconcile_helpers::{ensure_finalizer, is_deleting, name_of};
use crate::reconciler::{Reconciler, BIOS_SETTINGS_SET_FINALIZER};
use crds::{BIOSSettings, BIOSSettingsSet};
use kube_runtime::controller::Action;
use serde_json::Value;
use tracing::{debug, info};

impl SetChild for BIOSSettings {
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
    pub async fn reconcile_bios_settings_set(&self, set: &BIOSSettingsSet) -> Result<Action, ControllerError> {
        let name = name_of(set)?;
        let children = self.owned_children(set, &self.bios_settings).await?;
        self.propagate_operation(set, &self.bios_settings, &children).await?;
        if should_ignore(&set.metadata) {
            debug!("Skipping ignored BIOSSettingsSet {}", name);
            return Ok(Action::await_change());
        }
        if is_deleting(set) {
            return self
                .delete_set(set, &self.bios_settings_sets, &self.bios_settings, &children, BIOS_SETTINGS_SET_FINALIZER)
                .await;
        }

        info!("Reconciling BIOSSettingsSet {}", name);
        ensure_finalizer(&self.bios_settings_sets, set, BIOS_SETTINGS_SET_FINALIZER).await?;

        let template = &set.spec.bios_settings_template;
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
            if let Some(current) = &server.spec.bios_settings_ref {
                if self.bios_settings.get_opt(&current.name).await?.is_some() {
                    plan.block(server_name);
                }
            }
        }
        self.fan_out(set, &self.bios_settings_sets, &self.bios_settings, set.status.as_ref(), plan)
            .await
    }
}

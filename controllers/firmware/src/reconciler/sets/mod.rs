//! Set controllers.
//!
//! A set selects targets (servers or BMCs) by label and keeps one child per
//! target whose spec follows the set's template. The kind-specific modules
//! build a [`FanOut`] plan; [`Reconciler::fan_out`] carries it out:
//!
//! - children of targets that left the selection are deleted unless they are
//!   `InProgress`
//! - children that are not `InProgress` get their spec patched back to the
//!   template
//! - selected targets without a child get one, unless another resource
//!   already manages the target
//!
//! Deleting a set deletes its idle children and waits for busy ones.

pub mod bios_settings_set;
pub mod bios_version_set;
pub mod bmc_settings_set;
pub mod bmc_version_set;

use super::Reconciler;
use crate::annotations::{child_propagation_patch, ignores_children, should_ignore};
use crate::error::ControllerError;
use crate::naming;
use crate::reconcile_helpers::{
    controller_reference, has_finalizer, is_controlled_by, is_deleting, merge_diff, name_of, patch_status_if_changed,
    remove_finalizer,
};
use crds::{LabelSelector, ObjectReference, Server, SetStatus, SettingsState, VersionState, BMC};
use kube::Resource;
use kube_runtime::controller::Action;
use metal_store::{ListOptions, Store, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Coarse phase of a child, as counted in [`SetStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildPhase {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl From<Option<SettingsState>> for ChildPhase {
    fn from(state: Option<SettingsState>) -> Self {
        match state {
            None | Some(SettingsState::Pending) => Self::Pending,
            Some(SettingsState::InProgress | SettingsState::InWaiting) => Self::InProgress,
            Some(SettingsState::Applied) => Self::Completed,
            Some(SettingsState::Failed) => Self::Failed,
        }
    }
}

impl From<Option<VersionState>> for ChildPhase {
    fn from(state: Option<VersionState>) -> Self {
        match state {
            None | Some(VersionState::Pending) => Self::Pending,
            Some(VersionState::InProgress) => Self::InProgress,
            Some(VersionState::Completed) => Self::Completed,
            Some(VersionState::Failed) => Self::Failed,
        }
    }
}

/// A resource a set fans out to
pub(crate) trait SetChild: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Name of the server or BMC the child works on
    fn target(&self) -> Option<&str>;
    fn phase(&self) -> ChildPhase;
    fn spec_value(&self) -> Result<Value, serde_json::Error>;
}

/// What a set wants, computed against its current children
pub(crate) struct FanOut<C> {
    children: Vec<C>,
    desired: BTreeMap<String, Value>,
    blocked: BTreeSet<String>,
}

impl<C: SetChild> FanOut<C> {
    pub(crate) fn new(children: Vec<C>) -> Self {
        Self {
            children,
            desired: BTreeMap::new(),
            blocked: BTreeSet::new(),
        }
    }

    /// Existing child working on `target`
    pub(crate) fn child_for(&self, target: &str) -> Option<&C> {
        self.children
            .iter()
            .find(|c| c.target() == Some(target) && !is_deleting(*c))
    }

    /// Select `target` with the given child spec
    pub(crate) fn desire<T: Serialize>(&mut self, target: &str, spec: &T) -> Result<(), ControllerError> {
        self.desired.insert(target.to_string(), serde_json::to_value(spec)?);
        Ok(())
    }

    /// Keep `target` selected but do not create a child for it
    pub(crate) fn block(&mut self, target: &str) {
        self.blocked.insert(target.to_string());
    }
}

fn tally(status: &mut SetStatus, phase: ChildPhase) {
    status.available += 1;
    match phase {
        ChildPhase::Pending => status.pending += 1,
        ChildPhase::InProgress => status.in_progress += 1,
        ChildPhase::Completed => status.completed += 1,
        ChildPhase::Failed => status.failed += 1,
    }
}

fn labels_match(selector: &LabelSelector, labels: Option<&BTreeMap<String, String>>) -> bool {
    match labels {
        Some(labels) => selector.matches(labels),
        None => selector.matches(&BTreeMap::new()),
    }
}

impl Reconciler {
    /// Servers whose labels match `selector`
    pub(crate) async fn selected_servers(&self, selector: &LabelSelector) -> Result<Vec<Server>, ControllerError> {
        let servers = self.servers.list(&ListOptions::default()).await?;
        Ok(servers
            .into_iter()
            .filter(|s| !is_deleting(s) && labels_match(selector, s.metadata.labels.as_ref()))
            .collect())
    }

    /// BMCs whose labels match `selector`
    pub(crate) async fn selected_bmcs(&self, selector: &LabelSelector) -> Result<Vec<BMC>, ControllerError> {
        let bmcs = self.bmcs.list(&ListOptions::default()).await?;
        Ok(bmcs
            .into_iter()
            .filter(|b| !is_deleting(b) && labels_match(selector, b.metadata.labels.as_ref()))
            .collect())
    }

    /// Maintenance references for the child working on `bmc`.
    ///
    /// Template references are kept when their maintenance targets a server
    /// managed by `bmc`; the child's own references come first and win on a
    /// name clash.
    pub(crate) async fn maintenance_refs_for_bmc(
        &self,
        template: &[ObjectReference],
        bmc: &str,
        local: &[ObjectReference],
    ) -> Result<Vec<ObjectReference>, ControllerError> {
        let mut refs = local.to_vec();
        for reference in template {
            if refs.iter().any(|r| r.name == reference.name) {
                continue;
            }
            let Some(maintenance) = self.referenced_maintenance(reference).await? else {
                continue;
            };
            let Some(server_ref) = &maintenance.spec.server_ref else {
                continue;
            };
            let served = self
                .servers
                .get_opt(&server_ref.name)
                .await?
                .is_some_and(|s| s.spec.bmc_ref.as_ref().is_some_and(|b| b.name == bmc));
            if served {
                refs.push(reference.clone());
            }
        }
        Ok(refs)
    }

    /// Children controlled by `set`
    pub(crate) async fn owned_children<S, C>(&self, set: &S, store: &Store<C>) -> Result<Vec<C>, ControllerError>
    where
        S: Resource,
        C: SetChild,
    {
        Ok(store
            .list(&ListOptions::default())
            .await?
            .into_iter()
            .filter(|c| is_controlled_by(c.meta(), set))
            .collect())
    }

    /// Bring the children's ignore annotations in line with the set's.
    ///
    /// `ignore-child-and-self` still reaches the children; a plain `ignore`
    /// freezes the set and leaves its children as they are.
    pub(crate) async fn propagate_operation<S, C>(
        &self,
        set: &S,
        store: &Store<C>,
        children: &[C],
    ) -> Result<(), ControllerError>
    where
        S: Resource,
        C: SetChild,
    {
        if should_ignore(set.meta()) && !ignores_children(set.meta()) {
            return Ok(());
        }
        for child in children {
            if let Some(patch) = child_propagation_patch(set.meta(), child.meta()) {
                store.patch(name_of(child)?, &patch).await?;
                debug!("Propagated operation of {} to {}", name_of(set)?, name_of(child)?);
            }
        }
        Ok(())
    }

    /// Carry out `plan` and record the rollup on the set
    pub(crate) async fn fan_out<S, C>(
        &self,
        set: &S,
        sets: &Store<S>,
        store: &Store<C>,
        current: Option<&SetStatus>,
        plan: FanOut<C>,
    ) -> Result<Action, ControllerError>
    where
        S: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
        C: SetChild,
    {
        let set_name = name_of(set)?;
        let mut status = SetStatus {
            fully_labeled: i32::try_from(plan.desired.len()).unwrap_or(i32::MAX),
            ..Default::default()
        };

        let mut covered = BTreeSet::new();
        for child in &plan.children {
            let child_name = name_of(child)?;
            let phase = child.phase();
            if is_deleting(child) {
                continue;
            }
            let desired = child.target().and_then(|t| plan.desired.get(t).map(|spec| (t, spec)));
            match desired {
                None if phase != ChildPhase::InProgress => {
                    store.delete(child_name).await?;
                    info!("Deleted {} {} (target left the selection)", C::kind(&()), child_name);
                    continue;
                }
                None => debug!("Keeping busy {} {} outside the selection", C::kind(&()), child_name),
                Some((target, spec)) => {
                    covered.insert(target.to_string());
                    if phase != ChildPhase::InProgress {
                        if let Some(patch) = merge_diff(&child.spec_value()?, spec) {
                            store.patch(child_name, &json!({ "spec": patch })).await?;
                            info!("Updated {} {} from the template of {}", C::kind(&()), child_name, set_name);
                        }
                    }
                }
            }
            tally(&mut status, phase);
        }

        for (target, spec) in &plan.desired {
            if covered.contains(target) {
                continue;
            }
            if plan.blocked.contains(target) {
                debug!("{} is managed by another {}, {} skips it", target, C::kind(&()), set_name);
                continue;
            }
            let mut child: C = serde_json::from_value(json!({
                "apiVersion": C::api_version(&()),
                "kind": C::kind(&()),
                "metadata": { "ownerReferences": [controller_reference(set)?] },
                "spec": spec,
            }))?;
            naming::apply(child.meta_mut(), naming::child_name(set_name, target));
            match store.create(&child).await {
                Ok(created) => {
                    info!("Created {} {} for {}", C::kind(&()), name_of(&created)?, target);
                    tally(&mut status, ChildPhase::Pending);
                }
                Err(StoreError::AlreadyExists(what)) => {
                    debug!("Not creating {}: {} already exists", C::kind(&()), what);
                }
                Err(e) => return Err(e.into()),
            }
        }

        patch_status_if_changed(sets, set_name, current, &status).await?;
        Ok(Action::requeue(self.config.set_resync_interval))
    }

    /// Delete idle children and let the set go once none is left
    pub(crate) async fn delete_set<S, C>(
        &self,
        set: &S,
        sets: &Store<S>,
        store: &Store<C>,
        children: &[C],
        finalizer: &str,
    ) -> Result<Action, ControllerError>
    where
        S: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync,
        C: SetChild,
    {
        if !has_finalizer(set, finalizer) {
            return Ok(Action::await_change());
        }
        let set_name = name_of(set)?;
        let mut busy = 0;
        for child in children {
            if is_deleting(child) {
                continue;
            }
            if child.phase() == ChildPhase::InProgress {
                busy += 1;
                continue;
            }
            store.delete(name_of(child)?).await?;
        }
        if busy > 0 {
            info!("{} {} waits for {} busy child(ren)", S::kind(&()), set_name, busy);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        if !self.owned_children(set, store).await?.is_empty() {
            debug!("{} {} waits for its children to go away", S::kind(&()), set_name);
            return Ok(Action::requeue(self.config.approval_poll_interval));
        }
        remove_finalizer(sets, set, finalizer).await?;
        info!("Deleted {} {}", S::kind(&()), set_name);
        Ok(Action::await_change())
    }
}

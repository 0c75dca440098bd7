//! Settings-flow helpers.
//!
//! A flow is applied in ascending priority order. Each step sends only its
//! own map (as a delta against live attributes); the cumulative map, with
//! later priorities winning, is what an applied resource is checked against.

use crds::SettingsFlowItem;
use std::collections::BTreeMap;
use thiserror::Error;

/// Priority recorded once every step of a flow has been applied
pub const LAST_STEP: i32 = i32::MAX;

/// Why a flow cannot run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    /// No steps at all
    #[error("settingsFlow must contain at least one step")]
    Empty,

    /// Priority zero or negative
    #[error("settingsFlow priority {0} must be strictly positive")]
    NonPositivePriority(i32),

    /// Same priority used twice
    #[error("settingsFlow priority {0} is used more than once")]
    DuplicatePriority(i32),
}

/// Validate a flow and return it sorted by priority
pub fn normalize(flow: &[SettingsFlowItem]) -> Result<Vec<SettingsFlowItem>, FlowError> {
    if flow.is_empty() {
        return Err(FlowError::Empty);
    }
    let mut sorted = flow.to_vec();
    sorted.sort_by_key(|item| item.priority);
    if let Some(first) = sorted.first().filter(|item| item.priority <= 0) {
        return Err(FlowError::NonPositivePriority(first.priority));
    }
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].priority == pair[1].priority) {
        return Err(FlowError::DuplicatePriority(pair[0].priority));
    }
    Ok(sorted)
}

/// Step with exactly `priority`
pub fn step(flow: &[SettingsFlowItem], priority: i32) -> Option<&SettingsFlowItem> {
    flow.iter().find(|item| item.priority == priority)
}

/// First step after `priority` in a sorted flow
pub fn next_step(flow: &[SettingsFlowItem], priority: i32) -> Option<&SettingsFlowItem> {
    flow.iter().find(|item| item.priority > priority)
}

/// Cumulative desired attributes of a sorted flow; later steps win
pub fn merged_settings(flow: &[SettingsFlowItem]) -> BTreeMap<String, String> {
    flow.iter()
        .flat_map(|item| item.settings.iter())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Desired entries whose live value differs or is missing
pub fn diff(desired: &BTreeMap<String, String>, live: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(key, value)| live.get(*key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

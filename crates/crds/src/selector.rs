//! Label selectors
//!
//! Mirrors the Kubernetes `LabelSelector` shape so set resources can carry a
//! schema-validated selector, and evaluates it against a label map.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Selects resources by their labels.
///
/// An empty selector matches every resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Set-based requirements, all of which must hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// A single set-based selector requirement
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// Label key the requirement applies to
    pub key: String,

    /// Relationship between the key and the values
    pub operator: SelectorOperator,

    /// Values for `In` / `NotIn`; ignored otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Selector requirement operator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum SelectorOperator {
    /// Label value is one of `values`
    In,
    /// Label is absent or its value is none of `values`
    NotIn,
    /// Label key is present
    Exists,
    /// Label key is absent
    DoesNotExist,
}

impl LabelSelector {
    /// Selector matching `key=value`
    pub fn with_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }

    /// Evaluate the selector against a label map
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_ok = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        labels_ok && self.match_expressions.iter().all(|req| req.matches(labels))
    }
}

impl LabelSelectorRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(LabelSelector::default().matches(&labels(&[])));
        assert!(LabelSelector::default().matches(&labels(&[("rack", "a1")])));
    }

    #[test]
    fn test_match_labels() {
        let selector = LabelSelector::with_label("rack", "a1");
        assert!(selector.matches(&labels(&[("rack", "a1"), ("zone", "z")])));
        assert!(!selector.matches(&labels(&[("rack", "b2")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "vendor".to_string(),
                    operator: SelectorOperator::In,
                    values: vec!["dell".to_string(), "hpe".to_string()],
                },
                LabelSelectorRequirement {
                    key: "quarantine".to_string(),
                    operator: SelectorOperator::DoesNotExist,
                    values: vec![],
                },
            ],
        };
        assert!(selector.matches(&labels(&[("vendor", "hpe")])));
        assert!(!selector.matches(&labels(&[("vendor", "lenovo")])));
        assert!(!selector.matches(&labels(&[("vendor", "dell"), ("quarantine", "yes")])));
    }

    #[test]
    fn test_not_in_accepts_missing_key() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: SelectorOperator::NotIn,
                values: vec!["gold".to_string()],
            }],
        };
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("tier", "silver")])));
        assert!(!selector.matches(&labels(&[("tier", "gold")])));
    }
}

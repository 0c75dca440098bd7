//! Rollup status shared by the four set kinds

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Child counters of a set
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetStatus {
    /// Targets matching the selector
    #[serde(default)]
    pub fully_labeled: i32,

    /// Children owned by the set
    #[serde(default)]
    pub available: i32,

    /// Children not yet started
    #[serde(default)]
    pub pending: i32,

    /// Children applying work
    #[serde(default)]
    pub in_progress: i32,

    /// Children applied or completed
    #[serde(default)]
    pub completed: i32,

    /// Children failed
    #[serde(default)]
    pub failed: i32,
}

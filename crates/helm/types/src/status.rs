//! Reconciliation status published for each release

use crate::{ConditionSet, ConditionType};
use serde::{Deserialize, Serialize};

/// Status of a release resource.
///
/// Read at the start of a pass and rewritten as a whole at its checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStatus {
    /// Generation of the desired state last processed
    #[serde(default)]
    pub observed_generation: i64,

    /// Artifact revision the last pass attempted to release
    #[serde(default)]
    pub last_attempted_revision: Option<String>,

    /// Release revision observed after the last pass
    #[serde(default)]
    pub last_released_revision: u32,

    /// Consecutive failed passes
    #[serde(default)]
    pub failures: u32,

    #[serde(default)]
    pub conditions: ConditionSet,
}

impl ReconcileStatus {
    pub fn is_ready(&self) -> bool {
        self.conditions.is_ready()
    }

    /// Message of the `Ready` condition, or an empty string
    pub fn ready_message(&self) -> &str {
        self.conditions
            .get(ConditionType::Ready)
            .map(|c| c.message.as_str())
            .unwrap_or("")
    }
}

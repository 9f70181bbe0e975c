//! Release records as reported by the package manager's history

use serde::{Deserialize, Serialize};

/// The deployed release observed at the start of a pass.
///
/// Fetched fresh from release history on every pass and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    /// Release name
    pub name: String,

    /// Namespace the release is installed in
    pub namespace: String,

    /// Revision number, incremented by every install/upgrade/rollback
    pub revision: u32,

    /// State of this revision
    pub state: ReleaseState,

    /// Name of the chart this revision runs
    pub chart_name: String,

    /// Version of the chart this revision runs
    pub chart_version: String,
}

impl ReleaseRecord {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        revision: u32,
        chart_name: impl Into<String>,
        chart_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            revision,
            state: ReleaseState::Deployed,
            chart_name: chart_name.into(),
            chart_version: chart_version.into(),
        }
    }

    pub fn with_state(mut self, state: ReleaseState) -> Self {
        self.state = state;
        self
    }

    pub fn is_deployed(&self) -> bool {
        self.state == ReleaseState::Deployed
    }
}

/// Release revision state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseState {
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
    Uninstalling,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
    #[serde(other)]
    Unknown,
}

//! Package-management action interface
//!
//! Install, upgrade, test, rollback and uninstall run through
//! [`PackageActions`]. A session is initialized per pass for the release's
//! target namespace by an [`ActionSessionFactory`].

use async_trait::async_trait;
use helm_types::{ConditionType, Reason, ReleaseDesired, ReleaseRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The mutating actions a pass can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Install => "install",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Test => "test",
            ActionKind::Rollback => "rollback",
            ActionKind::Uninstall => "uninstall",
        }
    }

    pub fn condition_type(&self) -> ConditionType {
        match self {
            ActionKind::Install => ConditionType::Install,
            ActionKind::Upgrade => ConditionType::Upgrade,
            ActionKind::Test => ConditionType::Test,
            ActionKind::Rollback => ConditionType::Rollback,
            ActionKind::Uninstall => ConditionType::Uninstall,
        }
    }

    pub fn success_reason(&self) -> Reason {
        match self {
            ActionKind::Install => Reason::InstallSucceeded,
            ActionKind::Upgrade => Reason::UpgradeSucceeded,
            ActionKind::Test => Reason::TestSucceeded,
            ActionKind::Rollback => Reason::RollbackSucceeded,
            ActionKind::Uninstall => Reason::UninstallSucceeded,
        }
    }

    pub fn failure_reason(&self) -> Reason {
        match self {
            ActionKind::Install => Reason::InstallFailed,
            ActionKind::Upgrade => Reason::UpgradeFailed,
            ActionKind::Test => Reason::TestFailed,
            ActionKind::Rollback => Reason::RollbackFailed,
            ActionKind::Uninstall => Reason::UninstallFailed,
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            ActionKind::Install => "Helm installation succeeded",
            ActionKind::Upgrade => "Helm upgrade succeeded",
            ActionKind::Test => "Helm test succeeded",
            ActionKind::Rollback => "Helm rollback succeeded",
            ActionKind::Uninstall => "Helm uninstall succeeded",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by the package manager
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("{action} timed out after {timeout:?}")]
    Timeout { action: ActionKind, timeout: Duration },

    #[error("{0}")]
    Failed(String),

    #[error("release storage error: {0}")]
    Storage(String),

    #[error("failed to initialize action configuration: {0}")]
    Init(String),
}

impl ActionError {
    /// Whether another pass can be expected to succeed without a desired-state change
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Timeout { .. } | ActionError::Failed(_))
    }
}

/// A downloaded chart archive inside the pass workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartArchive {
    pub path: PathBuf,
    pub chart_name: String,
    /// Artifact revision the archive was fetched at
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub release_name: String,
    pub namespace: String,
    pub timeout: Duration,
    pub wait: bool,
    pub disable_hooks: bool,
    pub disable_openapi_validation: bool,
    pub replace: bool,
    pub skip_crds: bool,
}

impl InstallOptions {
    pub fn from_desired(desired: &ReleaseDesired) -> Self {
        let policy = &desired.install;
        Self {
            release_name: desired.release_name().to_string(),
            namespace: desired.release_namespace().to_string(),
            timeout: policy.timeout.unwrap_or_else(|| desired.timeout()),
            wait: !policy.disable_wait,
            disable_hooks: policy.disable_hooks,
            disable_openapi_validation: policy.disable_openapi_validation,
            replace: policy.replace,
            skip_crds: policy.skip_crds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub namespace: String,
    pub timeout: Duration,
    pub wait: bool,
    pub disable_hooks: bool,
    pub force: bool,
    /// Reuse the previously supplied values instead of resetting them
    pub reuse_values: bool,
    pub reset_values: bool,
    pub max_history: u32,
    pub cleanup_on_fail: bool,
}

impl UpgradeOptions {
    pub fn from_desired(desired: &ReleaseDesired) -> Self {
        let policy = &desired.upgrade;
        Self {
            namespace: desired.release_namespace().to_string(),
            timeout: policy.timeout.unwrap_or_else(|| desired.timeout()),
            wait: !policy.disable_wait,
            disable_hooks: policy.disable_hooks,
            force: policy.force,
            reuse_values: policy.preserve_values,
            reset_values: !policy.preserve_values,
            max_history: desired.max_history(),
            cleanup_on_fail: policy.cleanup_on_fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOptions {
    pub namespace: String,
    pub timeout: Duration,
}

impl TestOptions {
    pub fn from_desired(desired: &ReleaseDesired) -> Self {
        Self {
            namespace: desired.release_namespace().to_string(),
            timeout: desired.test.timeout.unwrap_or_else(|| desired.timeout()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOptions {
    pub target_revision: u32,
    pub timeout: Duration,
    pub wait: bool,
    pub disable_hooks: bool,
    pub force: bool,
    pub recreate: bool,
    pub cleanup_on_fail: bool,
}

impl RollbackOptions {
    pub fn from_desired(desired: &ReleaseDesired, target_revision: u32) -> Self {
        let policy = &desired.rollback;
        Self {
            target_revision,
            timeout: policy.timeout.unwrap_or_else(|| desired.timeout()),
            wait: !policy.disable_wait,
            disable_hooks: policy.disable_hooks,
            force: policy.force,
            recreate: policy.recreate,
            cleanup_on_fail: policy.cleanup_on_fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallOptions {
    pub timeout: Duration,
    pub disable_hooks: bool,
}

impl UninstallOptions {
    pub fn from_desired(desired: &ReleaseDesired) -> Self {
        Self {
            timeout: desired.uninstall.timeout.unwrap_or_else(|| desired.timeout()),
            disable_hooks: desired.uninstall.disable_hooks,
        }
    }
}

/// Package manager operations for one release namespace
#[async_trait]
pub trait PackageActions: Send + Sync {
    /// Currently deployed record of a release, `None` when nothing is deployed
    async fn deployed(&self, release_name: &str) -> Result<Option<ReleaseRecord>, ActionError>;

    async fn install(
        &self,
        chart: &ChartArchive,
        values: &serde_json::Value,
        options: &InstallOptions,
    ) -> Result<ReleaseRecord, ActionError>;

    async fn upgrade(
        &self,
        release_name: &str,
        chart: &ChartArchive,
        values: &serde_json::Value,
        options: &UpgradeOptions,
    ) -> Result<ReleaseRecord, ActionError>;

    async fn test(
        &self,
        release_name: &str,
        options: &TestOptions,
    ) -> Result<ReleaseRecord, ActionError>;

    async fn rollback(
        &self,
        release_name: &str,
        options: &RollbackOptions,
    ) -> Result<ReleaseRecord, ActionError>;

    async fn uninstall(
        &self,
        release_name: &str,
        options: &UninstallOptions,
    ) -> Result<ReleaseRecord, ActionError>;
}

/// Creates an action session for a release
#[async_trait]
pub trait ActionSessionFactory: Send + Sync {
    async fn session(
        &self,
        desired: &ReleaseDesired,
    ) -> Result<Arc<dyn PackageActions>, ActionError>;
}

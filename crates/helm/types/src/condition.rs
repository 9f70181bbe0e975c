//! Condition-based status
//!
//! Conditions form a small observable state machine: one condition per
//! lifecycle action plus the derived `Ready` summary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Condition types, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    Install,
    Upgrade,
    Test,
    Rollback,
    Uninstall,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConditionType::Ready => "Ready",
            ConditionType::Install => "Install",
            ConditionType::Upgrade => "Upgrade",
            ConditionType::Test => "Test",
            ConditionType::Rollback => "Rollback",
            ConditionType::Uninstall => "Uninstall",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Reason codes attached to conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    Progressing,
    ReconciliationSucceeded,
    ReconciliationFailed,
    Suspended,
    ArtifactFailed,
    InitFailed,
    DependencyNotReady,
    LockFailed,
    InstallSucceeded,
    InstallFailed,
    UpgradeSucceeded,
    UpgradeFailed,
    TestSucceeded,
    TestFailed,
    RollbackSucceeded,
    RollbackFailed,
    UninstallSucceeded,
    UninstallFailed,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Progressing => "Progressing",
            Reason::ReconciliationSucceeded => "ReconciliationSucceeded",
            Reason::ReconciliationFailed => "ReconciliationFailed",
            Reason::Suspended => "Suspended",
            Reason::ArtifactFailed => "ArtifactFailed",
            Reason::InitFailed => "InitFailed",
            Reason::DependencyNotReady => "DependencyNotReady",
            Reason::LockFailed => "LockFailed",
            Reason::InstallSucceeded => "InstallSucceeded",
            Reason::InstallFailed => "InstallFailed",
            Reason::UpgradeSucceeded => "UpgradeSucceeded",
            Reason::UpgradeFailed => "UpgradeFailed",
            Reason::TestSucceeded => "TestSucceeded",
            Reason::TestFailed => "TestFailed",
            Reason::RollbackSucceeded => "RollbackSucceeded",
            Reason::RollbackFailed => "RollbackFailed",
            Reason::UninstallSucceeded => "UninstallSucceeded",
            Reason::UninstallFailed => "UninstallFailed",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    pub message: String,
    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Conditions keyed by type; at most one condition per type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet(BTreeMap<ConditionType, Condition>);

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0.get(&condition_type)
    }

    /// Set a condition, replacing any previous condition of the same type.
    ///
    /// The transition time only moves when the status changes. `Ready` is
    /// written by the status projector; callers outside of it should only
    /// set action conditions.
    pub fn set(
        &mut self,
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: Reason,
        message: impl Into<String>,
    ) {
        let now = chrono::Utc::now();
        let last_transition_time = match self.0.get(&condition_type) {
            Some(existing) if existing.status == status => existing.last_transition_time,
            _ => now,
        };

        self.0.insert(
            condition_type,
            Condition {
                condition_type,
                status,
                reason,
                message: message.into(),
                last_transition_time,
            },
        );
    }

    pub fn remove(&mut self, condition_type: ConditionType) -> Option<Condition> {
        self.0.remove(&condition_type)
    }

    /// The `Ready` summary condition, if any
    pub fn ready(&self) -> Option<&Condition> {
        self.get(ConditionType::Ready)
    }

    /// True only when a `Ready` condition exists and is True
    pub fn is_ready(&self) -> bool {
        self.ready().is_some_and(Condition::is_true)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }
}

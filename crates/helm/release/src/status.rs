//! Status projection
//!
//! [`StatusProjector`] is the only writer of [`ReconcileStatus`]. It folds the
//! outcome of a pass into the previous status without performing any I/O.

use crate::action::{ActionError, ActionKind};
use helm_types::{ConditionStatus, ConditionType, Reason, ReconcileStatus};

pub const PROGRESSING_MESSAGE: &str = "reconciliation in progress";
pub const SUCCEEDED_MESSAGE: &str = "release reconciliation succeeded";
pub const SUSPENDED_MESSAGE: &str = "HelmRelease is suspended";

/// Result of one action taken during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub kind: ActionKind,
    pub error: Option<String>,
    pub retryable: bool,
}

impl ActionResult {
    pub fn succeeded(kind: ActionKind) -> Self {
        Self {
            kind,
            error: None,
            retryable: false,
        }
    }

    pub fn failed(kind: ActionKind, error: &ActionError) -> Self {
        Self {
            kind,
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Why a pass stopped before taking any action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    pub reason: Reason,
    pub message: String,
}

/// What the release engine did during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Actions in the order they ran
    pub actions: Vec<ActionResult>,
    /// Deployed revision read back after the actions
    pub observed_revision: Option<u32>,
    pub abort: Option<Abort>,
}

impl PassOutcome {
    pub fn aborted(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            abort: Some(Abort {
                reason,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.abort.is_none() && self.actions.iter().all(ActionResult::is_success)
    }

    pub fn result(&self, kind: ActionKind) -> Option<&ActionResult> {
        self.actions.iter().find(|r| r.kind == kind)
    }

    pub fn succeeded(&self, kind: ActionKind) -> bool {
        self.result(kind).map(ActionResult::is_success).unwrap_or(false)
    }

    pub fn failed(&self, kind: ActionKind) -> bool {
        self.result(kind).map(|r| !r.is_success()).unwrap_or(false)
    }

    pub fn first_failure(&self) -> Option<&ActionResult> {
        self.actions.iter().find(|r| !r.is_success())
    }
}

pub struct StatusProjector;

impl StatusProjector {
    /// Marker written at the start of a pass
    pub fn progressing(previous: &ReconcileStatus, generation: i64) -> ReconcileStatus {
        let mut status = previous.clone();
        status.observed_generation = generation;
        status.conditions.set(
            ConditionType::Ready,
            ConditionStatus::Unknown,
            Reason::Progressing,
            PROGRESSING_MESSAGE,
        );
        status
    }

    /// `Ready=False` without touching revisions or the failure counter
    pub fn not_ready(
        previous: &ReconcileStatus,
        reason: Reason,
        message: impl Into<String>,
    ) -> ReconcileStatus {
        let mut status = previous.clone();
        status
            .conditions
            .set(ConditionType::Ready, ConditionStatus::False, reason, message);
        status
    }

    /// Status after the release engine ran for `desired_revision`
    pub fn project(
        previous: &ReconcileStatus,
        desired_revision: &str,
        outcome: &PassOutcome,
    ) -> ReconcileStatus {
        if let Some(abort) = &outcome.abort {
            return Self::not_ready(previous, abort.reason, abort.message.clone());
        }

        let mut status = previous.clone();
        status.last_attempted_revision = Some(desired_revision.to_string());

        for result in &outcome.actions {
            let condition_type = result.kind.condition_type();
            match &result.error {
                None => status.conditions.set(
                    condition_type,
                    ConditionStatus::True,
                    result.kind.success_reason(),
                    result.kind.success_message(),
                ),
                Some(error) => status.conditions.set(
                    condition_type,
                    ConditionStatus::False,
                    result.kind.failure_reason(),
                    error.clone(),
                ),
            }
        }

        status.last_released_revision = if outcome.succeeded(ActionKind::Uninstall) {
            0
        } else {
            outcome.observed_revision.unwrap_or(previous.last_released_revision)
        };

        match outcome.first_failure() {
            None => {
                status.failures = 0;
                status.conditions.set(
                    ConditionType::Ready,
                    ConditionStatus::True,
                    Reason::ReconciliationSucceeded,
                    SUCCEEDED_MESSAGE,
                );
            }
            Some(failure) => {
                status.failures = previous.failures.saturating_add(1);
                let message = format!(
                    "release reconciliation failed: {}",
                    failure.error.as_deref().unwrap_or_default()
                );
                status.conditions.set(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    Reason::ReconciliationFailed,
                    message,
                );
            }
        }

        status
    }
}

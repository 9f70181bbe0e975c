//! Error types for reconciliation passes

use crate::store::StoreError;
use thiserror::Error;

/// Errors that abort a pass before its outcome could be persisted.
///
/// Everything else a pass encounters is folded into the release status.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Desired-state store failed, including optimistic-concurrency conflicts
    #[error("unable to update release status: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(StoreError::Conflict { .. }))
    }
}

/// Result type for reconciliation passes
pub type Result<T> = std::result::Result<T, ReconcileError>;

//! Desired-state store and dependency lookup interfaces
//!
//! The store is the declarative resource store (get / update-status) that
//! owns release resources. It is expected to enforce optimistic concurrency
//! on status writes.

use async_trait::async_trait;
use helm_types::{ConditionSet, ReconcileStatus, ReleaseDesired, ReleaseIdentity};
use thiserror::Error;

/// A release resource as held by the store
#[derive(Debug, Clone)]
pub struct StoredRelease {
    pub desired: ReleaseDesired,
    pub status: ReconcileStatus,
    /// Version used for optimistic concurrency on status writes
    pub resource_version: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict writing {identity}: expected version {expected}, found {actual}")]
    Conflict {
        identity: ReleaseIdentity,
        expected: u64,
        actual: u64,
    },

    #[error("{0} not found")]
    NotFound(ReleaseIdentity),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Store of release resources
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Fetch a release resource
    async fn get(&self, identity: &ReleaseIdentity) -> Result<Option<StoredRelease>, StoreError>;

    /// Replace the status of a release resource.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored version differs
    /// from `expected_version`. Returns the new version.
    async fn update_status(
        &self,
        identity: &ReleaseIdentity,
        status: &ReconcileStatus,
        expected_version: u64,
    ) -> Result<u64, StoreError>;
}

/// Read-only lookup of other releases' conditions, used by the dependency gate
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    async fn conditions(
        &self,
        identity: &ReleaseIdentity,
    ) -> Result<Option<ConditionSet>, StoreError>;
}

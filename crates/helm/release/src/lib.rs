//! Helm Release - Reconciliation of declared Helm releases
//!
//! This crate converges a declared release onto the cluster through a
//! package-manager action interface. One pass:
//!
//! 1. Skips suspended releases
//! 2. Creates or realigns the release's chart descriptor and waits for its artifact
//! 3. Gates on every dependency reporting `Ready=True`
//! 4. Under the release lock, installs, upgrades, tests, rolls back or
//!    uninstalls as the observed state requires
//! 5. Projects the outcome into conditions and emits one event
//!
//! External systems sit behind traits: [`DesiredStateStore`],
//! [`DependencyLookup`], [`ChartSource`], [`ArtifactFetcher`],
//! [`PackageActions`], [`ReleaseLock`] and [`EventSink`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod action;
pub mod artifact;
pub mod chart;
pub mod decode;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod memory;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod reconciler;
pub mod status;
pub mod store;

pub use action::{
    ActionError, ActionKind, ActionSessionFactory, ChartArchive, InstallOptions, PackageActions,
    RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions,
};
pub use artifact::{ArtifactError, ArtifactFetcher, HttpArtifactFetcher, Workspace};
pub use chart::{ChartSource, ChartSourceError, ChartSync, ChartSyncOutcome};
pub use decode::{decode_release, latest_deployed, DecodeError, MAGIC_GZIP};
pub use dependency::{DependencyError, DependencyGate};
pub use engine::{ObservedState, ReleaseEngine};
pub use error::{ReconcileError, Result};
pub use events::{EventNotifier, EventSink, EventSinkError, HttpEventSink};
pub use lock::{FileReleaseLock, InProcessReleaseLock, LockError, LockHandle, ReleaseLock};
pub use memory::InMemoryReleaseStore;
pub use reconciler::{ReconcileOutcome, ReconcileResult, Reconciler, ReconcilerConfig};
pub use status::{Abort, ActionResult, PassOutcome, StatusProjector};
pub use store::{DependencyLookup, DesiredStateStore, StoreError, StoredRelease};

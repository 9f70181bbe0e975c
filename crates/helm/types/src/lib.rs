//! Helm Types - Core types for release reconciliation
//!
//! These types describe both sides of a reconciliation pass: the declared
//! desired state of a release and what the package manager reports as
//! actually deployed, plus the condition-based status the controller
//! publishes back.
//!
//! ## Key Concepts
//!
//! - **ReleaseDesired**: Chart, values and lifecycle policy to converge on
//! - **ReleaseRecord**: The currently deployed release as reported by history
//! - **HelmChart**: Chart-source descriptor and the artifact it resolved to
//! - **ConditionSet**: Named conditions, at most one per type
//! - **ReconcileStatus**: Revisions, failure counter and conditions
//! - **Events**: Lifecycle notifications with revision metadata

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod chart;
pub mod condition;
pub mod desired;
pub mod events;
pub mod ids;
pub mod release;
pub mod status;

pub use chart::{Artifact, HelmChart, HelmChartSpec};
pub use condition::{Condition, ConditionSet, ConditionStatus, ConditionType, Reason};
pub use desired::{
    ChartTemplate, InstallPolicy, ReleaseDesired, RollbackPolicy, SourceReference,
    SpecValidationError, TestPolicy, UninstallPolicy, UpgradePolicy, DEFAULT_MAX_HISTORY,
    DEFAULT_TIMEOUT,
};
pub use events::{EventSeverity, ReleaseEvent, REVISION_METADATA_KEY};
pub use ids::ReleaseIdentity;
pub use release::{ReleaseRecord, ReleaseState};
pub use status::ReconcileStatus;

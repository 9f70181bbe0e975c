//! Helm Controller - Scheduling and wiring for release reconciliation
//!
//! The controller provides:
//! - Layered configuration (defaults, file, `HELM_CONTROLLER_*` environment)
//! - Tracing subscriber setup
//! - A bounded scheduler running at most one pass per release at a time
//! - A builder assembling the reconciler from its collaborators

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod telemetry;

pub use builder::ControllerBuilder;
pub use config::{
    ArtifactConfig, ControllerConfig, EventsConfig, LockConfig, LoggingConfig, SchedulerConfig,
};
pub use error::{ControllerError, Result};
pub use scheduler::{ReconcilePass, Scheduler};
pub use telemetry::init_tracing;

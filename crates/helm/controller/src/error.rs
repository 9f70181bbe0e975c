//! Error types for helm-controller

use thiserror::Error;

/// Controller-level errors
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// Missing or invalid collaborator
    #[error("Invalid controller setup: {0}")]
    Setup(String),

    /// Tracing subscriber could not be installed
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Artifact fetcher construction failed
    #[error("Artifact error: {0}")]
    Artifact(#[from] helm_release::ArtifactError),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

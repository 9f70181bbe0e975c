//! Configuration for helm-controller

use helm_release::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix, e.g. `HELM_CONTROLLER_SCHEDULER__MAX_CONCURRENT_RECONCILES`
pub const ENV_PREFIX: &str = "HELM_CONTROLLER";

/// Main controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Release lock backend
    #[serde(default)]
    pub lock: LockConfig,

    /// Artifact download configuration
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// External event delivery
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum passes running at once across all releases
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_reconciles: usize,

    /// Requeue interval while dependencies are not ready, in seconds
    #[serde(default = "default_dependency_requeue_interval")]
    pub dependency_requeue_interval_secs: u64,

    /// Delay before retrying a pass whose status write conflicted, in milliseconds
    #[serde(default)]
    pub conflict_requeue_delay_ms: u64,

    /// Delay before retrying a pass that failed on any other store error, in milliseconds
    #[serde(default = "default_error_requeue_delay")]
    pub error_requeue_delay_ms: u64,
}

impl SchedulerConfig {
    pub fn dependency_requeue_interval(&self) -> Duration {
        Duration::from_secs(self.dependency_requeue_interval_secs)
    }

    pub fn conflict_requeue_delay(&self) -> Duration {
        Duration::from_millis(self.conflict_requeue_delay_ms)
    }

    /// Never zero, so a failing store is not polled in a loop
    pub fn error_requeue_delay(&self) -> Duration {
        Duration::from_millis(self.error_requeue_delay_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: default_max_concurrent(),
            dependency_requeue_interval_secs: default_dependency_requeue_interval(),
            conflict_requeue_delay_ms: 0,
            error_requeue_delay_ms: default_error_requeue_delay(),
        }
    }
}

/// Release lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LockConfig {
    /// Lock files shared by every controller instance that can see `dir`
    File {
        #[serde(default = "default_lock_dir")]
        dir: PathBuf,
    },

    /// In-process locks (single instance only)
    Memory,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig::File {
            dir: default_lock_dir(),
        }
    }
}

/// Artifact download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Download timeout in seconds
    #[serde(default = "default_artifact_timeout")]
    pub timeout_secs: u64,
}

impl ArtifactConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_artifact_timeout(),
        }
    }
}

/// External event recorder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Address events are POSTed to; events stay local when unset
    #[serde(default)]
    pub external_address: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_max_concurrent() -> usize {
    4
}

fn default_dependency_requeue_interval() -> u64 {
    30
}

fn default_error_requeue_delay() -> u64 {
    5_000
}

fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("helm-controller")
}

fn default_artifact_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ControllerConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&ControllerConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys are separated by a double underscore
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            dependency_requeue_interval: self.scheduler.dependency_requeue_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.scheduler.max_concurrent_reconciles, 4);
        assert_eq!(config.scheduler.dependency_requeue_interval(), Duration::from_secs(30));
        assert_eq!(config.scheduler.conflict_requeue_delay(), Duration::ZERO);
        assert_eq!(config.scheduler.error_requeue_delay(), Duration::from_secs(5));
        assert_eq!(config.artifact.timeout(), Duration::from_secs(60));
        assert!(config.events.external_address.is_none());
        assert!(matches!(config.lock, LockConfig::File { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[scheduler]
max_concurrent_reconciles = 8
dependency_requeue_interval_secs = 10

[lock]
type = "memory"

[events]
external_address = "http://notification-controller/"

[logging]
json = true
"#
        )
        .unwrap();

        let config = ControllerConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.max_concurrent_reconciles, 8);
        assert_eq!(
            config.reconciler_config().dependency_requeue_interval,
            Duration::from_secs(10)
        );
        assert_eq!(config.lock, LockConfig::Memory);
        assert_eq!(
            config.events.external_address.as_deref(),
            Some("http://notification-controller/")
        );
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.artifact.timeout_secs, 60);
    }

    #[test]
    fn test_error_requeue_delay_is_never_zero() {
        let config = SchedulerConfig {
            error_requeue_delay_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.error_requeue_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ControllerConfig::load(Some("/nonexistent/helm-controller")).unwrap();
        assert_eq!(config.scheduler.max_concurrent_reconciles, 4);
    }
}

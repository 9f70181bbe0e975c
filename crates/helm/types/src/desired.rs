//! Desired release state
//!
//! A ReleaseDesired is what the resource store declares: which chart to run,
//! with which values, and how each lifecycle action should behave.

use crate::ReleaseIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Timeout applied to an action when neither the action nor the release sets one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Release revisions retained by upgrades unless overridden
pub const DEFAULT_MAX_HISTORY: u32 = 10;

/// Declared state of a release. Read-only for the duration of a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseDesired {
    /// Identity of the release resource
    pub identity: ReleaseIdentity,

    /// Generation of the declared resource, echoed into status
    #[serde(default)]
    pub generation: i64,

    /// Release name override (defaults to the resource name)
    #[serde(default)]
    pub release_name: Option<String>,

    /// Namespace the release is installed into (defaults to the resource namespace)
    #[serde(default)]
    pub target_namespace: Option<String>,

    /// Chart template used to build the chart-source descriptor
    pub chart: ChartTemplate,

    /// Values passed to install and upgrade
    #[serde(default)]
    pub values: serde_json::Value,

    /// Interval between reconciliation passes
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Default timeout for every action
    #[serde(default, with = "option_duration_serde")]
    pub timeout: Option<Duration>,

    /// Revisions kept in release history
    #[serde(default)]
    pub max_history: Option<u32>,

    /// Skip reconciliation entirely
    #[serde(default)]
    pub suspend: bool,

    /// Releases that must be ready before this one is touched, in declaration order
    #[serde(default)]
    pub depends_on: Vec<ReleaseIdentity>,

    #[serde(default)]
    pub install: InstallPolicy,

    #[serde(default)]
    pub upgrade: UpgradePolicy,

    #[serde(default)]
    pub test: TestPolicy,

    #[serde(default)]
    pub rollback: RollbackPolicy,

    #[serde(default)]
    pub uninstall: UninstallPolicy,

    /// Set when the resource is being deleted and the release should be removed
    #[serde(default)]
    pub deletion_requested_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ReleaseDesired {
    /// Create a desired release with default policies
    pub fn new(identity: ReleaseIdentity, chart: ChartTemplate) -> Self {
        Self {
            identity,
            generation: 1,
            release_name: None,
            target_namespace: None,
            chart,
            values: serde_json::Value::Null,
            interval: Duration::from_secs(300),
            timeout: None,
            max_history: None,
            suspend: false,
            depends_on: Vec::new(),
            install: InstallPolicy::default(),
            upgrade: UpgradePolicy::default(),
            test: TestPolicy::default(),
            rollback: RollbackPolicy::default(),
            uninstall: UninstallPolicy::default(),
            deletion_requested_at: None,
        }
    }

    /// Name of the release in the package manager
    pub fn release_name(&self) -> &str {
        self.release_name
            .as_deref()
            .unwrap_or(&self.identity.name)
    }

    /// Namespace the release lives in
    pub fn release_namespace(&self) -> &str {
        self.target_namespace
            .as_deref()
            .unwrap_or(&self.identity.namespace)
    }

    /// Release-wide action timeout
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn max_history(&self) -> u32 {
        self.max_history.unwrap_or(DEFAULT_MAX_HISTORY)
    }

    /// Object name of the chart-source descriptor owned by this release
    pub fn chart_name(&self) -> String {
        format!("{}-{}", self.identity.namespace, self.identity.name)
    }

    /// Namespace of the chart-source descriptor
    pub fn chart_namespace(&self) -> &str {
        self.chart.namespace_or(&self.identity.namespace)
    }

    pub fn is_deletion_requested(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    /// Validate the declared state before any work is attempted
    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.identity.name.is_empty() || self.identity.namespace.is_empty() {
            return Err(SpecValidationError::EmptyName);
        }

        if self.chart.chart.is_empty() {
            return Err(SpecValidationError::InvalidChart("chart name cannot be empty".into()));
        }

        if self.chart.source_ref.name.is_empty() {
            return Err(SpecValidationError::InvalidChart(
                "source reference name cannot be empty".into(),
            ));
        }

        if self.interval.is_zero() {
            return Err(SpecValidationError::InvalidInterval);
        }

        let mut seen = HashSet::new();
        for dep in &self.depends_on {
            if dep == &self.identity {
                return Err(SpecValidationError::InvalidDependency(format!(
                    "'{}' cannot depend on itself",
                    dep
                )));
            }
            if !seen.insert(dep) {
                return Err(SpecValidationError::InvalidDependency(format!(
                    "'{}' is listed more than once",
                    dep
                )));
            }
        }

        Ok(())
    }
}

/// Template for the chart-source descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartTemplate {
    /// Chart name within the source
    pub chart: String,

    /// Chart version or semver range
    #[serde(default = "default_chart_version")]
    pub version: String,

    /// Source the chart is fetched from
    pub source_ref: SourceReference,

    /// Descriptor reconcile interval (defaults to the release interval)
    #[serde(default, with = "option_duration_serde")]
    pub interval: Option<Duration>,
}

impl ChartTemplate {
    pub fn new(
        chart: impl Into<String>,
        version: impl Into<String>,
        source_ref: SourceReference,
    ) -> Self {
        Self {
            chart: chart.into(),
            version: version.into(),
            source_ref,
            interval: None,
        }
    }

    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.source_ref.namespace.as_deref().unwrap_or(default)
    }

    pub fn interval_or(&self, default: Duration) -> Duration {
        self.interval.unwrap_or(default)
    }
}

/// Reference to the repository a chart is served from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    #[serde(default = "default_source_kind")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl SourceReference {
    /// Reference to a chart repository in the release namespace
    pub fn repository(name: impl Into<String>) -> Self {
        Self {
            kind: default_source_kind(),
            name: name.into(),
            namespace: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallPolicy {
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
    pub disable_wait: bool,
    pub disable_hooks: bool,
    pub disable_openapi_validation: bool,
    pub replace: bool,
    pub skip_crds: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradePolicy {
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
    pub disable_wait: bool,
    pub disable_hooks: bool,
    pub force: bool,
    /// Reuse the values of the last release instead of resetting to the chart defaults
    pub preserve_values: bool,
    pub cleanup_on_fail: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPolicy {
    /// Run the chart's test hooks on every pass
    pub enable: bool,
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    pub enable: bool,
    /// Consecutive failed passes after which a failed install/upgrade is rolled back
    pub failure_threshold: u32,
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
    pub disable_wait: bool,
    pub disable_hooks: bool,
    pub force: bool,
    pub recreate: bool,
    pub cleanup_on_fail: bool,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            enable: false,
            failure_threshold: 1,
            timeout: None,
            disable_wait: false,
            disable_hooks: false,
            force: false,
            recreate: false,
            cleanup_on_fail: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UninstallPolicy {
    #[serde(with = "option_duration_serde")]
    pub timeout: Option<Duration>,
    pub disable_hooks: bool,
}

/// Desired state validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecValidationError {
    #[error("Release name and namespace cannot be empty")]
    EmptyName,

    #[error("Invalid chart template: {0}")]
    InvalidChart(String),

    #[error("Reconciliation interval must be greater than zero")]
    InvalidInterval,

    #[error("Invalid dependency: {0}")]
    InvalidDependency(String),
}

fn default_chart_version() -> String {
    "*".to_string()
}

fn default_source_kind() -> String {
    "HelmRepository".to_string()
}

/// Serde helper for Duration
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired() -> ReleaseDesired {
        ReleaseDesired::new(
            ReleaseIdentity::new("apps", "podinfo"),
            ChartTemplate::new("podinfo", "6.x", SourceReference::repository("podinfo")),
        )
    }

    #[test]
    fn test_release_name_defaults_to_resource() {
        let mut d = desired();
        assert_eq!(d.release_name(), "podinfo");
        assert_eq!(d.release_namespace(), "apps");

        d.release_name = Some("web".into());
        d.target_namespace = Some("prod".into());
        assert_eq!(d.release_name(), "web");
        assert_eq!(d.release_namespace(), "prod");
    }

    #[test]
    fn test_chart_descriptor_location() {
        let mut d = desired();
        assert_eq!(d.chart_name(), "apps-podinfo");
        assert_eq!(d.chart_namespace(), "apps");

        d.chart.source_ref.namespace = Some("flux-system".into());
        assert_eq!(d.chart_namespace(), "flux-system");
    }

    #[test]
    fn test_timeouts_fall_back() {
        let mut d = desired();
        assert_eq!(d.timeout(), DEFAULT_TIMEOUT);
        d.timeout = Some(Duration::from_secs(60));
        assert_eq!(d.timeout(), Duration::from_secs(60));
        assert_eq!(d.max_history(), DEFAULT_MAX_HISTORY);
    }

    #[test]
    fn test_validate_rejects_self_dependency() {
        let mut d = desired();
        d.depends_on.push(d.identity.clone());
        assert!(matches!(
            d.validate(),
            Err(SpecValidationError::InvalidDependency(_))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_dependency() {
        let mut d = desired();
        d.depends_on.push(d.identity.sibling("db"));
        d.depends_on.push(d.identity.sibling("db"));
        assert!(matches!(
            d.validate(),
            Err(SpecValidationError::InvalidDependency(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_chart() {
        let mut d = desired();
        d.chart.chart.clear();
        assert!(matches!(d.validate(), Err(SpecValidationError::InvalidChart(_))));
        assert!(desired().validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = serde_json::json!({
            "identity": { "namespace": "apps", "name": "podinfo" },
            "chart": {
                "chart": "podinfo",
                "source_ref": { "name": "podinfo" }
            },
            "interval": 60000,
            "rollback": { "enable": true }
        });
        let d: ReleaseDesired = serde_json::from_value(json).unwrap();
        assert_eq!(d.chart.version, "*");
        assert_eq!(d.chart.source_ref.kind, "HelmRepository");
        assert_eq!(d.interval, Duration::from_secs(60));
        assert!(d.rollback.enable);
        assert_eq!(d.rollback.failure_threshold, 1);
        assert!(!d.test.enable);
    }
}

//! Chart-source descriptors
//!
//! The controller owns one HelmChart descriptor per release. An external
//! source controller resolves it and publishes the packaged chart as an
//! artifact.

use crate::SourceReference;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chart-source descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmChart {
    /// Object name
    pub name: String,

    /// Object namespace
    pub namespace: String,

    pub spec: HelmChartSpec,

    /// Artifact published by the source controller, once resolved
    #[serde(default)]
    pub artifact: Option<Artifact>,
}

impl HelmChart {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: HelmChartSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmChartSpec {
    /// Chart name within the repository
    pub chart: String,

    /// Chart version or range
    pub version: String,

    /// Repository the chart is served from
    pub source_ref: SourceReference,

    /// Interval at which the source controller re-resolves the chart
    #[serde(with = "crate::desired::duration_serde")]
    pub interval: Duration,
}

/// Packaged chart published by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Download location of the chart archive
    pub url: String,

    /// Revision of the artifact (the resolved chart version)
    pub revision: String,

    #[serde(default)]
    pub checksum: Option<String>,

    pub last_update_time: chrono::DateTime<chrono::Utc>,
}

impl Artifact {
    pub fn new(url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            revision: revision.into(),
            checksum: None,
            last_update_time: chrono::Utc::now(),
        }
    }
}

//! Chart-source synchronization
//!
//! Each release owns a chart descriptor named `"{namespace}-{name}"`. The
//! descriptor is created or realigned with the release's chart template,
//! and the pass only proceeds once the source has published an artifact.

use async_trait::async_trait;
use helm_types::{Artifact, HelmChart, HelmChartSpec, ReleaseDesired};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ChartSourceError {
    #[error("chart {0} already exists")]
    AlreadyExists(String),

    #[error("chart {0} not found")]
    NotFound(String),

    #[error("chart source unavailable: {0}")]
    Unavailable(String),
}

/// Store of chart-source descriptors
#[async_trait]
pub trait ChartSource: Send + Sync {
    async fn get_chart(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<HelmChart>, ChartSourceError>;

    async fn create_chart(&self, chart: HelmChart) -> Result<(), ChartSourceError>;

    async fn update_chart(&self, chart: HelmChart) -> Result<(), ChartSourceError>;
}

/// Result of aligning the chart descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ChartSyncOutcome {
    /// Descriptor is current and its artifact can be released
    Ready(Artifact),
    Created,
    Updated,
    /// Descriptor is current but has no artifact yet
    Pending,
}

impl ChartSyncOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            ChartSyncOutcome::Ready(artifact) => Some(artifact),
            _ => None,
        }
    }
}

pub struct ChartSync {
    source: Arc<dyn ChartSource>,
}

impl ChartSync {
    pub fn new(source: Arc<dyn ChartSource>) -> Self {
        Self { source }
    }

    /// Chart descriptor as declared by the release's chart template
    pub fn chart_from_template(desired: &ReleaseDesired) -> HelmChart {
        let template = &desired.chart;
        HelmChart::new(
            desired.chart_name(),
            desired.chart_namespace(),
            HelmChartSpec {
                chart: template.chart.clone(),
                version: template.version.clone(),
                source_ref: template.source_ref.clone(),
                interval: template.interval_or(desired.interval),
            },
        )
    }

    /// Whether the descriptor drifted from the template
    pub fn requires_update(desired: &ReleaseDesired, chart: &HelmChart) -> bool {
        let template = &desired.chart;
        template.chart != chart.spec.chart
            || template.version != chart.spec.version
            || template.source_ref != chart.spec.source_ref
            || template.interval_or(desired.interval) != chart.spec.interval
    }

    pub async fn reconcile(
        &self,
        desired: &ReleaseDesired,
    ) -> Result<ChartSyncOutcome, ChartSourceError> {
        let name = desired.chart_name();
        let namespace = desired.chart_namespace();

        let existing = match self.source.get_chart(namespace, &name).await? {
            Some(chart) => chart,
            None => {
                self.source.create_chart(Self::chart_from_template(desired)).await?;
                info!(release = %desired.identity, chart = %name, "Created chart descriptor");
                return Ok(ChartSyncOutcome::Created);
            }
        };

        if Self::requires_update(desired, &existing) {
            let mut updated = Self::chart_from_template(desired);
            updated.artifact = existing.artifact;
            self.source.update_chart(updated).await?;
            info!(release = %desired.identity, chart = %name, "Updated chart descriptor");
            return Ok(ChartSyncOutcome::Updated);
        }

        match existing.artifact {
            Some(artifact) => Ok(ChartSyncOutcome::Ready(artifact)),
            None => {
                debug!(release = %desired.identity, chart = %name, "Chart has no artifact yet");
                Ok(ChartSyncOutcome::Pending)
            }
        }
    }
}

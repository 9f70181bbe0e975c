//! Reconciler
//!
//! Runs one pass for a release identity: suspension check, progressing
//! marker, chart sync, dependency gate, release engine and status
//! projection, then reports when the release should be reconciled again.

use crate::chart::{ChartSource, ChartSync, ChartSyncOutcome};
use crate::dependency::DependencyGate;
use crate::engine::ReleaseEngine;
use crate::error::Result;
use crate::events::EventNotifier;
use crate::status::{StatusProjector, SUSPENDED_MESSAGE};
use crate::store::{DependencyLookup, DesiredStateStore};
use helm_types::{EventSeverity, Reason, ReconcileStatus, ReleaseIdentity};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Fixed requeue interval while dependencies are not ready
    pub dependency_requeue_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            dependency_requeue_interval: Duration::from_secs(30),
        }
    }
}

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The release resource no longer exists
    NotFound,
    Suspended,
    /// Desired state failed validation; waits for it to change
    Invalid,
    /// Chart descriptor created, updated or not yet resolved
    ArtifactNotReady,
    ArtifactFailed,
    DependencyNotReady,
    /// The release engine ran
    Released { ready: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    pub outcome: ReconcileOutcome,
    /// `None` means wait for the next change
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done(outcome: ReconcileOutcome) -> Self {
        Self {
            outcome,
            requeue_after: None,
        }
    }

    pub fn requeue(outcome: ReconcileOutcome, after: Duration) -> Self {
        Self {
            outcome,
            requeue_after: Some(after),
        }
    }
}

pub struct Reconciler {
    config: ReconcilerConfig,
    store: Arc<dyn DesiredStateStore>,
    dependencies: Arc<dyn DependencyLookup>,
    charts: ChartSync,
    engine: ReleaseEngine,
    notifier: EventNotifier,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn DesiredStateStore>,
        dependencies: Arc<dyn DependencyLookup>,
        charts: Arc<dyn ChartSource>,
        engine: ReleaseEngine,
        notifier: EventNotifier,
    ) -> Self {
        Self {
            config,
            store,
            dependencies,
            charts: ChartSync::new(charts),
            engine,
            notifier,
        }
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    /// Run one reconciliation pass.
    ///
    /// Errors come from the desired-state store. Only a status-write
    /// conflict ([`crate::ReconcileError::is_conflict`]) should be retried
    /// right away.
    #[instrument(skip(self), fields(release = %identity))]
    pub async fn reconcile(&self, identity: &ReleaseIdentity) -> Result<ReconcileResult> {
        let started = Instant::now();

        let stored = match self.store.get(identity).await? {
            Some(stored) => stored,
            None => {
                debug!("Release no longer exists");
                return Ok(ReconcileResult::done(ReconcileOutcome::NotFound));
            }
        };
        let desired = stored.desired;
        let mut version = stored.resource_version;

        if desired.suspend {
            let status =
                StatusProjector::not_ready(&stored.status, Reason::Suspended, SUSPENDED_MESSAGE);
            self.store.update_status(identity, &status, version).await?;
            info!("Reconciliation is suspended for this object");
            return Ok(ReconcileResult::done(ReconcileOutcome::Suspended));
        }

        if let Err(e) = desired.validate() {
            let message = format!("invalid release: {}", e);
            let status =
                StatusProjector::not_ready(&stored.status, Reason::InitFailed, message.clone());
            self.store.update_status(identity, &status, version).await?;
            error!(error = %e, "Release failed validation");
            self.notifier
                .notify(identity, None, EventSeverity::Error, message)
                .await;
            return Ok(ReconcileResult::done(ReconcileOutcome::Invalid));
        }

        let status = StatusProjector::progressing(&stored.status, desired.generation);
        version = self.store.update_status(identity, &status, version).await?;

        let artifact = match self.charts.reconcile(&desired).await {
            Ok(ChartSyncOutcome::Ready(artifact)) => artifact,
            Ok(_) => {
                let message = "HelmChart is not ready";
                self.write_not_ready(identity, &status, version, Reason::ArtifactFailed, message)
                    .await?;
                info!(next_run = ?desired.interval, "{}", message);
                self.notifier
                    .notify(identity, None, EventSeverity::Info, message)
                    .await;
                return Ok(ReconcileResult::requeue(
                    ReconcileOutcome::ArtifactNotReady,
                    desired.interval,
                ));
            }
            Err(e) => {
                let message = format!("HelmChart reconciliation failed: {}", e);
                self.write_not_ready(identity, &status, version, Reason::ArtifactFailed, &message)
                    .await?;
                error!(error = %e, "HelmChart reconciliation failed");
                self.notifier
                    .notify(identity, None, EventSeverity::Error, message)
                    .await;
                return Ok(ReconcileResult::requeue(
                    ReconcileOutcome::ArtifactFailed,
                    desired.interval,
                ));
            }
        };
        let revision = Some(artifact.revision.as_str());

        if !desired.depends_on.is_empty() {
            let gate = DependencyGate::check(&desired.depends_on, self.dependencies.as_ref()).await;
            if let Err(e) = gate {
                let retry = self.config.dependency_requeue_interval;
                let reason = Reason::DependencyNotReady;
                self.write_not_ready(identity, &status, version, reason, &e.to_string())
                    .await?;
                let message = format!(
                    "Dependencies do not meet ready condition ({}), retrying in {:?}",
                    e, retry
                );
                info!(dependency = %e.dependency(), "{}", message);
                self.notifier
                    .notify(identity, revision, EventSeverity::Info, message)
                    .await;
                return Ok(ReconcileResult::requeue(ReconcileOutcome::DependencyNotReady, retry));
            }
            info!("All dependencies are ready, proceeding with release");
        }

        let outcome = self.engine.run(&desired, &status, &artifact).await;
        let reconciled = StatusProjector::project(&status, &artifact.revision, &outcome);

        // One event per engine run, even when the write below conflicts
        let ready = reconciled.is_ready();
        let severity = if ready {
            EventSeverity::Info
        } else {
            error!(
                failures = reconciled.failures,
                detail = reconciled.ready_message(),
                "Release reconciliation failed"
            );
            EventSeverity::Error
        };
        self.notifier
            .notify(identity, revision, severity, reconciled.ready_message())
            .await;

        self.store.update_status(identity, &reconciled, version).await?;

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            next_run = ?desired.interval,
            "Reconciliation finished"
        );
        Ok(ReconcileResult::requeue(
            ReconcileOutcome::Released { ready },
            desired.interval,
        ))
    }

    async fn write_not_ready(
        &self,
        identity: &ReleaseIdentity,
        previous: &ReconcileStatus,
        version: u64,
        reason: Reason,
        message: &str,
    ) -> Result<u64> {
        let status = StatusProjector::not_ready(previous, reason, message);
        Ok(self.store.update_status(identity, &status, version).await?)
    }
}

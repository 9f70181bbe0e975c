//! Builder for the controller
//!
//! Wires the configured lock backend, artifact fetcher and event sink
//! together with the external collaborators into a reconciler and its
//! scheduler.

use crate::config::{ControllerConfig, LockConfig};
use crate::error::{ControllerError, Result};
use crate::scheduler::Scheduler;
use helm_release::{
    ActionSessionFactory, ArtifactFetcher, ChartSource, DependencyLookup, DesiredStateStore,
    EventNotifier, EventSink, FileReleaseLock, HttpArtifactFetcher, HttpEventSink,
    InMemoryReleaseStore, InProcessReleaseLock, Reconciler, ReleaseEngine, ReleaseLock,
};
use helm_types::ReleaseIdentity;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Builder for constructing a controller with all dependencies
pub struct ControllerBuilder {
    config: ControllerConfig,
    store: Option<Arc<dyn DesiredStateStore>>,
    dependencies: Option<Arc<dyn DependencyLookup>>,
    charts: Option<Arc<dyn ChartSource>>,
    sessions: Option<Arc<dyn ActionSessionFactory>>,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    event_sink: Option<Arc<dyn EventSink>>,
    lock: Option<Arc<dyn ReleaseLock>>,
}

impl ControllerBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            store: None,
            dependencies: None,
            charts: None,
            sessions: None,
            fetcher: None,
            event_sink: None,
            lock: None,
        }
    }

    /// Set the desired-state store
    pub fn with_store(mut self, store: Arc<dyn DesiredStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the dependency lookup
    pub fn with_dependency_lookup(mut self, lookup: Arc<dyn DependencyLookup>) -> Self {
        self.dependencies = Some(lookup);
        self
    }

    /// Set the chart source
    pub fn with_chart_source(mut self, charts: Arc<dyn ChartSource>) -> Self {
        self.charts = Some(charts);
        self
    }

    /// Use one in-memory store as desired-state store, dependency lookup and chart source
    pub fn with_in_memory_store(self, store: Arc<InMemoryReleaseStore>) -> Self {
        self.with_store(store.clone())
            .with_dependency_lookup(store.clone())
            .with_chart_source(store)
    }

    /// Set the package-manager session factory
    pub fn with_action_sessions(mut self, sessions: Arc<dyn ActionSessionFactory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the HTTP artifact fetcher
    pub fn with_artifact_fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Override the configured external event sink
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Override the configured lock backend
    pub fn with_release_lock(mut self, lock: Arc<dyn ReleaseLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    fn lock_from_config(config: &LockConfig) -> Arc<dyn ReleaseLock> {
        match config {
            LockConfig::File { dir } => Arc::new(FileReleaseLock::new(dir.clone())),
            LockConfig::Memory => Arc::new(InProcessReleaseLock::new()),
        }
    }

    /// Build the reconciler
    pub fn build_reconciler(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| ControllerError::Setup("store required".into()))?;
        let dependencies = self
            .dependencies
            .ok_or_else(|| ControllerError::Setup("dependency_lookup required".into()))?;
        let charts = self
            .charts
            .ok_or_else(|| ControllerError::Setup("chart_source required".into()))?;
        let sessions = self
            .sessions
            .ok_or_else(|| ControllerError::Setup("action_sessions required".into()))?;

        let fetcher: Arc<dyn ArtifactFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpArtifactFetcher::new(self.config.artifact.timeout())?),
        };
        let lock = self
            .lock
            .unwrap_or_else(|| Self::lock_from_config(&self.config.lock));

        let external = &self.config.events.external_address;
        let sink: Option<Arc<dyn EventSink>> = match (self.event_sink, external) {
            (Some(sink), _) => Some(sink),
            (None, Some(address)) => Some(Arc::new(HttpEventSink::new(address.clone()))),
            (None, None) => None,
        };
        let notifier = match sink {
            Some(sink) => EventNotifier::new().with_sink(sink),
            None => EventNotifier::new(),
        };

        info!(lock = lock.name(), "Building reconciler");

        Ok(Reconciler::new(
            self.config.reconciler_config(),
            store,
            dependencies,
            charts,
            ReleaseEngine::new(lock, fetcher, sessions),
            notifier,
        ))
    }

    /// Build the reconciler and a scheduler driving it
    pub fn build(self) -> Result<(Arc<Scheduler>, mpsc::UnboundedReceiver<ReleaseIdentity>)> {
        let scheduler_config = self.config.scheduler.clone();
        let reconciler = Arc::new(self.build_reconciler()?);
        Ok(Scheduler::new(reconciler, &scheduler_config))
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

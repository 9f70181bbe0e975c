//! Mock collaborators for reconciliation tests
//!
//! [`MockPackageActions`] keeps a release history the way a package manager
//! does and can be told to fail any action.

use crate::action::{
    ActionError, ActionKind, ActionSessionFactory, ChartArchive, InstallOptions, PackageActions,
    RollbackOptions, TestOptions, UninstallOptions, UpgradeOptions,
};
use crate::artifact::{ArtifactError, ArtifactFetcher, ARCHIVE_FILE_NAME};
use async_trait::async_trait;
use helm_types::{ReleaseDesired, ReleaseRecord, ReleaseState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A recorded call into [`MockPackageActions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCall {
    pub kind: ActionKind,
    pub release_name: String,
    pub timeout: Duration,
    /// Rollback target, for rollbacks
    pub target_revision: Option<u32>,
}

#[derive(Debug, Default)]
struct MockState {
    history: Vec<ReleaseRecord>,
    calls: Vec<ActionCall>,
    failures: HashMap<ActionKind, ActionError>,
    deployed_error: Option<ActionError>,
}

impl MockState {
    fn next_revision(&self, release_name: &str) -> u32 {
        self.history
            .iter()
            .filter(|r| r.name == release_name)
            .map(|r| r.revision)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn deployed(&self, release_name: &str) -> Option<&ReleaseRecord> {
        self.history
            .iter()
            .filter(|r| r.name == release_name && r.is_deployed())
            .max_by_key(|r| r.revision)
    }

    fn supersede(&mut self, release_name: &str) {
        for record in self.history.iter_mut() {
            if record.name == release_name && record.is_deployed() {
                record.state = ReleaseState::Superseded;
            }
        }
    }

    fn record(
        &mut self,
        kind: ActionKind,
        release_name: &str,
        timeout: Duration,
        target_revision: Option<u32>,
    ) {
        self.calls.push(ActionCall {
            kind,
            release_name: release_name.to_string(),
            timeout,
            target_revision,
        });
    }
}

/// In-memory package manager with a per-release revision history
#[derive(Debug, Default)]
pub struct MockPackageActions {
    state: Mutex<MockState>,
}

impl MockPackageActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the history with an existing record
    pub async fn with_release(self, record: ReleaseRecord) -> Self {
        self.state.lock().await.history.push(record);
        self
    }

    /// Make every subsequent call of `kind` fail with `error`
    pub async fn fail(&self, kind: ActionKind, error: ActionError) {
        self.state.lock().await.failures.insert(kind, error);
    }

    pub async fn clear_failure(&self, kind: ActionKind) {
        self.state.lock().await.failures.remove(&kind);
    }

    pub async fn fail_deployed(&self, error: ActionError) {
        self.state.lock().await.deployed_error = Some(error);
    }

    pub async fn calls(&self) -> Vec<ActionCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn call_kinds(&self) -> Vec<ActionKind> {
        self.state.lock().await.calls.iter().map(|c| c.kind).collect()
    }

    pub async fn history(&self) -> Vec<ReleaseRecord> {
        self.state.lock().await.history.clone()
    }
}

#[async_trait]
impl PackageActions for MockPackageActions {
    async fn deployed(&self, release_name: &str) -> Result<Option<ReleaseRecord>, ActionError> {
        let state = self.state.lock().await;
        if let Some(error) = &state.deployed_error {
            return Err(error.clone());
        }
        Ok(state.deployed(release_name).cloned())
    }

    async fn install(
        &self,
        chart: &ChartArchive,
        _values: &serde_json::Value,
        options: &InstallOptions,
    ) -> Result<ReleaseRecord, ActionError> {
        let mut state = self.state.lock().await;
        state.record(ActionKind::Install, &options.release_name, options.timeout, None);

        let record = ReleaseRecord::new(
            &options.release_name,
            &options.namespace,
            state.next_revision(&options.release_name),
            &chart.chart_name,
            &chart.revision,
        );
        if let Some(error) = state.failures.get(&ActionKind::Install).cloned() {
            state.history.push(record.with_state(ReleaseState::Failed));
            return Err(error);
        }
        state.history.push(record.clone());
        Ok(record)
    }

    async fn upgrade(
        &self,
        release_name: &str,
        chart: &ChartArchive,
        _values: &serde_json::Value,
        options: &UpgradeOptions,
    ) -> Result<ReleaseRecord, ActionError> {
        let mut state = self.state.lock().await;
        state.record(ActionKind::Upgrade, release_name, options.timeout, None);

        let record = ReleaseRecord::new(
            release_name,
            &options.namespace,
            state.next_revision(release_name),
            &chart.chart_name,
            &chart.revision,
        );
        if let Some(error) = state.failures.get(&ActionKind::Upgrade).cloned() {
            state.history.push(record.with_state(ReleaseState::Failed));
            return Err(error);
        }
        state.supersede(release_name);
        state.history.push(record.clone());
        Ok(record)
    }

    async fn test(
        &self,
        release_name: &str,
        options: &TestOptions,
    ) -> Result<ReleaseRecord, ActionError> {
        let mut state = self.state.lock().await;
        state.record(ActionKind::Test, release_name, options.timeout, None);

        if let Some(error) = state.failures.get(&ActionKind::Test).cloned() {
            return Err(error);
        }
        state
            .deployed(release_name)
            .cloned()
            .ok_or_else(|| ActionError::Failed(format!("release: {} not found", release_name)))
    }

    async fn rollback(
        &self,
        release_name: &str,
        options: &RollbackOptions,
    ) -> Result<ReleaseRecord, ActionError> {
        let mut state = self.state.lock().await;
        state.record(
            ActionKind::Rollback,
            release_name,
            options.timeout,
            Some(options.target_revision),
        );

        if let Some(error) = state.failures.get(&ActionKind::Rollback).cloned() {
            return Err(error);
        }
        let target = state
            .history
            .iter()
            .find(|r| r.name == release_name && r.revision == options.target_revision)
            .cloned()
            .ok_or_else(|| {
                ActionError::Failed(format!("release has no {} version", options.target_revision))
            })?;

        let mut record = target.with_state(ReleaseState::Deployed);
        record.revision = state.next_revision(release_name);
        state.supersede(release_name);
        state.history.push(record.clone());
        Ok(record)
    }

    async fn uninstall(
        &self,
        release_name: &str,
        options: &UninstallOptions,
    ) -> Result<ReleaseRecord, ActionError> {
        let mut state = self.state.lock().await;
        state.record(ActionKind::Uninstall, release_name, options.timeout, None);

        if let Some(error) = state.failures.get(&ActionKind::Uninstall).cloned() {
            return Err(error);
        }
        let mut uninstalled = None;
        for record in state.history.iter_mut() {
            if record.name == release_name && record.is_deployed() {
                record.state = ReleaseState::Uninstalled;
                uninstalled = Some(record.clone());
            }
        }
        uninstalled
            .ok_or_else(|| ActionError::Failed(format!("release: {} not found", release_name)))
    }
}

/// Hands out one shared [`MockPackageActions`]
pub struct MockSessionFactory {
    actions: Arc<MockPackageActions>,
    init_error: Mutex<Option<ActionError>>,
}

impl MockSessionFactory {
    pub fn new(actions: Arc<MockPackageActions>) -> Self {
        Self {
            actions,
            init_error: Mutex::new(None),
        }
    }

    pub async fn fail_init(&self, error: ActionError) {
        *self.init_error.lock().await = Some(error);
    }
}

#[async_trait]
impl ActionSessionFactory for MockSessionFactory {
    async fn session(
        &self,
        _desired: &ReleaseDesired,
    ) -> Result<Arc<dyn PackageActions>, ActionError> {
        if let Some(error) = self.init_error.lock().await.clone() {
            return Err(error);
        }
        let actions: Arc<dyn PackageActions> = self.actions.clone();
        Ok(actions)
    }
}

/// Writes a placeholder archive instead of downloading
#[derive(Debug, Default)]
pub struct MockArtifactFetcher {
    fail_status: Mutex<Option<u16>>,
    fetched: Mutex<Vec<(String, PathBuf)>>,
}

impl MockArtifactFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_with_status(&self, status: u16) {
        *self.fail_status.lock().await = Some(status);
    }

    /// URLs fetched so far with the archive paths they were written to
    pub async fn fetched(&self) -> Vec<(String, PathBuf)> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactFetcher for MockArtifactFetcher {
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ArtifactError> {
        if let Some(status) = *self.fail_status.lock().await {
            return Err(ArtifactError::Status {
                url: url.to_string(),
                status,
            });
        }
        let path = dir.join(ARCHIVE_FILE_NAME);
        tokio::fs::write(&path, url.as_bytes()).await?;
        self.fetched.lock().await.push((url.to_string(), path.clone()));
        Ok(path)
    }
}

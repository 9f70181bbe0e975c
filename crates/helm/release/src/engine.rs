//! Release engine
//!
//! Decides and runs the package-manager actions of one pass. Everything
//! from the workspace to the final deployed-revision read happens while the
//! release lock is held.

use crate::action::{
    ActionError, ActionKind, ActionSessionFactory, ChartArchive, InstallOptions, RollbackOptions,
    TestOptions, UninstallOptions, UpgradeOptions,
};
use crate::artifact::{ArtifactFetcher, Workspace};
use crate::lock::ReleaseLock;
use crate::status::{ActionResult, PassOutcome};
use helm_types::{Artifact, Reason, ReconcileStatus, ReleaseDesired, ReleaseRecord};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What the package manager reports relative to the desired state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedState {
    NoRelease,
    /// Deployed chart version differs from the artifact, or the release is
    /// not in `deployed` state
    DeployedStale,
    DeployedCurrent,
    /// The previous pass recorded failures
    DeployedFailing,
}

impl ObservedState {
    pub fn classify(
        status: &ReconcileStatus,
        artifact_revision: &str,
        deployed: Option<&ReleaseRecord>,
    ) -> Self {
        match deployed {
            None => ObservedState::NoRelease,
            Some(_) if status.failures > 0 => ObservedState::DeployedFailing,
            Some(release)
                if release.chart_version != artifact_revision || !release.is_deployed() =>
            {
                ObservedState::DeployedStale
            }
            Some(_) => ObservedState::DeployedCurrent,
        }
    }

    pub fn requires_upgrade(&self) -> bool {
        matches!(self, ObservedState::DeployedStale | ObservedState::DeployedFailing)
    }
}

pub struct ReleaseEngine {
    lock: Arc<dyn ReleaseLock>,
    fetcher: Arc<dyn ArtifactFetcher>,
    sessions: Arc<dyn ActionSessionFactory>,
}

impl ReleaseEngine {
    pub fn new(
        lock: Arc<dyn ReleaseLock>,
        fetcher: Arc<dyn ArtifactFetcher>,
        sessions: Arc<dyn ActionSessionFactory>,
    ) -> Self {
        Self {
            lock,
            fetcher,
            sessions,
        }
    }

    /// Revision to roll back to, if this pass is eligible for a rollback.
    ///
    /// The target is always the last released revision from `status`.
    pub fn rollback_target(
        desired: &ReleaseDesired,
        status: &ReconcileStatus,
        current_revision: Option<u32>,
        test_failed: bool,
        upgrade_failed: bool,
    ) -> Option<u32> {
        let policy = &desired.rollback;
        if !policy.enable {
            return None;
        }

        let threshold_reached =
            upgrade_failed && status.failures.saturating_add(1) >= policy.failure_threshold;
        if !test_failed && !threshold_reached {
            return None;
        }

        let known_good = status.last_released_revision;
        if known_good == 0 {
            return None;
        }
        if upgrade_failed {
            return Some(known_good);
        }
        match current_revision {
            Some(current) if current > known_good => Some(known_good),
            _ => None,
        }
    }

    /// Run one pass for `artifact` under the release lock
    #[instrument(skip_all, fields(release = %desired.identity, revision = %artifact.revision))]
    pub async fn run(
        &self,
        desired: &ReleaseDesired,
        status: &ReconcileStatus,
        artifact: &Artifact,
    ) -> PassOutcome {
        let key = desired.identity.lock_key();
        let handle = match self.lock.acquire(&key).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    key = %key,
                    lock = self.lock.name(),
                    error = %e,
                    "Failed to acquire release lock"
                );
                return PassOutcome::aborted(Reason::LockFailed, e.to_string());
            }
        };

        let outcome = self.run_locked(desired, status, artifact).await;

        if let Err(e) = handle.release() {
            warn!(key = %key, error = %e, "Failed to release lock");
        }
        outcome
    }

    async fn run_locked(
        &self,
        desired: &ReleaseDesired,
        status: &ReconcileStatus,
        artifact: &Artifact,
    ) -> PassOutcome {
        let release_name = desired.release_name();

        let workspace = match Workspace::create(&desired.identity.name) {
            Ok(workspace) => workspace,
            Err(e) => return PassOutcome::aborted(Reason::ArtifactFailed, e.to_string()),
        };

        let archive = match self.fetcher.fetch(&artifact.url, workspace.path()).await {
            Ok(path) => ChartArchive {
                path,
                chart_name: desired.chart.chart.clone(),
                revision: artifact.revision.clone(),
            },
            Err(e) => {
                return PassOutcome::aborted(
                    Reason::ArtifactFailed,
                    format!("artifact acquisition failed: {}", e),
                )
            }
        };

        let actions = match self.sessions.session(desired).await {
            Ok(actions) => actions,
            Err(e) => {
                return PassOutcome::aborted(
                    Reason::InitFailed,
                    format!("failed to initialize Helm action configuration: {}", e),
                )
            }
        };

        let deployed = match actions.deployed(release_name).await {
            Ok(deployed) => deployed,
            Err(e) => {
                return PassOutcome::aborted(
                    Reason::InitFailed,
                    format!("failed to determine if release exists: {}", e),
                )
            }
        };

        let mut outcome = PassOutcome::default();

        if desired.is_deletion_requested() {
            debug!("Deletion requested, skipping release actions");
        } else {
            let observed = ObservedState::classify(status, &artifact.revision, deployed.as_ref());
            let mut current = deployed.as_ref().map(|r| r.revision);
            debug!(observed = ?observed, "Classified release");

            let released = match observed {
                ObservedState::NoRelease => Some((
                    ActionKind::Install,
                    actions
                        .install(&archive, &desired.values, &InstallOptions::from_desired(desired))
                        .await,
                )),
                ObservedState::DeployedStale | ObservedState::DeployedFailing => Some((
                    ActionKind::Upgrade,
                    actions
                        .upgrade(
                            release_name,
                            &archive,
                            &desired.values,
                            &UpgradeOptions::from_desired(desired),
                        )
                        .await,
                )),
                ObservedState::DeployedCurrent => None,
            };
            if let Some((kind, result)) = released {
                if let Some(revision) = Self::record(&mut outcome, kind, result) {
                    current = Some(revision);
                }
            }

            if desired.test.enable {
                let result = actions.test(release_name, &TestOptions::from_desired(desired)).await;
                if let Some(revision) = Self::record(&mut outcome, ActionKind::Test, result) {
                    current = Some(revision);
                }
            }

            let target = Self::rollback_target(
                desired,
                status,
                current,
                outcome.failed(ActionKind::Test),
                outcome.failed(ActionKind::Upgrade),
            );
            if let Some(target) = target {
                info!(target_revision = target, "Rolling back to last released revision");
                let result = actions
                    .rollback(release_name, &RollbackOptions::from_desired(desired, target))
                    .await;
                Self::record(&mut outcome, ActionKind::Rollback, result);
            }
        }

        outcome.observed_revision = match actions.deployed(release_name).await {
            Ok(deployed) => deployed.map(|r| r.revision),
            Err(e) => {
                warn!(error = %e, "Failed to read deployed release after actions");
                None
            }
        };

        if desired.is_deletion_requested() && outcome.observed_revision.is_some() {
            let result = actions
                .uninstall(release_name, &UninstallOptions::from_desired(desired))
                .await;
            Self::record(&mut outcome, ActionKind::Uninstall, result);
        }

        outcome
    }

    fn record(
        outcome: &mut PassOutcome,
        kind: ActionKind,
        result: Result<ReleaseRecord, ActionError>,
    ) -> Option<u32> {
        match result {
            Ok(release) => {
                info!(
                    action = %kind,
                    release_revision = release.revision,
                    "{}",
                    kind.success_message()
                );
                outcome.actions.push(ActionResult::succeeded(kind));
                Some(release.revision)
            }
            Err(e) => {
                warn!(
                    action = %kind,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Helm action failed"
                );
                outcome.actions.push(ActionResult::failed(kind, &e));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{InProcessReleaseLock, LockError, LockHandle};
    use crate::mock::{MockArtifactFetcher, MockPackageActions, MockSessionFactory};
    use async_trait::async_trait;
    use helm_types::{ChartTemplate, ReleaseIdentity, SourceReference};
    use std::time::Duration;

    struct Harness {
        engine: ReleaseEngine,
        actions: Arc<MockPackageActions>,
        sessions: Arc<MockSessionFactory>,
        fetcher: Arc<MockArtifactFetcher>,
    }

    async fn harness(seed: Option<ReleaseRecord>) -> Harness {
        let mut actions = MockPackageActions::new();
        if let Some(record) = seed {
            actions = actions.with_release(record).await;
        }
        let actions = Arc::new(actions);
        let sessions = Arc::new(MockSessionFactory::new(actions.clone()));
        let fetcher = Arc::new(MockArtifactFetcher::new());
        let engine = ReleaseEngine::new(
            Arc::new(InProcessReleaseLock::new()),
            fetcher.clone(),
            sessions.clone(),
        );
        Harness {
            engine,
            actions,
            sessions,
            fetcher,
        }
    }

    fn desired() -> ReleaseDesired {
        ReleaseDesired::new(
            ReleaseIdentity::new("apps", "web"),
            ChartTemplate::new("web", "*", SourceReference::repository("charts")),
        )
    }

    fn artifact(revision: &str) -> Artifact {
        Artifact::new(format!("http://source/web-{}.tgz", revision), revision)
    }

    fn deployed(revision: u32, version: &str) -> ReleaseRecord {
        ReleaseRecord::new("web", "apps", revision, "web", version)
    }

    fn released(revision: u32) -> ReconcileStatus {
        ReconcileStatus {
            last_released_revision: revision,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_installs_when_nothing_deployed() {
        let h = harness(None).await;
        let outcome = h
            .engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;

        assert!(outcome.is_success());
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Install]);
        assert_eq!(outcome.observed_revision, Some(1));
    }

    #[tokio::test]
    async fn test_steady_state_takes_no_action() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let outcome = h.engine.run(&desired(), &released(1), &artifact("1.0.0")).await;

        assert!(outcome.is_success());
        assert!(outcome.actions.is_empty());
        assert!(h.actions.calls().await.is_empty());
        assert_eq!(outcome.observed_revision, Some(1));
    }

    #[tokio::test]
    async fn test_upgrades_to_new_revision() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let outcome = h.engine.run(&desired(), &released(1), &artifact("2.0.0")).await;

        assert!(outcome.succeeded(ActionKind::Upgrade));
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Upgrade]);
        assert_eq!(outcome.observed_revision, Some(2));
    }

    #[tokio::test]
    async fn test_upgrades_after_previous_failure() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let mut status = released(1);
        status.failures = 1;

        h.engine.run(&desired(), &status, &artifact("1.0.0")).await;
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Upgrade]);
    }

    #[test]
    fn test_upgrades_release_not_in_deployed_state() {
        let status = released(1);
        let stale = deployed(1, "1.0.0").with_state(helm_types::ReleaseState::PendingUpgrade);
        assert_eq!(
            ObservedState::classify(&status, "1.0.0", Some(&stale)),
            ObservedState::DeployedStale
        );
        assert_eq!(
            ObservedState::classify(&status, "1.0.0", Some(&deployed(1, "1.0.0"))),
            ObservedState::DeployedCurrent
        );
        assert_eq!(
            ObservedState::classify(&status, "1.0.0", None),
            ObservedState::NoRelease
        );
    }

    #[tokio::test]
    async fn test_test_runs_even_when_upgrade_fails() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Upgrade, ActionError::Failed("hook failed".into()))
            .await;
        let mut desired = desired();
        desired.test.enable = true;

        let outcome = h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;
        assert!(!outcome.is_success());
        assert_eq!(
            h.actions.call_kinds().await,
            vec![ActionKind::Upgrade, ActionKind::Test]
        );
        assert_eq!(outcome.observed_revision, Some(1));
    }

    #[tokio::test]
    async fn test_rolls_back_to_last_released_after_failed_test() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Test, ActionError::Failed("test pod failed".into()))
            .await;
        let mut desired = desired();
        desired.test.enable = true;
        desired.rollback.enable = true;

        let outcome = h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;

        assert_eq!(
            h.actions.call_kinds().await,
            vec![ActionKind::Upgrade, ActionKind::Test, ActionKind::Rollback]
        );
        let calls = h.actions.calls().await;
        assert_eq!(calls[2].target_revision, Some(1));
        assert!(outcome.succeeded(ActionKind::Rollback));
        assert!(!outcome.is_success());
        assert_eq!(outcome.observed_revision, Some(3));

        let history = h.actions.history().await;
        let restored = history.iter().find(|r| r.revision == 3).unwrap();
        assert!(restored.is_deployed());
        assert_eq!(restored.chart_version, "1.0.0");
    }

    #[tokio::test]
    async fn test_failed_rollback_is_recorded() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Test, ActionError::Failed("test pod failed".into()))
            .await;
        h.actions
            .fail(ActionKind::Rollback, ActionError::Failed("release has no 1 version".into()))
            .await;
        let mut desired = desired();
        desired.test.enable = true;
        desired.rollback.enable = true;

        let outcome = h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;

        assert!(outcome.failed(ActionKind::Rollback));
        assert!(outcome.failed(ActionKind::Test));
        assert!(outcome.succeeded(ActionKind::Upgrade));
        // The upgraded revision stays deployed
        assert_eq!(outcome.observed_revision, Some(2));
        assert_eq!(h.actions.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_steady_state_runs_tests_only() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let mut desired = desired();
        desired.test.enable = true;

        let outcome = h.engine.run(&desired, &released(1), &artifact("1.0.0")).await;

        assert!(outcome.is_success());
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Test]);
        assert_eq!(outcome.observed_revision, Some(1));
    }

    #[tokio::test]
    async fn test_rollback_waits_for_failure_threshold() {
        let mut desired = desired();
        desired.rollback.enable = true;
        desired.rollback.failure_threshold = 2;

        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Upgrade, ActionError::Failed("timed out waiting".into()))
            .await;
        h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Upgrade]);

        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Upgrade, ActionError::Failed("timed out waiting".into()))
            .await;
        let mut status = released(1);
        status.failures = 1;
        h.engine.run(&desired, &status, &artifact("2.0.0")).await;

        let calls = h.actions.calls().await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].kind, ActionKind::Rollback);
        assert_eq!(calls[1].target_revision, Some(1));
    }

    #[test]
    fn test_rollback_target_requires_known_good_revision() {
        let mut desired = desired();
        desired.rollback.enable = true;

        assert_eq!(
            ReleaseEngine::rollback_target(&desired, &released(0), Some(2), true, false),
            None
        );
        assert_eq!(
            ReleaseEngine::rollback_target(&desired, &released(2), Some(2), true, false),
            None
        );
        assert_eq!(
            ReleaseEngine::rollback_target(&desired, &released(2), Some(3), true, false),
            Some(2)
        );
        assert_eq!(
            ReleaseEngine::rollback_target(&desired, &released(2), Some(3), false, false),
            None
        );

        desired.rollback.enable = false;
        assert_eq!(
            ReleaseEngine::rollback_target(&desired, &released(2), Some(3), true, true),
            None
        );
    }

    #[tokio::test]
    async fn test_uninstalls_when_deletion_requested() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let mut desired = desired();
        desired.deletion_requested_at = Some(chrono::Utc::now());
        desired.test.enable = true;

        let outcome = h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;
        assert!(outcome.is_success());
        assert_eq!(h.actions.call_kinds().await, vec![ActionKind::Uninstall]);

        let h = harness(None).await;
        let outcome = h.engine.run(&desired, &released(0), &artifact("2.0.0")).await;
        assert!(outcome.actions.is_empty());
    }

    #[tokio::test]
    async fn test_failed_uninstall_keeps_release() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        h.actions
            .fail(ActionKind::Uninstall, ActionError::Failed("hook timed out".into()))
            .await;
        let mut desired = desired();
        desired.deletion_requested_at = Some(chrono::Utc::now());

        let outcome = h.engine.run(&desired, &released(1), &artifact("1.0.0")).await;

        assert!(outcome.failed(ActionKind::Uninstall));
        assert_eq!(outcome.observed_revision, Some(1));
        assert!(h.actions.history().await[0].is_deployed());
    }

    #[tokio::test]
    async fn test_action_timeouts_are_passed_through() {
        let h = harness(Some(deployed(1, "1.0.0"))).await;
        let mut desired = desired();
        desired.timeout = Some(Duration::from_secs(120));
        desired.upgrade.timeout = Some(Duration::from_secs(42));
        desired.test.enable = true;

        h.engine.run(&desired, &released(1), &artifact("2.0.0")).await;
        let calls = h.actions.calls().await;
        assert_eq!(calls[0].timeout, Duration::from_secs(42));
        assert_eq!(calls[1].timeout, Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_timed_out_action_is_retryable_failure() {
        let h = harness(None).await;
        h.actions
            .fail(
                ActionKind::Install,
                ActionError::Timeout {
                    action: ActionKind::Install,
                    timeout: Duration::from_secs(300),
                },
            )
            .await;

        let outcome = h
            .engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;
        let install = outcome.result(ActionKind::Install).unwrap();
        assert!(!install.is_success());
        assert!(install.retryable);
        assert_eq!(outcome.observed_revision, None);
    }

    #[tokio::test]
    async fn test_artifact_failure_aborts_before_actions() {
        let h = harness(None).await;
        h.fetcher.fail_with_status(404).await;

        let outcome = h
            .engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;
        let abort = outcome.abort.unwrap();
        assert_eq!(abort.reason, Reason::ArtifactFailed);
        assert!(abort.message.starts_with("artifact acquisition failed"));
        assert!(h.actions.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_init_failures_abort() {
        let h = harness(None).await;
        h.sessions.fail_init(ActionError::Init("no cluster".into())).await;
        let outcome = h
            .engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;
        assert_eq!(outcome.abort.unwrap().reason, Reason::InitFailed);

        let h = harness(None).await;
        h.actions
            .fail_deployed(ActionError::Storage("secrets is forbidden".into()))
            .await;
        let outcome = h
            .engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;
        let abort = outcome.abort.unwrap();
        assert_eq!(abort.reason, Reason::InitFailed);
        assert!(abort.message.starts_with("failed to determine if release exists"));
    }

    #[tokio::test]
    async fn test_workspace_removed_after_pass() {
        let h = harness(None).await;
        h.engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;

        let fetched = h.fetcher.fetched().await;
        assert_eq!(fetched.len(), 1);
        assert!(!fetched[0].1.exists());
    }

    struct UnavailableLock;

    #[async_trait]
    impl ReleaseLock for UnavailableLock {
        async fn acquire(&self, _key: &str) -> Result<LockHandle, LockError> {
            Err(LockError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )))
        }

        fn name(&self) -> &str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn test_lock_failure_aborts() {
        let actions = Arc::new(MockPackageActions::new());
        let engine = ReleaseEngine::new(
            Arc::new(UnavailableLock),
            Arc::new(MockArtifactFetcher::new()),
            Arc::new(MockSessionFactory::new(actions.clone())),
        );

        let outcome = engine
            .run(&desired(), &ReconcileStatus::default(), &artifact("1.0.0"))
            .await;
        assert_eq!(outcome.abort.unwrap().reason, Reason::LockFailed);
        assert!(actions.calls().await.is_empty());
    }
}

//! Reconciliation scheduler
//!
//! Runs passes on a bounded pool of workers. At most one pass per release
//! identity is in flight; enqueues that arrive meanwhile are coalesced into
//! a single rerun once the pass returns. Requeue delays reported by a pass
//! are honored unless a newer enqueue supersedes them. A pass that fails on
//! a status-write conflict is retried after the conflict delay; any other
//! failure waits for the error delay.

use crate::config::SchedulerConfig;
use async_trait::async_trait;
use helm_release::{ReconcileOutcome, ReconcileResult, Reconciler};
use helm_types::ReleaseIdentity;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// A single reconciliation pass for one release
#[async_trait]
pub trait ReconcilePass: Send + Sync {
    async fn reconcile(
        &self,
        identity: &ReleaseIdentity,
    ) -> helm_release::Result<ReconcileResult>;
}

#[async_trait]
impl ReconcilePass for Reconciler {
    async fn reconcile(
        &self,
        identity: &ReleaseIdentity,
    ) -> helm_release::Result<ReconcileResult> {
        Reconciler::reconcile(self, identity).await
    }
}

#[derive(Debug, Default)]
struct Slot {
    in_flight: bool,
    /// Enqueued again while in flight
    dirty: bool,
    /// Bumped whenever a pending delayed requeue becomes stale
    timer: u64,
}

/// Scheduler state
pub struct Scheduler {
    pass: Arc<dyn ReconcilePass>,
    max_concurrent: usize,
    conflict_requeue_delay: Duration,
    error_requeue_delay: Duration,
    queue_tx: mpsc::UnboundedSender<ReleaseIdentity>,
    slots: Mutex<HashMap<ReleaseIdentity, Slot>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a new scheduler and the queue it consumes
    pub fn new(
        pass: Arc<dyn ReconcilePass>,
        config: &SchedulerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ReleaseIdentity>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let scheduler = Arc::new(Self {
            pass,
            max_concurrent: config.max_concurrent_reconciles.max(1),
            conflict_requeue_delay: config.conflict_requeue_delay(),
            error_requeue_delay: config.error_requeue_delay(),
            queue_tx,
            slots: Mutex::new(HashMap::new()),
            shutdown_tx,
        });

        (scheduler, queue_rx)
    }

    /// Request a pass for a release
    pub fn enqueue(&self, identity: ReleaseIdentity) {
        let _ = self.queue_tx.send(identity);
    }

    pub async fn is_in_flight(&self, identity: &ReleaseIdentity) -> bool {
        self.slots
            .lock()
            .await
            .get(identity)
            .map(|slot| slot.in_flight)
            .unwrap_or(false)
    }

    /// Process the queue until [`Scheduler::stop`] is called.
    ///
    /// Returns once every in-flight pass has finished.
    pub async fn start(
        self: Arc<Self>,
        mut queue_rx: mpsc::UnboundedReceiver<ReleaseIdentity>,
    ) {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!(max_concurrent = self.max_concurrent, "Scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                received = queue_rx.recv() => {
                    let Some(identity) = received else { break };

                    if !self.claim(&identity).await {
                        debug!(release = %identity, "Pass in flight, coalescing");
                        continue;
                    }

                    let permit = match permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let scheduler = self.clone();
                    tokio::spawn(async move {
                        scheduler.run_pass(identity, permit).await;
                    });
                }
            }
        }

        // Drain in-flight passes
        let _ = permits.acquire_many(self.max_concurrent as u32).await;
        info!("Scheduler stopped");
    }

    /// Stop taking new passes
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn claim(&self, identity: &ReleaseIdentity) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(identity.clone()).or_default();
        if slot.in_flight {
            slot.dirty = true;
            return false;
        }
        slot.in_flight = true;
        slot.timer += 1;
        true
    }

    async fn run_pass(self: Arc<Self>, identity: ReleaseIdentity, permit: OwnedSemaphorePermit) {
        let result = self.pass.reconcile(&identity).await;
        drop(permit);

        let (requeue_after, gone) = match result {
            Ok(result) => (
                result.requeue_after,
                result.outcome == ReconcileOutcome::NotFound,
            ),
            Err(e) if e.is_conflict() => {
                debug!(release = %identity, error = %e, "Status write conflicted, retrying");
                (Some(self.conflict_requeue_delay), false)
            }
            Err(e) => {
                error!(
                    release = %identity,
                    retry_in = ?self.error_requeue_delay,
                    error = %e,
                    "Reconciliation failed"
                );
                (Some(self.error_requeue_delay), false)
            }
        };

        let (dirty, token) = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(&identity) {
                Some(slot) => {
                    slot.in_flight = false;
                    slot.timer += 1;
                    let dirty = std::mem::take(&mut slot.dirty);
                    if gone && !dirty {
                        slots.remove(&identity);
                        return;
                    }
                    (dirty, slot.timer)
                }
                None => return,
            }
        };

        if dirty {
            self.enqueue(identity);
        } else if let Some(delay) = requeue_after {
            self.schedule(identity, delay, token);
        }
    }

    fn schedule(self: &Arc<Self>, identity: ReleaseIdentity, delay: Duration, token: u64) {
        if delay.is_zero() {
            self.enqueue(identity);
            return;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = scheduler
                .slots
                .lock()
                .await
                .get(&identity)
                .map(|slot| slot.timer);
            if current == Some(token) {
                scheduler.enqueue(identity);
            }
        });
    }
}

//! Reconcile poller
//!
//! Lists releases and test jobs every poll interval, dispatches the ones
//! the work queue reports ready, and sweeps orphaned workers. Each
//! reconcile runs in its own task; a semaphore bounds how many run at once.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::reconciler::{ReconcileError, Reconciled, ReleaseReconciler, TestJobReconciler};
use crate::repository::{JobRepository, ReleaseRepository};
use crate::scheduler::queue::{ObjectKind, QueueKey, WorkQueue};
use crate::service::OrphanSweeper;

/// Everything a dispatched reconcile needs
struct Reconcilers {
    jobs: TestJobReconciler,
    releases: ReleaseReconciler,
}

pub struct ReconcilePoller {
    config: Config,
    jobs: Arc<dyn JobRepository>,
    releases: Arc<dyn ReleaseRepository>,
    reconcilers: Arc<Reconcilers>,
    sweeper: OrphanSweeper,
    queue: Arc<Mutex<WorkQueue>>,
    semaphore: Arc<Semaphore>,
}

impl ReconcilePoller {
    pub fn new(
        config: Config,
        jobs: Arc<dyn JobRepository>,
        releases: Arc<dyn ReleaseRepository>,
        job_reconciler: TestJobReconciler,
        release_reconciler: ReleaseReconciler,
        sweeper: OrphanSweeper,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_reconciles));
        Self {
            config,
            jobs,
            releases,
            reconcilers: Arc::new(Reconcilers {
                jobs: job_reconciler,
                releases: release_reconciler,
            }),
            sweeper,
            queue: Arc::new(Mutex::new(WorkQueue::new())),
            semaphore,
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting reconcile poller (interval: {:?}, parallelism: {})",
            self.config.poll_interval, self.config.max_parallel_reconciles
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            match self.poll_once().await {
                Ok(dispatched) => {
                    if dispatched > 0 {
                        debug!("Dispatched {} reconcile(s) this cycle", dispatched);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Performs a single poll cycle and returns the number of dispatched reconciles
    pub async fn poll_once(&self) -> Result<usize> {
        let releases = self
            .releases
            .list()
            .await
            .context("Failed to list releases")?;
        let jobs = self.jobs.list().await.context("Failed to list test jobs")?;

        let now = Instant::now();
        let mut listed = HashSet::new();
        let mut ready = Vec::new();
        {
            let mut queue = self.queue.lock().await;

            let observed = releases
                .iter()
                .map(|r| (QueueKey::release(r.metadata.key()), r.metadata.resource_version))
                .chain(
                    jobs.iter()
                        .map(|j| (QueueKey::test_job(j.metadata.key()), j.metadata.resource_version)),
                );

            for (key, resource_version) in observed {
                if queue.observe(&key, resource_version, now) {
                    ready.push(key.clone());
                }
                listed.insert(key);
            }

            queue.retain_listed(&listed);
            debug!("Tracking {} object(s), {} ready", queue.tracked(), ready.len());
        }

        let owners: HashSet<_> = jobs.iter().map(|j| j.metadata.uid).collect();
        if let Err(e) = self.sweeper.sweep(&owners).await {
            warn!("Orphan sweep failed: {}", e);
        }

        let mut dispatched = 0;
        for key in ready {
            // Try to acquire semaphore permit, skip if at max capacity
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                debug!("Max parallel reconciles reached, deferring {}", key);
                continue;
            };

            self.queue.lock().await.start(&key);
            self.spawn_reconcile(key, permit);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Spawns a task reconciling `key`; the permit is held until it finishes
    ///
    /// The reconcile itself runs in a nested task so a panic surfaces as a
    /// failed pass and the key is released for a retry.
    fn spawn_reconcile(&self, key: QueueKey, permit: OwnedSemaphorePermit) {
        let reconcilers = Arc::clone(&self.reconcilers);
        let queue = Arc::clone(&self.queue);

        tokio::spawn(async move {
            let _permit = permit;
            let task_key = key.clone();
            let task = tokio::spawn(async move { Self::reconcile(&reconcilers, &task_key).await });
            let result = task.await;

            let mut queue = queue.lock().await;
            match result {
                Ok(Ok(reconciled)) => {
                    debug!("Reconciled {}: {:?}", key, reconciled.action);
                    queue.complete(&key, reconciled, Instant::now());
                }
                Ok(Err(e)) => {
                    let delay = queue.fail(&key, Instant::now());
                    error!("Failed to reconcile {} (retry in {:?}): {}", key, delay, e);
                }
                Err(e) => {
                    let delay = queue.fail(&key, Instant::now());
                    error!("Reconcile of {} panicked (retry in {:?}): {}", key, delay, e);
                }
            }
        });
    }

    async fn reconcile(
        reconcilers: &Reconcilers,
        key: &QueueKey,
    ) -> Result<Reconciled, ReconcileError> {
        let now = Utc::now();
        match key.kind {
            ObjectKind::Release => reconcilers.releases.reconcile(&key.key, now).await,
            ObjectKind::TestJob => reconcilers.jobs.reconcile(&key.key, now).await,
        }
    }
}

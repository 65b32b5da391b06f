//! Orphan sweep
//!
//! Workers carry their owning job's uid as a label. A worker whose uid
//! matches no stored test job belongs to a deleted job and is removed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::worker::{WorkerError, WorkerRuntime};

pub struct OrphanSweeper {
    workers: Arc<dyn WorkerRuntime>,
}

impl OrphanSweeper {
    pub fn new(workers: Arc<dyn WorkerRuntime>) -> Self {
        Self { workers }
    }

    /// Deletes managed workers not owned by any of `live_owners`
    ///
    /// `live_owners` must be listed before this call so a job created in
    /// between cannot have workers yet. Returns the number of workers removed.
    pub async fn sweep(&self, live_owners: &HashSet<Uuid>) -> Result<usize, WorkerError> {
        let workers = self.workers.list_managed().await?;
        let mut removed = 0;

        for worker in workers {
            let owner = worker.owner_uid().and_then(|uid| Uuid::parse_str(uid).ok());
            if owner.is_some_and(|uid| live_owners.contains(&uid)) {
                continue;
            }

            debug!(
                "Worker {}/{} has no live owner ({:?})",
                worker.namespace,
                worker.name,
                worker.owner_uid()
            );

            match self.workers.delete(&worker.namespace, &worker.name).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    "Failed to remove orphaned worker {}/{}: {}",
                    worker.namespace, worker.name, e
                ),
            }
        }

        if removed > 0 {
            info!("Removed {} orphaned worker(s)", removed);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWorkers, WorkerBehavior, sample_unit};
    use canary_core::domain::worker::{OWNER_UID_LABEL, WorkerStatus};

    #[tokio::test]
    async fn test_sweep_removes_orphans_only() {
        let workers = Arc::new(FakeWorkers::new(WorkerBehavior::StayPending));

        let live = sample_unit("nightly-once-test");
        let orphan = sample_unit("gone-once-test");
        let mut unlabeled = sample_unit("broken-once-test");
        unlabeled.labels.remove(OWNER_UID_LABEL);

        for unit in [&live, &orphan, &unlabeled] {
            workers.insert_existing(unit, WorkerStatus::default());
        }

        let sweeper = OrphanSweeper::new(workers.clone());
        let owners = HashSet::from([live.owner.uid]);

        let removed = sweeper.sweep(&owners).await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(workers.names(), vec!["nightly-once-test"]);
        let mut deleted = workers.deleted();
        deleted.sort();
        assert_eq!(deleted, vec!["broken-once-test", "gone-once-test"]);
    }

    #[tokio::test]
    async fn test_sweep_with_no_workers() {
        let workers = Arc::new(FakeWorkers::new(WorkerBehavior::StayPending));
        let sweeper = OrphanSweeper::new(workers);
        assert_eq!(sweeper.sweep(&HashSet::new()).await.unwrap(), 0);
    }
}

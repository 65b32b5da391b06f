//! Lookup-or-create of workers

use canary_core::domain::test_job::JobPhase;
use canary_core::domain::worker::{ConditionKind, WorkerRecord, WorkerStatus, WorkerUnit};
use tracing::{debug, info};

use crate::worker::{WorkerError, WorkerRuntime};

/// A worker as seen by one evaluation
#[derive(Debug, Clone)]
pub struct ObservedWorker {
    pub phase: JobPhase,
    pub message: String,
    pub record: WorkerRecord,
    /// This evaluation created the worker
    pub created: bool,
}

/// Returns the worker named by `unit`, creating it if it does not exist
///
/// Calling this again with the same unit never creates a second worker:
/// the name is the identity. A create that loses a race falls back to a
/// fresh lookup.
pub async fn ensure_worker(
    runtime: &dyn WorkerRuntime,
    unit: &WorkerUnit,
) -> Result<ObservedWorker, WorkerError> {
    if let Some(record) = runtime.get(&unit.namespace, &unit.name).await? {
        debug!("Worker {}/{} already exists", unit.namespace, unit.name);
        return Ok(observe(record, false));
    }

    match runtime.create(unit).await {
        Ok(record) => {
            info!("Created worker {}/{}", unit.namespace, unit.name);
            Ok(observe(record, true))
        }
        Err(WorkerError::AlreadyExists(_)) => {
            debug!("Worker {}/{} appeared concurrently", unit.namespace, unit.name);
            let record = runtime
                .get(&unit.namespace, &unit.name)
                .await?
                .ok_or_else(|| WorkerError::Command(format!("worker {} vanished", unit.name)))?;
            Ok(observe(record, false))
        }
        Err(e) => Err(e),
    }
}

fn observe(record: WorkerRecord, created: bool) -> ObservedWorker {
    let (phase, mut message) = derive_phase(&record.status);
    if created && phase == JobPhase::Pending {
        message = "worker created".to_string();
    }
    ObservedWorker {
        phase,
        message,
        record,
        created,
    }
}

/// Maps runtime conditions onto a job phase
///
/// A true failure condition wins over a completion condition; otherwise
/// an active container means Running and anything else Pending.
pub fn derive_phase(status: &WorkerStatus) -> (JobPhase, String) {
    let holds = |kind: ConditionKind| {
        status
            .conditions
            .iter()
            .find(|c| c.kind == kind && c.status)
    };

    if let Some(failed) = holds(ConditionKind::Failed) {
        let message = if failed.message.is_empty() {
            "worker failed".to_string()
        } else {
            format!("worker failed: {}", failed.message)
        };
        return (JobPhase::Failed, message);
    }

    if holds(ConditionKind::Complete).is_some() {
        return (JobPhase::Succeeded, "worker succeeded".to_string());
    }

    if status.active > 0 {
        return (JobPhase::Running, "worker running".to_string());
    }

    (JobPhase::Pending, "worker pending".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeWorkers, WorkerBehavior, sample_unit};
    use canary_core::domain::worker::WorkerCondition;

    #[test]
    fn test_derive_phase() {
        let mut status = WorkerStatus::default();
        assert_eq!(derive_phase(&status).0, JobPhase::Pending);

        status.active = 1;
        assert_eq!(derive_phase(&status).0, JobPhase::Running);

        status.conditions.push(WorkerCondition::complete());
        assert_eq!(derive_phase(&status).0, JobPhase::Succeeded);

        status.conditions.push(WorkerCondition::failed("exit code 3"));
        let (phase, message) = derive_phase(&status);
        assert_eq!(phase, JobPhase::Failed);
        assert_eq!(message, "worker failed: exit code 3");
    }

    #[test]
    fn test_false_conditions_are_ignored() {
        let mut failed = WorkerCondition::failed("boom");
        failed.status = false;
        let status = WorkerStatus {
            conditions: vec![failed],
            active: 0,
            ..Default::default()
        };
        assert_eq!(derive_phase(&status).0, JobPhase::Pending);
    }

    #[tokio::test]
    async fn test_ensure_worker_is_idempotent() {
        let workers = FakeWorkers::new(WorkerBehavior::StayPending);
        let unit = sample_unit("nightly-once-pre-0");

        let first = ensure_worker(&workers, &unit).await.unwrap();
        assert!(first.created);
        assert_eq!(first.phase, JobPhase::Pending);
        assert_eq!(first.message, "worker created");

        let second = ensure_worker(&workers, &unit).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.message, "worker pending");

        assert_eq!(workers.create_count(), 1);
        assert_eq!(workers.names(), vec!["nightly-once-pre-0".to_string()]);
    }

    #[tokio::test]
    async fn test_phase_comes_from_created_record() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        let observed = ensure_worker(&workers, &sample_unit("nightly-once-test"))
            .await
            .unwrap();
        assert!(observed.created);
        assert_eq!(observed.phase, JobPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_lost_create_race_reads_back() {
        let workers = FakeWorkers::new(WorkerBehavior::StayPending);
        workers.hide_next_get();
        let unit = sample_unit("nightly-once-test");
        workers.insert_existing(&unit, WorkerStatus::default());

        let observed = ensure_worker(&workers, &unit).await.unwrap();
        assert!(!observed.created);
        assert_eq!(workers.create_count(), 1);
        assert_eq!(workers.names().len(), 1);
    }

    #[tokio::test]
    async fn test_runtime_errors_propagate() {
        let workers = FakeWorkers::new(WorkerBehavior::RejectCreate);
        let result = ensure_worker(&workers, &sample_unit("nightly-once-test")).await;
        assert!(matches!(result, Err(WorkerError::Command(_))));
    }
}

//! Test job reconciler
//!
//! One pass: load the job, decide whether a run is due, drive the stage
//! machine as far as it goes without waiting, persist the status with a
//! compare-and-swap and return a requeue hint.

use std::sync::Arc;
use std::time::Duration;

use canary_core::domain::meta::ObjectKey;
use canary_core::domain::release::Release;
use canary_core::domain::test_job::{JobPhase, ScheduleKind, TestJob, TestJobStatus};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::reconciler::naming::{ONCE_RUN_KEY, run_key_for_firing};
use crate::reconciler::schedule::{CronSchedule, ScheduleError, compute_next_schedule};
use crate::reconciler::stage::{self, StepOutcome};
use crate::reconciler::template::RunContext;
use crate::reconciler::tracker::RunTracker;
use crate::reconciler::{Action, ReconcileError, Reconciled};
use crate::repository::{JobRepository, ReleaseRepository};
use crate::service::CleanupRunner;
use crate::worker::WorkerRuntime;

pub const MISSING_IMAGE_MESSAGE: &str =
    "missing test image: set spec.test.image or CANARY_JOB_IMAGE";

/// Process-wide knobs of the test job reconciler
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Worker image for jobs that do not name one
    pub default_image: Option<String>,
    /// Timezone for cron schedules without one
    pub default_timezone: Tz,
    /// Stage transitions per pass
    pub step_budget: usize,
    /// Requeue delay while waiting on a worker
    pub blocked_requeue: Duration,
    /// Log lines kept from a finished test worker
    pub log_tail: usize,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_image: None,
            default_timezone: Tz::UTC,
            step_budget: 4,
            blocked_requeue: Duration::from_secs(2),
            log_tail: 200,
        }
    }
}

/// Run that is due in this pass
struct DueRun {
    run_key: String,
}

pub struct TestJobReconciler {
    jobs: Arc<dyn JobRepository>,
    releases: Arc<dyn ReleaseRepository>,
    workers: Arc<dyn WorkerRuntime>,
    cleanup: Arc<dyn CleanupRunner>,
    settings: ReconcileSettings,
}

impl TestJobReconciler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        releases: Arc<dyn ReleaseRepository>,
        workers: Arc<dyn WorkerRuntime>,
        cleanup: Arc<dyn CleanupRunner>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            jobs,
            releases,
            workers,
            cleanup,
            settings,
        }
    }

    /// Reconciles the job stored under `key` as of `now`
    ///
    /// Status changes are written even when the pass fails, so the error
    /// is visible in `status.message` while the caller backs off.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, ReconcileError> {
        let Some(job) = self.jobs.get(key).await? else {
            debug!("Test job {} is gone", key);
            return Ok(Reconciled {
                action: Action::AwaitChange,
                resource_version: None,
            });
        };

        let mut status = job.status.clone();
        let result = self.evaluate(&job, &mut status, now).await;

        let resource_version = if status != job.status {
            match self
                .jobs
                .update_status(key, job.metadata.resource_version, &status)
                .await
            {
                Ok(stored) => stored.metadata.resource_version,
                Err(e) => {
                    if let Err(original) = result {
                        warn!("Failed to record error on {}: {}", key, e);
                        return Err(original);
                    }
                    return Err(e.into());
                }
            }
        } else {
            job.metadata.resource_version
        };

        let action = result?;
        debug!("Test job {} reconciled: {:?}", key, action);

        Ok(Reconciled {
            action,
            resource_version: Some(resource_version),
        })
    }

    async fn evaluate(
        &self,
        job: &TestJob,
        status: &mut TestJobStatus,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        if status.phase.is_none() {
            status.phase = Some(JobPhase::Pending);
        }

        let due = match self.check_due(job, status, now) {
            Ok(Ok(due)) => due,
            Ok(Err(action)) => return Ok(action),
            Err(e) => return Ok(fail_configuration(job, status, e.to_string(), now)),
        };

        if status.phase() != JobPhase::Running {
            info!(
                "Starting run {} of test job {}",
                due.run_key,
                job.metadata.key()
            );
            status.begin_run(now);
        }

        let image = if job.spec.test.image.is_empty() {
            self.settings.default_image.clone().unwrap_or_default()
        } else {
            job.spec.test.image.clone()
        };
        if image.is_empty() {
            return Ok(fail_configuration(job, status, MISSING_IMAGE_MESSAGE.to_string(), now));
        }

        let release_key = job.release_key();
        let Some(release) = self.releases.get(&release_key).await? else {
            status.message = format!("release {} not found", release_key);
            return Err(ReconcileError::ReleaseNotFound(release_key));
        };

        let mut view = job.clone();
        view.status = status.clone();
        let mut ctx = RunContext::new(&view, &release, &due.run_key, &image);

        let outcome = match stage::advance(
            self.workers.as_ref(),
            &mut ctx,
            status,
            self.settings.step_budget,
            self.settings.log_tail,
            now,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                status.message = format!("worker runtime error: {}", e);
                return Err(e.into());
            }
        };

        match outcome {
            StepOutcome::Blocked => Ok(Action::Requeue(self.settings.blocked_requeue)),
            StepOutcome::BudgetExhausted => Ok(Action::requeue_now()),
            StepOutcome::Finished => {
                info!(
                    "Run {} of test job {} finished: {}",
                    due.run_key,
                    job.metadata.key(),
                    status.phase()
                );
                match job.spec.schedule.kind {
                    ScheduleKind::Once => {
                        self.clean_up(job, &release, status).await;
                        Ok(Action::AwaitChange)
                    }
                    ScheduleKind::Cron => Ok(Action::Requeue(until(status.next_schedule_time, now))),
                }
            }
        }
    }

    /// Decides whether a run is due
    ///
    /// `Ok(Err(action))` means nothing is due and carries the requeue hint.
    /// A cron firing that is due is consumed here: it becomes
    /// `last_schedule_time` and the next firing is computed from it.
    fn check_due(
        &self,
        job: &TestJob,
        status: &mut TestJobStatus,
        now: DateTime<Utc>,
    ) -> Result<Result<DueRun, Action>, ScheduleError> {
        let schedule = &job.spec.schedule;
        let creation = job.metadata.creation_timestamp.unwrap_or(now);
        let tz = self.settings.default_timezone;

        let next = compute_next_schedule(
            now,
            creation,
            schedule,
            status.next_schedule_time,
            status.last_schedule_time,
            tz,
        )?;
        status.next_schedule_time = Some(next.next_time);

        match schedule.kind {
            ScheduleKind::Once => {
                if status.phase().is_terminal() {
                    return Ok(Err(Action::AwaitChange));
                }
                if now < next.next_time {
                    status.message.clear();
                    return Ok(Err(Action::Requeue(next.requeue_after)));
                }
                Ok(Ok(DueRun {
                    run_key: ONCE_RUN_KEY.to_string(),
                }))
            }
            ScheduleKind::Cron => {
                match (status.phase(), status.last_schedule_time) {
                    (JobPhase::Running, Some(firing)) => {
                        return Ok(Ok(DueRun {
                            run_key: run_key_for_firing(firing),
                        }));
                    }
                    // No firing to resume; start over from the schedule
                    (JobPhase::Running, None) => {
                        warn!(
                            "Test job {} is Running without a firing, resetting it to Pending",
                            job.metadata.key()
                        );
                        status.phase = Some(JobPhase::Pending);
                        status.start_time = None;
                        status.current_stage = None;
                        status.current_index = 0;
                    }
                    _ => {}
                }

                if now < next.next_time {
                    status.message.clear();
                    return Ok(Err(Action::Requeue(next.requeue_after)));
                }

                // Missed firings collapse into the latest one
                let cron = CronSchedule::from_spec(schedule, tz)?;
                let firing = cron.latest_firing(next.next_time, now);
                if firing > next.next_time {
                    info!(
                        "Test job {} missed firings between {} and {}, running the latest",
                        job.metadata.key(),
                        next.next_time,
                        firing
                    );
                }

                status.consume_firing(firing);
                let following =
                    compute_next_schedule(now, creation, schedule, None, Some(firing), tz)?;
                status.next_schedule_time = Some(following.next_time);

                Ok(Ok(DueRun {
                    run_key: run_key_for_firing(firing),
                }))
            }
        }
    }

    /// Runs the post-run cleanup of a finished one-shot job
    async fn clean_up(&self, job: &TestJob, release: &Release, status: &mut TestJobStatus) {
        let options = release.spec.cleanup.with_override(job.spec.cleanup.as_ref());
        if options.is_noop() {
            return;
        }

        let namespace = release.deployment_namespace();
        match self.cleanup.cleanup_namespace(namespace, options).await {
            Ok(()) => info!("Cleaned up namespace {} after {}", namespace, job.metadata.key()),
            Err(e) => {
                warn!("Cleanup of namespace {} failed: {}", namespace, e);
                let note = format!("cleanup failed: {}", e);
                if status.message.is_empty() {
                    status.message = note;
                } else {
                    status.message = format!("{}; {}", status.message, note);
                }
            }
        }
    }
}

/// Marks the job Failed for a problem only an edit can fix
fn fail_configuration(
    job: &TestJob,
    status: &mut TestJobStatus,
    message: String,
    now: DateTime<Utc>,
) -> Action {
    if status.phase() == JobPhase::Failed && status.message == message {
        return Action::AwaitChange;
    }

    warn!("Test job {} is misconfigured: {}", job.metadata.key(), message);
    status.finish(JobPhase::Failed, message, now);
    Action::AwaitChange
}

fn until(time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    time.and_then(|t| (t - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeCleanup, FakeJobs, FakeReleases, FakeWorkers, WorkerBehavior, at, completed_status,
        sample_job, sample_release,
    };
    use canary_core::domain::release::CleanupSpec;
    use canary_core::domain::test_job::{
        CleanupOverride, Hook, HookAction, ScheduleSpec, Stage,
    };

    struct Harness {
        jobs: Arc<FakeJobs>,
        releases: Arc<FakeReleases>,
        workers: Arc<FakeWorkers>,
        cleanup: Arc<FakeCleanup>,
        reconciler: TestJobReconciler,
    }

    fn harness(job: TestJob, behavior: WorkerBehavior) -> Harness {
        harness_with(job, sample_release(), behavior, ReconcileSettings::default())
    }

    fn harness_with(
        job: TestJob,
        release: Release,
        behavior: WorkerBehavior,
        settings: ReconcileSettings,
    ) -> Harness {
        let jobs = Arc::new(FakeJobs::with([job]));
        let releases = Arc::new(FakeReleases::with([release]));
        let workers = Arc::new(FakeWorkers::new(behavior));
        let cleanup = Arc::new(FakeCleanup::new());
        let reconciler = TestJobReconciler::new(
            jobs.clone(),
            releases.clone(),
            workers.clone(),
            cleanup.clone(),
            settings,
        );
        Harness {
            jobs,
            releases,
            workers,
            cleanup,
            reconciler,
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("qa", "nightly")
    }

    fn nightly_cron() -> TestJob {
        let mut job = sample_job("nightly");
        job.spec.schedule = ScheduleSpec::cron("0 2 * * *", "UTC");
        job
    }

    #[tokio::test]
    async fn test_once_runs_to_completion_in_one_pass() {
        let h = harness(sample_job("nightly"), WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::AwaitChange);
        let job = h.jobs.object(&key());
        assert_eq!(done.resource_version, Some(job.metadata.resource_version));
        assert_eq!(job.status.phase(), JobPhase::Succeeded);
        assert_eq!(job.status.start_time, Some(at(0, 0, 0)));
        assert_eq!(job.status.completion_time, Some(at(0, 0, 0)));
        assert_eq!(h.workers.names(), vec!["nightly-once-test"]);
    }

    #[tokio::test]
    async fn test_once_never_retriggers() {
        let h = harness(sample_job("nightly"), WorkerBehavior::CompleteOnCreate);
        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        let writes = h.jobs.writes();

        let again = h.reconciler.reconcile(&key(), at(5, 0, 0)).await.unwrap();

        assert_eq!(again.action, Action::AwaitChange);
        assert_eq!(h.workers.create_count(), 1);
        assert_eq!(h.jobs.writes(), writes);
    }

    #[tokio::test]
    async fn test_once_waits_for_delay() {
        let mut job = sample_job("nightly");
        job.spec.schedule = ScheduleSpec::once(Duration::from_secs(90));
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(0, 0, 30)).await.unwrap();

        assert_eq!(done.action, Action::Requeue(Duration::from_secs(60)));
        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Pending);
        assert_eq!(job.status.next_schedule_time, Some(at(0, 1, 30)));
        assert!(h.workers.names().is_empty());
    }

    #[tokio::test]
    async fn test_nightly_cron_first_evaluation() {
        let h = harness(nightly_cron(), WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::Requeue(Duration::from_secs(2 * 3600)));
        let job = h.jobs.object(&key());
        assert_eq!(job.status.next_schedule_time, Some(at(2, 0, 0)));
        assert_eq!(job.status.phase(), JobPhase::Pending);
    }

    #[tokio::test]
    async fn test_cron_firing_collapses_to_success() {
        let h = harness(nightly_cron(), WorkerBehavior::CompleteOnCreate);
        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        let done = h.reconciler.reconcile(&key(), at(2, 0, 0)).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Succeeded);
        assert_eq!(job.status.last_schedule_time, Some(at(2, 0, 0)));
        let tomorrow = at(2, 0, 0) + chrono::Duration::days(1);
        assert_eq!(job.status.next_schedule_time, Some(tomorrow));
        assert_eq!(done.action, Action::Requeue(Duration::from_secs(24 * 3600)));
        assert_eq!(h.workers.names(), vec!["nightly-r1704074400-test"]);
    }

    #[tokio::test]
    async fn test_cron_next_is_stable_between_passes() {
        let h = harness(nightly_cron(), WorkerBehavior::CompleteOnCreate);
        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        let writes = h.jobs.writes();

        let done = h.reconciler.reconcile(&key(), at(1, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::Requeue(Duration::from_secs(3600)));
        assert_eq!(h.jobs.object(&key()).status.next_schedule_time, Some(at(2, 0, 0)));
        assert_eq!(h.jobs.writes(), writes);
    }

    #[tokio::test]
    async fn test_missed_firings_run_once() {
        let mut job = sample_job("nightly");
        job.spec.schedule = ScheduleSpec::cron("*/10 * * * *", "UTC");
        job.status.next_schedule_time = Some(at(1, 0, 0));
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        h.reconciler.reconcile(&key(), at(1, 35, 0)).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.last_schedule_time, Some(at(1, 30, 0)));
        assert_eq!(job.status.next_schedule_time, Some(at(1, 40, 0)));
        assert_eq!(h.workers.create_count(), 1);
    }

    #[tokio::test]
    async fn test_overrunning_cron_run_is_not_overlapped() {
        let h = harness(nightly_cron(), WorkerBehavior::StayPending);
        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        h.reconciler.reconcile(&key(), at(2, 0, 0)).await.unwrap();

        // Next firing passes while the first run is still in its test stage
        let later = at(2, 0, 0) + chrono::Duration::days(1) + chrono::Duration::minutes(1);
        h.reconciler.reconcile(&key(), later).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Running);
        assert_eq!(job.status.last_schedule_time, Some(at(2, 0, 0)));
        assert_eq!(h.workers.names(), vec!["nightly-r1704074400-test"]);
    }

    #[tokio::test]
    async fn test_running_cron_without_firing_is_reset() {
        let mut job = nightly_cron();
        job.status.phase = Some(JobPhase::Running);
        job.status.current_stage = Some(Stage::Test);
        job.status.start_time = Some(at(0, 0, 0));
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(1, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::Requeue(Duration::from_secs(3600)));
        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Pending);
        assert_eq!(job.status.current_stage, None);
        assert_eq!(job.status.start_time, None);
        assert_eq!(job.status.next_schedule_time, Some(at(2, 0, 0)));
        assert!(h.workers.names().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_run_requeues_short() {
        let h = harness(sample_job("nightly"), WorkerBehavior::StayPending);

        let first = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        let second = h.reconciler.reconcile(&key(), at(0, 0, 2)).await.unwrap();

        assert_eq!(first.action, Action::Requeue(Duration::from_secs(2)));
        assert_eq!(second.action, Action::Requeue(Duration::from_secs(2)));
        assert_eq!(h.workers.create_count(), 1);

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Running);
        assert_eq!(job.status.current_stage, Some(Stage::Test));
        assert_eq!(job.status.start_time, Some(at(0, 0, 0)));

        h.workers.set_status("nightly-once-test", completed_status());
        let done = h.reconciler.reconcile(&key(), at(0, 0, 4)).await.unwrap();
        assert_eq!(done.action, Action::AwaitChange);
        assert_eq!(h.jobs.object(&key()).status.phase(), JobPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_pre_hook_never_creates_test_worker() {
        let mut job = sample_job("nightly");
        job.spec.hooks.pre_test.push(Hook {
            name: "seed".to_string(),
            env: Vec::new(),
            action: HookAction::Script {
                script: "exit 1".to_string(),
            },
        });
        let h = harness(job, WorkerBehavior::CompleteOnCreate);
        h.workers.fail_workers_matching("-pre-");

        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        h.reconciler.reconcile(&key(), at(0, 1, 0)).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Failed);
        assert!(job.status.completion_time.is_some());
        assert_eq!(h.workers.names(), vec!["nightly-once-pre-0"]);
    }

    #[tokio::test]
    async fn test_missing_image_fails_without_workers() {
        let mut job = sample_job("nightly");
        job.spec.test.image.clear();
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::AwaitChange);
        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Failed);
        assert_eq!(job.status.message, MISSING_IMAGE_MESSAGE);
        assert!(job.status.completion_time.is_some());
        assert_eq!(h.workers.create_count(), 0);
    }

    #[tokio::test]
    async fn test_default_image_is_used() {
        let mut job = sample_job("nightly");
        job.spec.test.image.clear();
        let settings = ReconcileSettings {
            default_image: Some("registry.example.com/default:2".to_string()),
            ..Default::default()
        };
        let h = harness_with(job, sample_release(), WorkerBehavior::CompleteOnCreate, settings);

        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(h.jobs.object(&key()).status.phase(), JobPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_cron_is_fatal() {
        let mut job = sample_job("nightly");
        job.spec.schedule = ScheduleSpec::cron("not a cron", "UTC");
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        let done = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        assert_eq!(done.action, Action::AwaitChange);
        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Failed);
        assert!(job.status.message.contains("schedule.cron"));

        let writes = h.jobs.writes();
        h.reconciler.reconcile(&key(), at(0, 5, 0)).await.unwrap();
        assert_eq!(h.jobs.writes(), writes);
    }

    #[tokio::test]
    async fn test_bad_timezone_is_fatal() {
        let mut job = sample_job("nightly");
        job.spec.schedule = ScheduleSpec::cron("0 2 * * *", "Mars/Olympus");
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Failed);
        assert!(job.status.message.contains("Mars/Olympus"));
    }

    #[tokio::test]
    async fn test_worker_error_keeps_phase_and_records_message() {
        let h = harness(sample_job("nightly"), WorkerBehavior::RejectCreate);

        let result = h.reconciler.reconcile(&key(), at(0, 0, 0)).await;

        assert!(matches!(result, Err(ReconcileError::Worker(_))));
        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Running);
        assert_eq!(job.status.current_stage, Some(Stage::Test));
        assert!(job.status.message.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_missing_release_is_retried() {
        let h = harness(sample_job("nightly"), WorkerBehavior::CompleteOnCreate);
        h.releases.remove(&ObjectKey::new("qa", "shop"));

        let result = h.reconciler.reconcile(&key(), at(0, 0, 0)).await;

        assert!(matches!(result, Err(ReconcileError::ReleaseNotFound(_))));
        let job = h.jobs.object(&key());
        assert_eq!(job.status.message, "release qa/shop not found");
        assert!(h.workers.names().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_job_is_ignored() {
        let h = harness(sample_job("nightly"), WorkerBehavior::CompleteOnCreate);
        h.jobs.remove(&key());

        let done = h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(done.action, Action::AwaitChange);
        assert_eq!(done.resource_version, None);
    }

    #[tokio::test]
    async fn test_cleanup_after_once_run() {
        let mut job = sample_job("nightly");
        job.spec.cleanup = Some(CleanupOverride {
            delete_namespace: Some(true),
            delete_images: None,
        });
        let h = harness(job, WorkerBehavior::CompleteOnCreate);

        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        assert_eq!(
            h.cleanup.calls(),
            vec![(
                "shop-qa".to_string(),
                CleanupSpec {
                    delete_namespace: true,
                    delete_images: false
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_phase() {
        let mut release = sample_release();
        release.spec.cleanup.delete_namespace = true;
        let h = harness_with(
            sample_job("nightly"),
            release,
            WorkerBehavior::CompleteOnCreate,
            ReconcileSettings::default(),
        );
        h.cleanup.fail();

        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();

        let job = h.jobs.object(&key());
        assert_eq!(job.status.phase(), JobPhase::Succeeded);
        assert!(job.status.message.ends_with("cleanup failed: kubectl delete failed: forbidden"));
    }

    #[tokio::test]
    async fn test_no_cleanup_by_default() {
        let h = harness(sample_job("nightly"), WorkerBehavior::CompleteOnCreate);
        h.reconciler.reconcile(&key(), at(0, 0, 0)).await.unwrap();
        assert!(h.cleanup.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_read_surfaces_conflict() {
        let jobs = Arc::new(StaleJobs(FakeJobs::with([sample_job("nightly")])));
        let reconciler = TestJobReconciler::new(
            jobs.clone(),
            Arc::new(FakeReleases::with([sample_release()])),
            Arc::new(FakeWorkers::new(WorkerBehavior::StayPending)),
            Arc::new(FakeCleanup::new()),
            ReconcileSettings::default(),
        );

        let result = reconciler.reconcile(&key(), at(0, 0, 0)).await;

        assert!(matches!(
            result,
            Err(ReconcileError::Store(crate::repository::StoreError::Conflict(_)))
        ));
    }

    /// Store whose object changes between the read and the write
    struct StaleJobs(FakeJobs);

    #[async_trait::async_trait]
    impl JobRepository for StaleJobs {
        async fn list(&self) -> Result<Vec<TestJob>, crate::repository::StoreError> {
            self.0.list().await
        }

        async fn get(
            &self,
            key: &ObjectKey,
        ) -> Result<Option<TestJob>, crate::repository::StoreError> {
            let job = self.0.get(key).await;
            self.0.touch(key);
            job
        }

        async fn update_status(
            &self,
            key: &ObjectKey,
            resource_version: i64,
            status: &TestJobStatus,
        ) -> Result<TestJob, crate::repository::StoreError> {
            self.0.update_status(key, resource_version, status).await
        }
    }
}

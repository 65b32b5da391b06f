//! Stage state machine
//!
//! A run walks `PreTest(0..n)`, `Test`, `PostTest(0..m)` and ends in
//! Succeeded or Failed. The cursor lives in the job status, so every
//! evaluation resumes where the previous one stopped. Each step ensures
//! one worker exists and reads its phase; nothing here waits for a worker
//! to finish.

use canary_core::domain::test_job::{Hook, HookResult, JobPhase, Stage, TestJobStatus, TestResult};
use tracing::{debug, info, warn};

use crate::reconciler::materializer::{ObservedWorker, ensure_worker};
use crate::reconciler::naming::HookStage;
use crate::reconciler::template::{self, RunContext};
use crate::reconciler::tracker::RunTracker;
use crate::worker::{WorkerError, WorkerRuntime};

/// Why the machine stopped advancing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Waiting on a worker that has not finished
    Blocked,
    /// The run reached Succeeded or Failed
    Finished,
    /// Every step succeeded but the budget ran out
    BudgetExhausted,
}

/// Advances the run by at most `budget` steps
///
/// Worker runtime failures are returned without touching the cursor so
/// the next evaluation retries the same step.
pub async fn advance(
    runtime: &dyn WorkerRuntime,
    ctx: &mut RunContext<'_>,
    status: &mut TestJobStatus,
    budget: usize,
    log_tail: usize,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<StepOutcome, WorkerError> {
    if status.current_stage.is_none() {
        status.current_stage = Some(Stage::PreTest);
        status.current_index = 0;
    }

    let job = ctx.job;
    for _ in 0..budget {
        let stage = status.current_stage.unwrap_or(Stage::Unknown);
        debug!(
            "Job {} at stage {} index {}",
            job.metadata.name, stage, status.current_index
        );

        match stage {
            Stage::PreTest | Stage::PostTest => {
                let (hook_stage, hooks) = if stage == Stage::PreTest {
                    (HookStage::Pre, &job.spec.hooks.pre_test)
                } else {
                    (HookStage::Post, &job.spec.hooks.post_test)
                };

                let index = status.current_index;
                let Some(hook) = hooks.get(index) else {
                    if stage == Stage::PreTest {
                        status.current_stage = Some(Stage::Test);
                        status.current_index = 0;
                        continue;
                    }
                    info!("Job {} succeeded", job.metadata.name);
                    status.finish(JobPhase::Succeeded, "all stages succeeded", now);
                    return Ok(StepOutcome::Finished);
                };

                if let Some(outcome) = run_hook(runtime, ctx, status, hook_stage, index, hook, now).await? {
                    return Ok(outcome);
                }
            }
            Stage::Test => {
                if let Some(outcome) = run_test(runtime, ctx, status, log_tail, now).await? {
                    return Ok(outcome);
                }
            }
            Stage::Unknown => {
                warn!(
                    "Job {} has an unrecognized stage, restarting at PreTest",
                    job.metadata.name
                );
                status.current_stage = Some(Stage::PreTest);
                status.current_index = 0;
            }
        }
    }

    Ok(StepOutcome::BudgetExhausted)
}

/// One hook step; `None` means the cursor moved on
async fn run_hook(
    runtime: &dyn WorkerRuntime,
    ctx: &mut RunContext<'_>,
    status: &mut TestJobStatus,
    stage: HookStage,
    index: usize,
    hook: &Hook,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Option<StepOutcome>, WorkerError> {
    let label = match stage {
        HookStage::Pre => "pre-test",
        HookStage::Post => "post-test",
    };

    // Field references see the status as of this step
    ctx.job_view["status"] = serde_json::to_value(&*status).unwrap_or_default();

    let unit = match template::hook_unit(ctx, stage, index, hook) {
        Ok(unit) => unit,
        Err(e) => {
            status.record_hook(
                stage,
                HookResult {
                    index,
                    name: hook.name.clone(),
                    phase: JobPhase::Failed,
                    message: e.to_string(),
                    worker_name: String::new(),
                },
            );
            let message = format!("{} hook {:?} failed: {}", label, hook.name, e);
            warn!("Job {}: {}", ctx.job.metadata.name, message);
            status.finish(JobPhase::Failed, message, now);
            return Ok(Some(StepOutcome::Finished));
        }
    };

    let observed = ensure_worker(runtime, &unit).await?;
    status.record_hook(
        stage,
        HookResult {
            index,
            name: hook.name.clone(),
            phase: observed.phase,
            message: observed.message.clone(),
            worker_name: unit.name.clone(),
        },
    );

    match observed.phase {
        JobPhase::Succeeded => {
            status.current_index = index + 1;
            Ok(None)
        }
        JobPhase::Failed => {
            let message = format!("{} hook {:?} failed: {}", label, hook.name, observed.message);
            warn!("Job {}: {}", ctx.job.metadata.name, message);
            status.finish(JobPhase::Failed, message, now);
            Ok(Some(StepOutcome::Finished))
        }
        JobPhase::Pending | JobPhase::Running => {
            status.message = format!(
                "waiting for {} hook {:?}: {}",
                label, hook.name, observed.message
            );
            Ok(Some(StepOutcome::Blocked))
        }
    }
}

/// The validation step; `None` means the cursor moved on
async fn run_test(
    runtime: &dyn WorkerRuntime,
    ctx: &RunContext<'_>,
    status: &mut TestJobStatus,
    log_tail: usize,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Option<StepOutcome>, WorkerError> {
    let unit = template::test_unit(ctx);
    let observed = ensure_worker(runtime, &unit).await?;

    let logs = if observed.phase.is_terminal() && ctx.job.spec.test.logs {
        collect_logs(runtime, &observed, log_tail).await
    } else {
        String::new()
    };

    status.record_test(TestResult {
        name: unit.name.clone(),
        phase: observed.phase,
        started_at: observed.record.status.started_at,
        completed_at: observed.record.status.finished_at,
        logs,
    });

    match observed.phase {
        JobPhase::Succeeded => {
            status.current_stage = Some(Stage::PostTest);
            status.current_index = 0;
            Ok(None)
        }
        JobPhase::Failed => {
            let message = format!("test failed: {}", observed.message);
            warn!("Job {}: {}", ctx.job.metadata.name, message);
            status.finish(JobPhase::Failed, message, now);
            Ok(Some(StepOutcome::Finished))
        }
        JobPhase::Pending | JobPhase::Running => {
            status.message = format!("waiting for test: {}", observed.message);
            Ok(Some(StepOutcome::Blocked))
        }
    }
}

async fn collect_logs(runtime: &dyn WorkerRuntime, observed: &ObservedWorker, tail: usize) -> String {
    let record = &observed.record;
    match runtime.logs(&record.namespace, &record.name, tail).await {
        Ok(logs) => logs,
        Err(e) => {
            warn!("Failed to read logs of worker {}: {}", record.name, e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeWorkers, WorkerBehavior, at, completed_status, sample_job, sample_release,
    };
    use canary_core::domain::test_job::{HookAction, TestJob};

    fn script_hook(name: &str) -> Hook {
        Hook {
            name: name.to_string(),
            env: Vec::new(),
            action: HookAction::Script {
                script: format!("echo {}", name),
            },
        }
    }

    fn job_with_hooks(pre: &[&str], post: &[&str]) -> TestJob {
        let mut job = sample_job("nightly");
        job.spec.hooks.pre_test = pre.iter().map(|n| script_hook(n)).collect();
        job.spec.hooks.post_test = post.iter().map(|n| script_hook(n)).collect();
        job
    }

    async fn run(
        workers: &FakeWorkers,
        job: &TestJob,
        status: &mut TestJobStatus,
        budget: usize,
    ) -> StepOutcome {
        let release = sample_release();
        let mut ctx = RunContext::new(job, &release, "once", "img");
        advance(workers, &mut ctx, status, budget, 50, at(0, 0, 0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_collapses_when_workers_complete() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        let job = job_with_hooks(&[], &[]);
        let mut status = TestJobStatus::default();

        let outcome = run(&workers, &job, &mut status, 4).await;

        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(status.phase(), JobPhase::Succeeded);
        assert_eq!(status.completion_time, Some(at(0, 0, 0)));
        assert_eq!(workers.names(), vec!["nightly-once-test"]);
    }

    #[tokio::test]
    async fn test_blocks_on_pending_worker() {
        let workers = FakeWorkers::new(WorkerBehavior::StayPending);
        let job = job_with_hooks(&["seed"], &[]);
        let mut status = TestJobStatus::default();

        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::Blocked);
        assert_eq!(status.current_stage, Some(Stage::PreTest));
        assert_eq!(status.current_index, 0);
        assert_eq!(status.hook_results.pre_test[0].phase, JobPhase::Pending);
        assert!(status.message.contains("seed"));

        // Same cursor on the next evaluation: no second worker
        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::Blocked);
        assert_eq!(workers.create_count(), 1);

        workers.set_status("nightly-once-pre-0", completed_status());
        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::Blocked);
        assert_eq!(status.current_stage, Some(Stage::Test));
        assert_eq!(status.hook_results.pre_test[0].phase, JobPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_pre_hook_skips_test() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        workers.fail_workers_matching("-pre-1");
        let job = job_with_hooks(&["seed", "migrate"], &["report"]);
        let mut status = TestJobStatus::default();

        let outcome = run(&workers, &job, &mut status, 10).await;

        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(status.phase(), JobPhase::Failed);
        assert_eq!(
            status.message,
            "pre-test hook \"migrate\" failed: worker failed: exit code 1"
        );
        assert_eq!(
            workers.names(),
            vec!["nightly-once-pre-0", "nightly-once-pre-1"]
        );
        assert!(status.test_results.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exhaustion() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        let job = job_with_hooks(&["a", "b", "c", "d", "e"], &[]);
        let mut status = TestJobStatus::default();

        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::BudgetExhausted);
        assert_eq!(status.current_stage, Some(Stage::PreTest));
        assert_eq!(status.current_index, 4);

        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(status.phase(), JobPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_unknown_stage_restarts() {
        let workers = FakeWorkers::new(WorkerBehavior::StayPending);
        let job = job_with_hooks(&["seed"], &[]);
        let mut status = TestJobStatus {
            current_stage: Some(Stage::Unknown),
            current_index: 7,
            ..Default::default()
        };

        let outcome = run(&workers, &job, &mut status, 4).await;
        assert_eq!(outcome, StepOutcome::Blocked);
        assert_eq!(status.current_stage, Some(Stage::PreTest));
        assert_eq!(status.current_index, 0);
        assert_eq!(workers.names(), vec!["nightly-once-pre-0"]);
    }

    #[tokio::test]
    async fn test_kubernetes_hook_fails_run() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        let mut job = job_with_hooks(&[], &[]);
        job.spec.hooks.post_test.push(Hook {
            name: "apply".to_string(),
            env: Vec::new(),
            action: HookAction::Kubernetes {
                kubernetes: serde_json::json!({ "kind": "ConfigMap" }),
            },
        });
        let mut status = TestJobStatus::default();

        let outcome = run(&workers, &job, &mut status, 4).await;

        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(status.phase(), JobPhase::Failed);
        let hook = &status.hook_results.post_test[0];
        assert_eq!(hook.phase, JobPhase::Failed);
        assert_eq!(hook.message, "unsupported hook.type \"kubernetes\"");
        assert!(hook.worker_name.is_empty());
    }

    #[tokio::test]
    async fn test_logs_are_kept_for_finished_test() {
        let workers = FakeWorkers::new(WorkerBehavior::CompleteOnCreate);
        workers.set_logs("PASS smoke");
        let job = job_with_hooks(&[], &[]);
        let mut status = TestJobStatus::default();

        run(&workers, &job, &mut status, 4).await;

        let result = &status.test_results[0];
        assert_eq!(result.name, "nightly-once-test");
        assert_eq!(result.phase, JobPhase::Succeeded);
        assert_eq!(result.logs, "PASS smoke");
    }

    #[tokio::test]
    async fn test_runtime_error_keeps_cursor() {
        let workers = FakeWorkers::new(WorkerBehavior::RejectCreate);
        let job = job_with_hooks(&["seed"], &[]);
        let release = sample_release();
        let mut ctx = RunContext::new(&job, &release, "once", "img");
        let mut status = TestJobStatus {
            phase: Some(JobPhase::Running),
            ..Default::default()
        };

        let result = advance(&workers, &mut ctx, &mut status, 4, 50, at(0, 0, 0)).await;

        assert!(result.is_err());
        assert_eq!(status.phase(), JobPhase::Running);
        assert_eq!(status.current_stage, Some(Stage::PreTest));
        assert_eq!(status.current_index, 0);
    }
}

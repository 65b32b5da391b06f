//! Run bookkeeping on the test job status
//!
//! The status is the only memory the engine has between evaluations;
//! these helpers keep its fields consistent with each other.

use canary_core::domain::test_job::{HookResult, JobPhase, TestJobStatus, TestResult};
use chrono::{DateTime, Utc};

use crate::reconciler::naming::HookStage;

pub trait RunTracker {
    /// Consumes a cron firing: the run it starts is identified by `firing`
    fn consume_firing(&mut self, firing: DateTime<Utc>);

    /// Moves a due job into Running, resetting the cursor and results
    fn begin_run(&mut self, now: DateTime<Utc>);

    /// Ends the run in a terminal phase
    fn finish(&mut self, phase: JobPhase, message: impl Into<String>, now: DateTime<Utc>);

    /// Inserts or replaces the result of hook `result.index`
    fn record_hook(&mut self, stage: HookStage, result: HookResult);

    /// Inserts or replaces the test result produced by `worker_name`
    fn record_test(&mut self, result: TestResult);
}

impl RunTracker for TestJobStatus {
    fn consume_firing(&mut self, firing: DateTime<Utc>) {
        self.last_schedule_time = Some(firing);
        self.next_schedule_time = None;
        self.phase = Some(JobPhase::Pending);
        self.start_time = None;
        self.completion_time = None;
        self.current_stage = None;
        self.current_index = 0;
    }

    fn begin_run(&mut self, now: DateTime<Utc>) {
        self.phase = Some(JobPhase::Running);
        self.start_time = Some(now);
        self.completion_time = None;
        self.current_stage = None;
        self.current_index = 0;
        self.message.clear();
        self.test_results.clear();
        self.hook_results.pre_test.clear();
        self.hook_results.post_test.clear();
    }

    fn finish(&mut self, phase: JobPhase, message: impl Into<String>, now: DateTime<Utc>) {
        debug_assert!(phase.is_terminal());
        self.phase = Some(phase);
        self.completion_time = Some(now);
        self.message = message.into();
    }

    fn record_hook(&mut self, stage: HookStage, result: HookResult) {
        let results = match stage {
            HookStage::Pre => &mut self.hook_results.pre_test,
            HookStage::Post => &mut self.hook_results.post_test,
        };

        match results.iter_mut().find(|r| r.index == result.index) {
            Some(existing) => *existing = result,
            None => {
                results.push(result);
                results.sort_by_key(|r| r.index);
            }
        }
    }

    fn record_test(&mut self, result: TestResult) {
        match self.test_results.iter_mut().find(|r| r.name == result.name) {
            Some(existing) => *existing = result,
            None => self.test_results.push(result),
        }
    }
}

//! Test job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::test_job::{JobPhase, ScheduleKind, Stage, TestJob};

/// Summary information about a test job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJobSummary {
    pub namespace: String,
    pub name: String,
    pub release: String,
    pub schedule: ScheduleKind,
    pub phase: JobPhase,
    pub current_stage: Option<Stage>,
    pub next_schedule_time: Option<DateTime<Utc>>,
    pub last_schedule_time: Option<DateTime<Utc>>,
    pub message: String,
}

impl From<TestJob> for TestJobSummary {
    fn from(job: TestJob) -> Self {
        TestJobSummary {
            release: job.release_key().to_string(),
            phase: job.status.phase(),
            namespace: job.metadata.namespace,
            name: job.metadata.name,
            schedule: job.spec.schedule.kind,
            current_stage: job.status.current_stage,
            next_schedule_time: job.status.next_schedule_time,
            last_schedule_time: job.status.last_schedule_time,
            message: job.status.message,
        }
    }
}

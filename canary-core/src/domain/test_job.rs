//! Test job domain types
//!
//! A `TestJob` runs hooks and a validation run against a deployed release,
//! either once or on a cron schedule. The spec is desired configuration;
//! the status is the only record of execution progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::meta::{API_VERSION, ObjectKey, ObjectMeta, OwnerReference};

pub const KIND: &str = "TestJob";

/// Stored test job object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJob {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: TestJobSpec,
    #[serde(default)]
    pub status: TestJobStatus,
}

impl TestJob {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: TestJobSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: TestJobStatus::default(),
        }
    }

    /// Owner reference stamped on every worker this job materializes
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid,
            controller: true,
        }
    }

    /// Key of the release this job tests
    pub fn release_key(&self) -> ObjectKey {
        self.spec.release_ref.key(&self.metadata.namespace)
    }
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// Desired configuration of a test job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJobSpec {
    pub release_ref: ReleaseRef,
    pub schedule: ScheduleSpec,
    #[serde(default)]
    pub test: TestSpec,
    #[serde(default)]
    pub hooks: HooksSpec,
    /// Overrides the referenced release's cleanup settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<CleanupOverride>,
}

/// Reference to a stored release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRef {
    pub name: String,
    /// Empty means the job's own namespace
    #[serde(default)]
    pub namespace: String,
}

impl ReleaseRef {
    pub fn key(&self, default_namespace: &str) -> ObjectKey {
        let namespace = if self.namespace.is_empty() {
            default_namespace
        } else {
            &self.namespace
        };
        ObjectKey::new(namespace, self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Once,
    Cron,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleKind::Once => write!(f, "once"),
            ScheduleKind::Cron => write!(f, "cron"),
        }
    }
}

/// When a job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    #[serde(rename = "type")]
    pub kind: ScheduleKind,

    /// Offset from creation for `once` schedules
    #[serde(default, with = "humantime_serde")]
    pub delay: Duration,

    /// Cron expression for `cron` schedules
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cron: String,

    /// IANA timezone the cron expression is evaluated in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone: String,
}

impl ScheduleSpec {
    pub fn once(delay: Duration) -> Self {
        Self {
            kind: ScheduleKind::Once,
            delay,
            cron: String::new(),
            timezone: String::new(),
        }
    }

    pub fn cron(expression: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            kind: ScheduleKind::Cron,
            delay: Duration::ZERO,
            cron: expression.into(),
            timezone: timezone.into(),
        }
    }
}

/// Validation run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSpec {
    /// Worker image; falls back to the controller's default image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default = "default_test_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_logs")]
    pub logs: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

impl Default for TestSpec {
    fn default() -> Self {
        Self {
            image: String::new(),
            timeout: default_test_timeout(),
            logs: default_logs(),
            filter: String::new(),
        }
    }
}

fn default_test_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_logs() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HooksSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_test: Vec<Hook>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_test: Vec<Hook>,
}

/// A single hook invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<HookEnvVar>,
    #[serde(flatten)]
    pub action: HookAction,
}

/// What a hook runs, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookAction {
    Script {
        #[serde(default)]
        script: String,
    },
    Kubernetes {
        kubernetes: serde_json::Value,
    },
}

impl HookAction {
    pub fn type_name(&self) -> &'static str {
        match self {
            HookAction::Script { .. } => "script",
            HookAction::Kubernetes { .. } => "kubernetes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<HookEnvVarSource>,
}

/// Field reference resolved at materialization time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEnvVarSource {
    /// Dotted path into the test job object, e.g. `status.phase`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_path: String,

    /// Dotted path into the referenced release object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_ref: Option<ReleaseFieldRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFieldRef {
    pub field_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_namespace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_images: Option<bool>,
}

/// Coarse execution phase of a test job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Pending => write!(f, "Pending"),
            JobPhase::Running => write!(f, "Running"),
            JobPhase::Succeeded => write!(f, "Succeeded"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Pipeline stage of the active run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    PreTest,
    Test,
    PostTest,
    /// Any value written by something other than this controller
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::PreTest => write!(f, "PreTest"),
            Stage::Test => write!(f, "Test"),
            Stage::PostTest => write!(f, "PostTest"),
            Stage::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Observed execution state of a test job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<JobPhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    /// Cursor into the hook list of the current stage
    #[serde(default)]
    pub current_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_schedule_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_schedule_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_results: Vec<TestResult>,

    #[serde(default)]
    pub hook_results: HookResults,
}

impl TestJobStatus {
    pub fn phase(&self) -> JobPhase {
        self.phase.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResults {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_test: Vec<HookResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_test: Vec<HookResult>,
}

impl HookResults {
    pub fn is_empty(&self) -> bool {
        self.pre_test.is_empty() && self.post_test.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookResult {
    pub index: usize,
    pub name: String,
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worker_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub logs: String,
}

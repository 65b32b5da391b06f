//! Worker domain model
//!
//! A worker is a short-lived, single-container unit that runs one hook or
//! one validation run. Workers are created by name and never updated.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::meta::OwnerReference;

pub const MANAGED_BY_LABEL: &str = "canary.dev/managed-by";
pub const MANAGED_BY_VALUE: &str = "canary-controller";
pub const OWNER_UID_LABEL: &str = "canary.dev/owner-uid";
pub const OWNER_NAME_LABEL: &str = "canary.dev/owner-name";
pub const NAMESPACE_LABEL: &str = "canary.dev/namespace";
pub const RUN_KEY_LABEL: &str = "canary.dev/run-key";
pub const STAGE_LABEL: &str = "canary.dev/stage";

/// Template of a worker to be created
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerUnit {
    pub name: String,
    pub namespace: String,
    pub owner: OwnerReference,
    pub labels: BTreeMap<String, String>,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<EnvVar>,
    pub restart_policy: RestartPolicy,

    /// Advisory limit handed to the runtime
    pub active_deadline: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    Never,
}

/// A worker as observed in the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub status: WorkerStatus,
}

impl WorkerRecord {
    pub fn owner_uid(&self) -> Option<&str> {
        self.labels.get(OWNER_UID_LABEL).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub conditions: Vec<WorkerCondition>,
    /// Number of running containers
    pub active: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCondition {
    pub kind: ConditionKind,
    pub status: bool,
    pub message: String,
}

impl WorkerCondition {
    pub fn complete() -> Self {
        Self {
            kind: ConditionKind::Complete,
            status: true,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::Failed,
            status: true,
            message: message.into(),
        }
    }
}

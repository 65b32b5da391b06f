//! Reconciliation engine
//!
//! Each reconciler is a single level-triggered pass: read the stored
//! object, compare it with the outside world, write the new status and
//! tell the caller when to look again. Nothing in here blocks on a
//! worker or a chart install finishing.
//!
//! - `schedule`: when a test job is due
//! - `naming`, `template`, `materializer`: deterministic workers
//! - `stage`, `tracker`: the per-run state machine and its bookkeeping
//! - `driver`: the test job reconciler
//! - `release`: the release reconciler

pub mod driver;
pub mod materializer;
pub mod naming;
pub mod release;
pub mod schedule;
pub mod stage;
pub mod template;
pub mod tracker;

use std::time::Duration;

use canary_core::domain::meta::ObjectKey;
use thiserror::Error;

use crate::repository::StoreError;
use crate::service::helm::InstallError;
use crate::worker::WorkerError;

pub use driver::{ReconcileSettings, TestJobReconciler};
pub use release::ReleaseReconciler;

/// When the work queue should evaluate an object again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Evaluate again after the delay; zero means immediately
    Requeue(Duration),
    /// Only an external change to the object warrants another pass
    AwaitChange,
}

impl Action {
    pub fn requeue_now() -> Self {
        Action::Requeue(Duration::ZERO)
    }
}

/// Result of a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub action: Action,
    /// Resource version of the object after the pass, `None` once deleted
    pub resource_version: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("worker runtime error: {0}")]
    Worker(#[from] WorkerError),

    #[error("release {0} not found")]
    ReleaseNotFound(ObjectKey),

    #[error("install failed: {0}")]
    Install(#[from] InstallError),
}

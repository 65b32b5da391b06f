//! Worker substrate
//!
//! The controller never runs hooks or tests itself; it asks a runtime to
//! materialize short-lived workers and observes their state.

use async_trait::async_trait;
use canary_core::domain::worker::{WorkerRecord, WorkerUnit};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} already exists")]
    AlreadyExists(String),

    #[error("worker runtime command failed: {0}")]
    Command(String),

    #[error("failed to launch worker runtime: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected worker runtime output: {0}")]
    Parse(String),
}

/// Runtime that materializes workers
///
/// Implementations must treat names as unique per namespace and report
/// [`WorkerError::AlreadyExists`] when a create loses a race.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Looks a worker up by name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkerRecord>, WorkerError>;

    /// Creates a worker and returns its first observed state
    async fn create(&self, unit: &WorkerUnit) -> Result<WorkerRecord, WorkerError>;

    /// Removes a worker; a missing worker is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WorkerError>;

    /// Lists every worker carrying the managed-by label
    async fn list_managed(&self) -> Result<Vec<WorkerRecord>, WorkerError>;

    /// Last `tail` lines of a worker's output
    async fn logs(&self, namespace: &str, name: &str, tail: usize) -> Result<String, WorkerError>;
}

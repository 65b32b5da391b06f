//! Repository layer
//!
//! Repositories wrap the server API the controller reads desired state
//! from and writes observed status to. Trait-based so the reconcilers can
//! run against in-memory stores in tests.

mod jobs;
mod releases;

use canary_client::ClientError;
use canary_core::domain::meta::ObjectKey;
use thiserror::Error;

// Re-export traits
pub use jobs::JobRepository;
pub use releases::ReleaseRepository;

// Re-export implementations
pub use jobs::HttpJobRepository;
pub use releases::HttpReleaseRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored object moved past the resource version we read
    #[error("{0} was modified concurrently")]
    Conflict(ObjectKey),

    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error(transparent)]
    Client(ClientError),
}

impl StoreError {
    /// Classifies a client failure for the object at `key`
    pub fn from_client(key: &ObjectKey, error: ClientError) -> Self {
        if error.is_conflict() {
            StoreError::Conflict(key.clone())
        } else if error.is_not_found() {
            StoreError::NotFound(key.clone())
        } else {
            StoreError::Client(error)
        }
    }
}

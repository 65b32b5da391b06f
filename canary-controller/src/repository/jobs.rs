//! Test job repository

use async_trait::async_trait;
use canary_client::CanaryClient;
use canary_core::domain::meta::ObjectKey;
use canary_core::domain::test_job::{TestJob, TestJobStatus};
use std::sync::Arc;

use super::StoreError;

/// Repository trait for test job reads and status writes
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Lists test jobs in every namespace
    async fn list(&self) -> Result<Vec<TestJob>, StoreError>;

    /// Fetches a test job; `None` once it has been deleted
    async fn get(&self, key: &ObjectKey) -> Result<Option<TestJob>, StoreError>;

    /// Writes the status if the job is still at `resource_version`
    ///
    /// Returns the stored job carrying its new resource version.
    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &TestJobStatus,
    ) -> Result<TestJob, StoreError>;
}

/// HTTP implementation of JobRepository
pub struct HttpJobRepository {
    client: Arc<CanaryClient>,
}

impl HttpJobRepository {
    pub fn new(client: Arc<CanaryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl JobRepository for HttpJobRepository {
    async fn list(&self) -> Result<Vec<TestJob>, StoreError> {
        self.client
            .list_test_jobs(None)
            .await
            .map_err(StoreError::Client)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<TestJob>, StoreError> {
        match self.client.get_test_job(key).await {
            Ok(job) => Ok(Some(job)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(StoreError::Client(e)),
        }
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &TestJobStatus,
    ) -> Result<TestJob, StoreError> {
        self.client
            .update_test_job_status(key, resource_version, status)
            .await
            .map_err(|e| StoreError::from_client(key, e))
    }
}

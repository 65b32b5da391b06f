//! Test job API endpoints

use canary_core::domain::meta::ObjectKey;
use canary_core::domain::test_job::{TestJob, TestJobStatus};
use canary_core::dto::StatusUpdate;

use crate::CanaryClient;
use crate::error::Result;

impl CanaryClient {
    // =============================================================================
    // Test Jobs
    // =============================================================================

    /// List test jobs, optionally restricted to one namespace
    pub async fn list_test_jobs(&self, namespace: Option<&str>) -> Result<Vec<TestJob>> {
        let mut request = self.client.get(self.api_url("testjobs"));
        if let Some(namespace) = namespace {
            request = request.query(&[("namespace", namespace)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn get_test_job(&self, key: &ObjectKey) -> Result<TestJob> {
        let url = self.api_url(&format!("testjobs/{}/{}", key.namespace, key.name));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn create_test_job(&self, job: &TestJob) -> Result<TestJob> {
        let response = self
            .client
            .post(self.api_url("testjobs"))
            .json(job)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Replace a test job's spec and labels
    pub async fn update_test_job(&self, job: &TestJob) -> Result<TestJob> {
        let key = job.metadata.key();
        let url = self.api_url(&format!("testjobs/{}/{}", key.namespace, key.name));
        let response = self.client.put(&url).json(job).send().await?;

        self.handle_response(response).await
    }

    /// Compare-and-swap the status of a test job
    ///
    /// Fails with a 409 [`ClientError::ApiError`](crate::ClientError) when
    /// the stored object moved past `resource_version`.
    pub async fn update_test_job_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &TestJobStatus,
    ) -> Result<TestJob> {
        let url = self.api_url(&format!("testjobs/{}/{}/status", key.namespace, key.name));
        let body = StatusUpdate {
            resource_version,
            status,
        };
        let response = self.client.put(&url).json(&body).send().await?;

        self.handle_response(response).await
    }

    pub async fn delete_test_job(&self, key: &ObjectKey) -> Result<()> {
        let url = self.api_url(&format!("testjobs/{}/{}", key.namespace, key.name));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }
}

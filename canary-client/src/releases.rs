//! Release API endpoints

use canary_core::domain::meta::ObjectKey;
use canary_core::domain::release::{Release, ReleaseStatus};
use canary_core::dto::StatusUpdate;

use crate::CanaryClient;
use crate::error::Result;

impl CanaryClient {
    // =============================================================================
    // Releases
    // =============================================================================

    /// List releases, optionally restricted to one namespace
    pub async fn list_releases(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        let mut request = self.client.get(self.api_url("releases"));
        if let Some(namespace) = namespace {
            request = request.query(&[("namespace", namespace)]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    pub async fn get_release(&self, key: &ObjectKey) -> Result<Release> {
        let url = self.api_url(&format!("releases/{}/{}", key.namespace, key.name));
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Create a release; the server assigns uid and resource version
    pub async fn create_release(&self, release: &Release) -> Result<Release> {
        let response = self
            .client
            .post(self.api_url("releases"))
            .json(release)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Replace a release's spec and labels
    ///
    /// A non-zero `metadata.resourceVersion` makes the write conditional.
    pub async fn update_release(&self, release: &Release) -> Result<Release> {
        let key = release.metadata.key();
        let url = self.api_url(&format!("releases/{}/{}", key.namespace, key.name));
        let response = self.client.put(&url).json(release).send().await?;

        self.handle_response(response).await
    }

    /// Compare-and-swap the status of a release
    pub async fn update_release_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &ReleaseStatus,
    ) -> Result<Release> {
        let url = self.api_url(&format!("releases/{}/{}/status", key.namespace, key.name));
        let body = StatusUpdate {
            resource_version,
            status,
        };
        let response = self.client.put(&url).json(&body).send().await?;

        self.handle_response(response).await
    }

    pub async fn delete_release(&self, key: &ObjectKey) -> Result<()> {
        let url = self.api_url(&format!("releases/{}/{}", key.namespace, key.name));
        let response = self.client.delete(&url).send().await?;

        self.handle_empty_response(response).await
    }
}

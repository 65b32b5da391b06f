//! Release repository

use async_trait::async_trait;
use canary_client::CanaryClient;
use canary_core::domain::meta::ObjectKey;
use canary_core::domain::release::{Release, ReleaseStatus};
use std::sync::Arc;

use super::StoreError;

/// Repository trait for release reads and status writes
#[async_trait]
pub trait ReleaseRepository: Send + Sync {
    /// Lists releases in every namespace
    async fn list(&self) -> Result<Vec<Release>, StoreError>;

    /// Fetches a release; `None` once it has been deleted
    async fn get(&self, key: &ObjectKey) -> Result<Option<Release>, StoreError>;

    /// Writes the status if the release is still at `resource_version`
    ///
    /// Returns the stored release carrying its new resource version.
    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &ReleaseStatus,
    ) -> Result<Release, StoreError>;
}

/// HTTP implementation of ReleaseRepository
pub struct HttpReleaseRepository {
    client: Arc<CanaryClient>,
}

impl HttpReleaseRepository {
    pub fn new(client: Arc<CanaryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReleaseRepository for HttpReleaseRepository {
    async fn list(&self) -> Result<Vec<Release>, StoreError> {
        self.client
            .list_releases(None)
            .await
            .map_err(StoreError::Client)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<Release>, StoreError> {
        match self.client.get_release(key).await {
            Ok(release) => Ok(Some(release)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(StoreError::Client(e)),
        }
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        resource_version: i64,
        status: &ReleaseStatus,
    ) -> Result<Release, StoreError> {
        self.client
            .update_release_status(key, resource_version, status)
            .await
            .map_err(|e| StoreError::from_client(key, e))
    }
}

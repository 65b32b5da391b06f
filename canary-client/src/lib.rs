//! Canary HTTP Client
//!
//! A type-safe HTTP client for the Canary server API, shared by the
//! controller and the CLI.
//!
//! # Example
//!
//! ```no_run
//! use canary_client::CanaryClient;
//! use canary_core::domain::meta::ObjectKey;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), canary_client::ClientError> {
//!     let client = CanaryClient::new("http://localhost:8080");
//!
//!     let job = client.get_test_job(&ObjectKey::new("qa", "nightly")).await?;
//!     println!("{} is {}", job.metadata.name, job.status.phase());
//!     Ok(())
//! }
//! ```

pub mod error;
mod releases;
mod test_jobs;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Canary server API
///
/// Methods are grouped per resource:
/// - Releases (list, get, create, update, delete, status)
/// - Test jobs (list, get, create, update, delete, status)
#[derive(Debug, Clone)]
pub struct CanaryClient {
    /// Base URL of the server (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CanaryClient {
    /// Create a new client for the server at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response without a body (e.g., DELETE)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

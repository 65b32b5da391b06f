//! Namespace cleanup
//!
//! Runs after a release is uninstalled or a one-shot test job finishes.

use std::path::PathBuf;

use async_trait::async_trait;
use canary_core::domain::release::CleanupSpec;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("kubectl {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("failed to run kubectl: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait CleanupRunner: Send + Sync {
    async fn cleanup_namespace(
        &self,
        namespace: &str,
        options: CleanupSpec,
    ) -> Result<(), CleanupError>;
}

/// kubectl implementation of [`CleanupRunner`]
pub struct KubectlCleanup {
    bin: String,
    kubeconfig: Option<PathBuf>,
}

impl KubectlCleanup {
    pub fn new(bin: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            kubeconfig,
        }
    }
}

fn delete_namespace_args(namespace: &str) -> Vec<String> {
    vec![
        "delete".to_string(),
        "namespace".to_string(),
        namespace.to_string(),
        "--ignore-not-found".to_string(),
        "--wait=false".to_string(),
    ]
}

#[async_trait]
impl CleanupRunner for KubectlCleanup {
    async fn cleanup_namespace(
        &self,
        namespace: &str,
        options: CleanupSpec,
    ) -> Result<(), CleanupError> {
        if options.delete_images {
            // Image pruning happens on cluster nodes, out of reach from here
            warn!(
                "Image cleanup requested for namespace {} but is not supported; skipping",
                namespace
            );
        }

        if !options.delete_namespace {
            return Ok(());
        }

        info!("Deleting namespace {}", namespace);

        let mut command = Command::new(&self.bin);
        if let Some(path) = &self.kubeconfig {
            command.env("KUBECONFIG", path);
        }
        let output = command.args(delete_namespace_args(namespace)).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("kubectl stdout: {}", stdout.trim());
        }

        if !output.status.success() {
            return Err(CleanupError::Command {
                command: "delete namespace".to_string(),
                message: format!(
                    "exit_code={}, stderr='{}'",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        Ok(())
    }
}

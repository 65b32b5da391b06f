//! Release domain model
//!
//! A release is a chart installed into a deployment namespace. Test jobs
//! reference releases by name and read their deployment settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::meta::{API_VERSION, ObjectMeta};
use crate::domain::test_job::CleanupOverride;

pub const KIND: &str = "Release";

/// Stored release object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ReleaseSpec,
    #[serde(default)]
    pub status: ReleaseStatus,
}

impl Release {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ReleaseSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: ReleaseStatus::default(),
        }
    }

    /// Namespace the chart is deployed into; falls back to the object's namespace
    pub fn deployment_namespace(&self) -> &str {
        if self.spec.deployment.namespace.is_empty() {
            &self.metadata.namespace
        } else {
            &self.spec.deployment.namespace
        }
    }
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    pub chart: ChartSpec,
    #[serde(default)]
    pub values: ValuesSpec,
    #[serde(default)]
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub cleanup: CleanupSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartSource {
    Repository,
    Git,
    Local,
}

impl std::fmt::Display for ChartSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChartSource::Repository => write!(f, "repository"),
            ChartSource::Git => write!(f, "git"),
            ChartSource::Local => write!(f, "local"),
        }
    }
}

/// Where the chart comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub source: ChartSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<RepositoryChart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitChart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalChart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryChart {
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitChart {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChart {
    pub path: String,
}

/// Helm values handed to the installer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default)]
    pub create_namespace: bool,

    #[serde(default = "default_deploy_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Install attempts after the first failure
    #[serde(default)]
    pub retries: u32,

    /// Settle time before the release counts as Installed
    #[serde(default, with = "humantime_serde")]
    pub wait_after_deploy: Duration,

    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_uninstall_after: Option<Duration>,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            create_namespace: false,
            timeout: default_deploy_timeout(),
            retries: 0,
            wait_after_deploy: Duration::ZERO,
            auto_uninstall_after: None,
        }
    }
}

fn default_deploy_timeout() -> Duration {
    Duration::from_secs(300)
}

/// What to remove once a release is done with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSpec {
    #[serde(default)]
    pub delete_namespace: bool,
    #[serde(default)]
    pub delete_images: bool,
}

impl CleanupSpec {
    /// Applies a test job's override field by field
    pub fn with_override(self, over: Option<&CleanupOverride>) -> Self {
        match over {
            Some(over) => CleanupSpec {
                delete_namespace: over.delete_namespace.unwrap_or(self.delete_namespace),
                delete_images: over.delete_images.unwrap_or(self.delete_images),
            },
            None => self,
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.delete_namespace && !self.delete_images
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleasePhase {
    #[default]
    Pending,
    Installing,
    Installed,
    Failed,
    Uninstalling,
    Uninstalled,
}

impl std::fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleasePhase::Pending => write!(f, "Pending"),
            ReleasePhase::Installing => write!(f, "Installing"),
            ReleasePhase::Installed => write!(f, "Installed"),
            ReleasePhase::Failed => write!(f, "Failed"),
            ReleasePhase::Uninstalling => write!(f, "Uninstalling"),
            ReleasePhase::Uninstalled => write!(f, "Uninstalled"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default)]
    pub phase: ReleasePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_release: Option<HelmReleaseInfo>,
}

/// What the installer reported for the deployed release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseInfo {
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub status: String,
}

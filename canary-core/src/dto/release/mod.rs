//! Release DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::release::{ChartSource, Release, ReleasePhase};

/// Summary information about a release
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSummary {
    pub namespace: String,
    pub name: String,
    pub source: ChartSource,
    pub deployment_namespace: String,
    pub phase: ReleasePhase,
    pub deployed_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl From<Release> for ReleaseSummary {
    fn from(release: Release) -> Self {
        ReleaseSummary {
            deployment_namespace: release.deployment_namespace().to_string(),
            namespace: release.metadata.namespace,
            name: release.metadata.name,
            source: release.spec.chart.source,
            phase: release.status.phase,
            deployed_at: release.status.deployed_at,
            message: release.status.message,
        }
    }
}

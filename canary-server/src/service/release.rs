//! Release validation

use canary_core::domain::meta::{ObjectMeta, is_dns1123_label};
use canary_core::domain::release::{ChartSource, KIND, Release, ReleaseStatus};

use crate::repository::object_repository::Table;
use crate::service::object::StoredKind;

impl StoredKind for Release {
    type Status = ReleaseStatus;

    const KIND: &'static str = KIND;
    const TABLE: Table = Table::Releases;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn validate(&self) -> std::result::Result<(), String> {
        validate_release(self)
    }
}

fn validate_release(release: &Release) -> Result<(), String> {
    let chart = &release.spec.chart;

    match chart.source {
        ChartSource::Repository => {
            let repo = chart
                .repository
                .as_ref()
                .ok_or("chart.repository is required when source=repository")?;
            if repo.url.trim().is_empty() || repo.name.trim().is_empty() {
                return Err("chart.repository needs both url and name".to_string());
            }
        }
        ChartSource::Git => {
            let git = chart
                .git
                .as_ref()
                .ok_or("chart.git is required when source=git")?;
            if git.url.trim().is_empty() {
                return Err("chart.git.url cannot be empty".to_string());
            }
        }
        ChartSource::Local => {
            let local = chart
                .local
                .as_ref()
                .ok_or("chart.local is required when source=local")?;
            if local.path.trim().is_empty() {
                return Err("chart.local.path cannot be empty".to_string());
            }
        }
    }

    let namespace = &release.spec.deployment.namespace;
    if !namespace.is_empty() && !is_dns1123_label(namespace) {
        return Err(format!(
            "deployment.namespace '{}' must be a DNS-1123 label",
            namespace
        ));
    }

    if release.spec.deployment.timeout.is_zero() {
        return Err("deployment.timeout must be greater than zero".to_string());
    }

    Ok(())
}

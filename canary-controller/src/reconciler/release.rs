//! Release reconciler
//!
//! Installs (or upgrades) a release whenever its spec generation has not
//! been installed yet, waits out the settle time, and uninstalls it when
//! its auto-uninstall deadline passes.

use std::sync::Arc;
use std::time::Duration;

use canary_core::domain::meta::ObjectKey;
use canary_core::domain::release::{Release, ReleasePhase, ReleaseStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::reconciler::{Action, ReconcileError, Reconciled};
use crate::repository::ReleaseRepository;
use crate::service::{CleanupRunner, ReleaseInstaller};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(300);

pub struct ReleaseReconciler {
    releases: Arc<dyn ReleaseRepository>,
    installer: Arc<dyn ReleaseInstaller>,
    cleanup: Arc<dyn CleanupRunner>,
}

impl ReleaseReconciler {
    pub fn new(
        releases: Arc<dyn ReleaseRepository>,
        installer: Arc<dyn ReleaseInstaller>,
        cleanup: Arc<dyn CleanupRunner>,
    ) -> Self {
        Self {
            releases,
            installer,
            cleanup,
        }
    }

    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, ReconcileError> {
        let Some(release) = self.releases.get(key).await? else {
            debug!("Release {} is gone", key);
            return Ok(Reconciled {
                action: Action::AwaitChange,
                resource_version: None,
            });
        };

        let mut status = release.status.clone();
        let result = self.evaluate(&release, &mut status, now).await;

        let mut resource_version = release.metadata.resource_version;
        if status != release.status {
            match self
                .releases
                .update_status(key, resource_version, &status)
                .await
            {
                Ok(stored) => resource_version = stored.metadata.resource_version,
                Err(e) => {
                    if let Err(original) = result {
                        warn!("Failed to record error on {}: {}", key, e);
                        return Err(original);
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(Reconciled {
            action: result?,
            resource_version: Some(resource_version),
        })
    }

    async fn evaluate(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        let generation = release.metadata.generation;

        if status.phase != ReleasePhase::Uninstalled {
            if let Some(field) = out_of_range_duration(release, now) {
                warn!("Release {} has an out of range {}", release.metadata.key(), field);
                status.phase = ReleasePhase::Failed;
                status.message = format!("{} is out of range", field);
                status.observed_generation = generation;
                return Ok(Action::AwaitChange);
            }
        }

        match status.phase {
            ReleasePhase::Uninstalled => return Ok(Action::AwaitChange),
            ReleasePhase::Installing | ReleasePhase::Installed
                if status.observed_generation == generation =>
            {
                return self.settle(release, status, now).await;
            }
            ReleasePhase::Failed if status.observed_generation == generation => {
                if status.retry_count > release.spec.deployment.retries {
                    return Ok(Action::AwaitChange);
                }
            }
            _ => status.retry_count = 0,
        }

        Ok(self.install(release, status, now).await)
    }

    async fn install(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        now: DateTime<Utc>,
    ) -> Action {
        let key = release.metadata.key();
        let deployment = &release.spec.deployment;

        match self.installer.install_or_upgrade(release).await {
            Ok(helm_release) => {
                info!(
                    "Release {} installed (revision {})",
                    key, helm_release.version
                );
                status.phase = if deployment.wait_after_deploy.is_zero() {
                    ReleasePhase::Installed
                } else {
                    ReleasePhase::Installing
                };
                status.message = format!("installed revision {}", helm_release.version);
                status.deployed_at = Some(now);
                status.helm_release = Some(helm_release);
                status.observed_generation = release.metadata.generation;
                status.retry_count = 0;
                status.uninstall_at = deployment
                    .auto_uninstall_after
                    .map(|after| deadline(now, after));

                next_check(status, deployment.wait_after_deploy, now)
            }
            Err(e) => {
                status.phase = ReleasePhase::Failed;
                status.message = e.to_string();
                status.observed_generation = release.metadata.generation;
                status.retry_count += 1;

                if status.retry_count <= deployment.retries {
                    let delay = retry_delay(status.retry_count);
                    warn!(
                        "Install of {} failed (attempt {}), retrying in {:?}: {}",
                        key, status.retry_count, delay, e
                    );
                    Action::Requeue(delay)
                } else {
                    warn!("Install of {} failed, giving up: {}", key, e);
                    Action::AwaitChange
                }
            }
        }
    }

    /// Post-install bookkeeping of an installed generation
    async fn settle(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        let wait = release.spec.deployment.wait_after_deploy;

        if status.phase == ReleasePhase::Installing {
            let ready_at = deadline(status.deployed_at.unwrap_or(now), wait);
            if now < ready_at {
                return Ok(Action::Requeue(remaining(ready_at, now)));
            }
            info!("Release {} is ready", release.metadata.key());
            status.phase = ReleasePhase::Installed;
        }

        match status.uninstall_at {
            Some(deadline) if now >= deadline => self.uninstall(release, status).await,
            _ => Ok(next_check(status, wait, now)),
        }
    }

    async fn uninstall(
        &self,
        release: &Release,
        status: &mut ReleaseStatus,
    ) -> Result<Action, ReconcileError> {
        let key = release.metadata.key();
        info!("Auto-uninstalling release {}", key);

        if let Err(e) = self.installer.uninstall(release).await {
            status.message = format!("uninstall failed: {}", e);
            return Err(e.into());
        }

        status.phase = ReleasePhase::Uninstalled;
        status.message = "uninstalled".to_string();

        let options = release.spec.cleanup;
        if !options.is_noop() {
            let namespace = release.deployment_namespace();
            if let Err(e) = self.cleanup.cleanup_namespace(namespace, options).await {
                warn!("Cleanup of namespace {} failed: {}", namespace, e);
                status.message = format!("uninstalled; cleanup failed: {}", e);
            }
        }

        Ok(Action::AwaitChange)
    }
}

/// When an installed release needs another look
fn next_check(status: &ReleaseStatus, wait: Duration, now: DateTime<Utc>) -> Action {
    if status.phase == ReleasePhase::Installing {
        return Action::Requeue(wait);
    }
    match status.uninstall_at {
        Some(deadline) => Action::Requeue(remaining(deadline, now)),
        None => Action::AwaitChange,
    }
}

/// `start + after`, saturating at the largest representable time
fn deadline(start: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| start.checked_add_signed(after))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Deployment duration whose deadline from `now` cannot be represented
fn out_of_range_duration(release: &Release, now: DateTime<Utc>) -> Option<&'static str> {
    let deployment = &release.spec.deployment;
    let fits = |after: Duration| {
        chrono::Duration::from_std(after)
            .ok()
            .and_then(|after| now.checked_add_signed(after))
            .is_some()
    };

    if !fits(deployment.wait_after_deploy) {
        return Some("deployment.waitAfterDeploy");
    }
    if deployment.auto_uninstall_after.is_some_and(|after| !fits(after)) {
        return Some("deployment.autoUninstallAfter");
    }
    None
}

fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Exponential backoff for install attempt `attempt` (1-based)
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE_DELAY.saturating_mul(factor).min(RETRY_MAX_DELAY)
}

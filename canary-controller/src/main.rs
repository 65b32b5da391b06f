//! Canary Controller
//!
//! Drives releases and test jobs stored in the canary server towards their
//! desired state.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: HTTP access to releases and test jobs, with CAS status writes
//! - Reconcilers: Level-triggered passes for releases and test jobs
//! - Workers: Podman containers running hooks and tests
//! - Services: Helm installs, kubectl cleanup, orphan sweeping
//! - Scheduler: Polling, work queue and bounded parallel dispatch

mod config;
mod podman;
mod reconciler;
mod repository;
mod scheduler;
mod service;
#[cfg(test)]
mod testing;
mod worker;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::podman::{PodmanRuntime, check_podman_available};
use crate::reconciler::{ReleaseReconciler, TestJobReconciler};
use crate::repository::{
    HttpJobRepository, HttpReleaseRepository, JobRepository, ReleaseRepository,
};
use crate::scheduler::ReconcilePoller;
use crate::service::{
    CleanupRunner, HelmCli, KubectlCleanup, OrphanSweeper, ReleaseInstaller,
};
use crate::worker::WorkerRuntime;
use canary_client::CanaryClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canary_controller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Canary Controller");

    let config = load_config()?;
    info!(
        "Loaded configuration: server_url={}, default_timezone={}",
        config.server_url, config.default_timezone
    );
    match &config.default_image {
        Some(image) => info!("Default test image: {}", image),
        None => warn!("CANARY_JOB_IMAGE not set; jobs without spec.test.image will fail"),
    }

    let podman_version = check_podman_available(&config.podman_bin)
        .await
        .context("Podman is not available")?;
    info!("Using {}", podman_version);

    let client = Arc::new(CanaryClient::new(config.server_url.clone()));
    wait_for_server(&client).await?;
    info!("Connected to canary server");

    let jobs: Arc<dyn JobRepository> = Arc::new(HttpJobRepository::new(client.clone()));
    let releases: Arc<dyn ReleaseRepository> = Arc::new(HttpReleaseRepository::new(client));

    let workers: Arc<dyn WorkerRuntime> = Arc::new(PodmanRuntime::new(
        config.podman_bin.clone(),
        config.worker_kubeconfig.clone(),
    ));
    let installer: Arc<dyn ReleaseInstaller> = Arc::new(HelmCli::new(
        config.helm_bin.clone(),
        config.worker_kubeconfig.clone(),
    ));
    let cleanup: Arc<dyn CleanupRunner> = Arc::new(KubectlCleanup::new(
        config.kubectl_bin.clone(),
        config.worker_kubeconfig.clone(),
    ));

    let job_reconciler = TestJobReconciler::new(
        jobs.clone(),
        releases.clone(),
        workers.clone(),
        cleanup.clone(),
        config.reconcile_settings(),
    );
    let release_reconciler = ReleaseReconciler::new(releases.clone(), installer, cleanup);

    let poller = ReconcilePoller::new(
        config,
        jobs,
        releases,
        job_reconciler,
        release_reconciler,
        OrphanSweeper::new(workers),
    );

    info!("Controller initialized successfully");

    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Loads and validates configuration from environment variables
fn load_config() -> Result<Config> {
    let config = Config::from_env().context("Invalid configuration")?;
    config.validate()?;
    Ok(config)
}

/// Waits until the server answers a listing, with exponential backoff
///
/// The server may still be starting when the controller comes up.
async fn wait_for_server(client: &CanaryClient) -> Result<()> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match client.list_releases(None).await {
            Ok(_) => {
                if attempt > 1 {
                    info!("Reached canary server after {} attempt(s)", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(anyhow::anyhow!(
                        "Canary server unreachable after {} attempts: {}",
                        MAX_RETRIES,
                        e
                    ));
                }

                warn!(
                    "Canary server not ready (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

//! Helm release installer
//!
//! Drives the `helm` binary for the release reconciler. The `helm test`
//! command built here is what validation workers run inside their container.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use canary_core::domain::release::{ChartSource, HelmReleaseInfo, Release};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("chart source {0} is not supported")]
    UnsupportedSource(ChartSource),

    #[error("chart source {0} is missing its settings")]
    MissingChart(ChartSource),

    #[error("helm {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("failed to run helm: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected helm output: {0}")]
    Parse(String),
}

/// Parameters of a `helm test` invocation
#[derive(Debug, Clone)]
pub struct TestRequest<'a> {
    pub release_name: &'a str,
    pub namespace: &'a str,
    pub timeout: Duration,
    pub logs: bool,
    pub filter: &'a str,
}

#[async_trait]
pub trait ReleaseInstaller: Send + Sync {
    /// Installs the release, or upgrades it in place when it exists
    async fn install_or_upgrade(&self, release: &Release) -> Result<HelmReleaseInfo, InstallError>;

    /// Uninstalls the release; a release that is already gone is fine
    async fn uninstall(&self, release: &Release) -> Result<(), InstallError>;
}

/// `helm test` arguments, without the binary
pub fn test_args(request: &TestRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "test".to_string(),
        request.release_name.to_string(),
        "--namespace".to_string(),
        request.namespace.to_string(),
        "--timeout".to_string(),
        format!("{}s", request.timeout.as_secs().max(1)),
    ];

    if request.logs {
        args.push("--logs".to_string());
    }

    if !request.filter.is_empty() {
        args.push("--filter".to_string());
        args.push(request.filter.to_string());
    }

    args
}

/// `helm upgrade --install` arguments; values are read from stdin
fn install_args(release: &Release) -> Result<Vec<String>, InstallError> {
    let chart = &release.spec.chart;
    let deployment = &release.spec.deployment;

    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.metadata.name.clone(),
    ];

    match chart.source {
        ChartSource::Repository => {
            let repo = chart
                .repository
                .as_ref()
                .ok_or(InstallError::MissingChart(chart.source))?;
            args.push(repo.name.clone());
            args.push("--repo".to_string());
            args.push(repo.url.clone());
            if !repo.version.is_empty() {
                args.push("--version".to_string());
                args.push(repo.version.clone());
            }
        }
        ChartSource::Local => {
            let local = chart
                .local
                .as_ref()
                .ok_or(InstallError::MissingChart(chart.source))?;
            args.push(local.path.clone());
        }
        ChartSource::Git => return Err(InstallError::UnsupportedSource(chart.source)),
    }

    args.extend([
        "--namespace".to_string(),
        release.deployment_namespace().to_string(),
        "--timeout".to_string(),
        format!("{}s", deployment.timeout.as_secs().max(1)),
        "--wait".to_string(),
        "--output".to_string(),
        "json".to_string(),
        "--values".to_string(),
        "-".to_string(),
    ]);

    if deployment.create_namespace {
        args.push("--create-namespace".to_string());
    }

    Ok(args)
}

/// Helm CLI implementation of [`ReleaseInstaller`]
pub struct HelmCli {
    bin: String,
    kubeconfig: Option<PathBuf>,
}

impl HelmCli {
    pub fn new(bin: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            kubeconfig,
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.bin);
        if let Some(path) = &self.kubeconfig {
            command.env("KUBECONFIG", path);
        }
        command
    }

    /// Runs helm, feeding `stdin`, and returns stdout
    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<String, InstallError> {
        debug!("Running {} {}", self.bin, args.join(" "));

        let mut child = self
            .command()
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !stderr.trim().is_empty() {
            debug!("helm stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            return Err(InstallError::Command {
                command: args.first().cloned().unwrap_or_default(),
                message: format!(
                    "exit_code={}, stderr='{}'",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            });
        }

        Ok(stdout)
    }
}

#[derive(Debug, Deserialize)]
struct HelmReleaseOutput {
    name: String,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    info: HelmReleaseOutputInfo,
}

#[derive(Debug, Default, Deserialize)]
struct HelmReleaseOutputInfo {
    #[serde(default)]
    status: String,
}

fn parse_release_output(stdout: &str) -> Result<HelmReleaseInfo, InstallError> {
    let parsed: HelmReleaseOutput =
        serde_json::from_str(stdout.trim()).map_err(|e| InstallError::Parse(e.to_string()))?;

    Ok(HelmReleaseInfo {
        name: parsed.name,
        version: parsed.version,
        status: parsed.info.status,
    })
}

#[async_trait]
impl ReleaseInstaller for HelmCli {
    async fn install_or_upgrade(&self, release: &Release) -> Result<HelmReleaseInfo, InstallError> {
        let args = install_args(release)?;
        let values = release
            .spec
            .values
            .inline
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());

        info!(
            "Installing release {} into {}",
            release.metadata.name,
            release.deployment_namespace()
        );

        let stdout = self.run(&args, Some(values)).await?;
        parse_release_output(&stdout)
    }

    async fn uninstall(&self, release: &Release) -> Result<(), InstallError> {
        let args = vec![
            "uninstall".to_string(),
            release.metadata.name.clone(),
            "--namespace".to_string(),
            release.deployment_namespace().to_string(),
            "--wait".to_string(),
        ];

        info!("Uninstalling release {}", release.metadata.name);

        match self.run(&args, None).await {
            Ok(_) => Ok(()),
            Err(InstallError::Command { message, .. }) if message.contains("not found") => {
                debug!("Release {} was already gone", release.metadata.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

//! Podman worker runtime
//!
//! Each worker is one detached container named `{namespace}.{name}`.
//! Container labels carry the worker's identity and owner so workers can
//! be listed and swept without any local bookkeeping:
//! - `run -d` creates a worker, `container inspect` observes it
//! - exit code 0 maps to a completion condition, anything else to failure
//! - `ps -a --filter label=...` lists every managed worker

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use canary_core::domain::worker::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, NAMESPACE_LABEL, WorkerCondition, WorkerRecord,
    WorkerStatus, WorkerUnit,
};
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::worker::{WorkerError, WorkerRuntime};

/// Where a configured kubeconfig is mounted inside workers
const KUBECONFIG_MOUNT: &str = "/etc/canary/kubeconfig";

/// Checks that the podman binary runs
pub async fn check_podman_available(bin: &str) -> Result<String, WorkerError> {
    let output = Command::new(bin).arg("--version").output().await?;

    if !output.status.success() {
        return Err(WorkerError::Command(format!(
            "{} --version exited with {}",
            bin,
            output.status.code().unwrap_or(-1)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct PodmanRuntime {
    bin: String,
    /// Kubeconfig handed to every worker, read-only
    kubeconfig: Option<PathBuf>,
}

impl PodmanRuntime {
    pub fn new(bin: impl Into<String>, kubeconfig: Option<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            kubeconfig,
        }
    }

    /// Runs podman and returns stdout; a non-zero exit becomes `Command`
    async fn podman(&self, args: &[String]) -> Result<String, WorkerError> {
        debug!("Running {} {}", self.bin, args.join(" "));

        let output = Command::new(&self.bin).args(args).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !stderr.trim().is_empty() {
            debug!("podman stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            return Err(WorkerError::Command(format!(
                "podman {}: exit_code={}, stderr='{}'",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(stdout)
    }
}

pub fn container_name(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

/// `podman run` arguments for a worker
pub fn run_args(unit: &WorkerUnit, kubeconfig: Option<&PathBuf>) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        container_name(&unit.namespace, &unit.name),
        "--restart=no".to_string(),
    ];

    for (key, value) in &unit.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for var in &unit.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", var.name, var.value));
    }

    if let Some(path) = kubeconfig {
        args.push("-v".to_string());
        args.push(format!("{}:{}:ro", path.display(), KUBECONFIG_MOUNT));
        args.push("-e".to_string());
        args.push(format!("KUBECONFIG={}", KUBECONFIG_MOUNT));
    }

    if let Some(deadline) = unit.active_deadline {
        args.push("--timeout".to_string());
        args.push(deadline.as_secs().max(1).to_string());
    }

    match unit.command.split_first() {
        Some((entrypoint, rest)) => {
            args.push("--entrypoint".to_string());
            args.push(entrypoint.clone());
            args.push(unit.image.clone());
            args.extend(rest.iter().cloned());
        }
        None => args.push(unit.image.clone()),
    }

    args
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    name: String,
    state: ContainerState,
    #[serde(default)]
    config: InspectedConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default, rename = "OOMKilled")]
    pub oom_killed: bool,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Maps a container state onto worker conditions
pub fn status_from_state(state: &ContainerState) -> WorkerStatus {
    let mut status = WorkerStatus {
        started_at: state.started_at.as_deref().and_then(parse_time),
        finished_at: state.finished_at.as_deref().and_then(parse_time),
        ..Default::default()
    };

    if state.running {
        status.active = 1;
        return status;
    }

    if state.status == "exited" || state.status == "stopped" {
        let condition = if state.oom_killed {
            WorkerCondition::failed("OOMKilled")
        } else if state.exit_code == 0 {
            WorkerCondition::complete()
        } else {
            WorkerCondition::failed(format!("exit code {}", state.exit_code))
        };
        status.conditions.push(condition);
    }

    status
}

/// Podman reports unset times as the zero time
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}

fn parse_inspect(stdout: &str) -> Result<Option<WorkerRecord>, WorkerError> {
    let containers: Vec<InspectedContainer> =
        serde_json::from_str(stdout.trim()).map_err(|e| WorkerError::Parse(e.to_string()))?;

    Ok(containers.into_iter().next().map(|c| {
        let labels = c.config.labels.unwrap_or_default();
        let (namespace, name) = split_container_name(&c.name, &labels);
        WorkerRecord {
            name,
            namespace,
            labels,
            status: status_from_state(&c.state),
        }
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedContainer {
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    exit_code: i32,
}

fn parse_ps(stdout: &str) -> Result<Vec<WorkerRecord>, WorkerError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let listed: Vec<ListedContainer> =
        serde_json::from_str(stdout.trim()).map_err(|e| WorkerError::Parse(e.to_string()))?;

    Ok(listed
        .into_iter()
        .filter_map(|c| {
            let full_name = c.names.first()?.clone();
            let labels = c.labels.unwrap_or_default();
            let (namespace, name) = split_container_name(&full_name, &labels);
            let state = ContainerState {
                running: c.state == "running",
                status: c.state,
                exit_code: c.exit_code,
                ..Default::default()
            };
            Some(WorkerRecord {
                name,
                namespace,
                labels,
                status: status_from_state(&state),
            })
        })
        .collect())
}

/// Recovers (namespace, worker name) from a container name
fn split_container_name(full: &str, labels: &BTreeMap<String, String>) -> (String, String) {
    let full = full.trim_start_matches('/');
    if let Some(namespace) = labels.get(NAMESPACE_LABEL) {
        if let Some(name) = full.strip_prefix(&format!("{}.", namespace)) {
            return (namespace.clone(), name.to_string());
        }
    }
    match full.split_once('.') {
        Some((namespace, name)) => (namespace.to_string(), name.to_string()),
        None => (String::new(), full.to_string()),
    }
}

fn is_missing(error: &WorkerError) -> bool {
    matches!(error, WorkerError::Command(message) if message.contains("no such container"))
}

#[async_trait]
impl WorkerRuntime for PodmanRuntime {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<WorkerRecord>, WorkerError> {
        let args = vec![
            "container".to_string(),
            "inspect".to_string(),
            container_name(namespace, name),
        ];

        match self.podman(&args).await {
            Ok(stdout) => parse_inspect(&stdout),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, unit: &WorkerUnit) -> Result<WorkerRecord, WorkerError> {
        let args = run_args(unit, self.kubeconfig.as_ref());

        match self.podman(&args).await {
            Ok(id) => info!(
                "Started worker {}/{} (container {})",
                unit.namespace,
                unit.name,
                id.trim()
            ),
            Err(WorkerError::Command(message)) if message.contains("already in use") => {
                return Err(WorkerError::AlreadyExists(unit.name.clone()));
            }
            Err(e) => return Err(e),
        }

        self.get(&unit.namespace, &unit.name)
            .await?
            .ok_or_else(|| WorkerError::Command(format!("worker {} vanished after start", unit.name)))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), WorkerError> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            "--ignore".to_string(),
            container_name(namespace, name),
        ];
        self.podman(&args).await?;
        info!("Removed worker {}/{}", namespace, name);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<WorkerRecord>, WorkerError> {
        let args = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={}={}", MANAGED_BY_LABEL, MANAGED_BY_VALUE),
            "--format".to_string(),
            "json".to_string(),
        ];
        let stdout = self.podman(&args).await?;
        parse_ps(&stdout)
    }

    async fn logs(&self, namespace: &str, name: &str, tail: usize) -> Result<String, WorkerError> {
        let args = vec![
            "logs".to_string(),
            "--tail".to_string(),
            tail.to_string(),
            container_name(namespace, name),
        ];
        self.podman(&args).await
    }
}

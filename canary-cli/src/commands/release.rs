//! Release command handlers

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canary_core::domain::meta::ObjectKey;
use canary_core::domain::release::{self, Release, ReleasePhase};
use canary_core::dto::release::ReleaseSummary;

use super::{format_time, print_applied};
use crate::config::Config;
use crate::manifest;
use canary_client::CanaryClient;

/// Release subcommands
#[derive(Subcommand)]
pub enum ReleaseCommands {
    /// List releases
    List {
        /// Only list releases in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Get release details
    Get {
        /// Release as namespace/name
        release: ObjectKey,
    },
    /// Create or update a release from a JSON manifest
    Apply {
        /// Path to the manifest
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a release
    Delete {
        /// Release as namespace/name
        release: ObjectKey,
    },
}

pub async fn handle_release_command(command: ReleaseCommands, config: &Config) -> Result<()> {
    let client = CanaryClient::new(&config.server_url);

    match command {
        ReleaseCommands::List { namespace } => list_releases(&client, namespace.as_deref()).await,
        ReleaseCommands::Get { release } => get_release(&client, &release).await,
        ReleaseCommands::Apply { file } => apply_release(&client, &file).await,
        ReleaseCommands::Delete { release } => delete_release(&client, &release).await,
    }
}

async fn list_releases(client: &CanaryClient, namespace: Option<&str>) -> Result<()> {
    let releases = client.list_releases(namespace).await?;

    if releases.is_empty() {
        println!("{}", "No releases found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} release(s):", releases.len()).bold());
    println!();
    for release in releases {
        print_release_summary(&ReleaseSummary::from(release));
    }

    Ok(())
}

async fn get_release(client: &CanaryClient, key: &ObjectKey) -> Result<()> {
    let release = client.get_release(key).await?;
    print_release_details(&release);
    Ok(())
}

/// Creates the release, or replaces its spec if it already exists
async fn apply_release(client: &CanaryClient, path: &Path) -> Result<()> {
    let release: Release = manifest::load(path, release::KIND)?;
    let key = release.metadata.key();

    let (stored, created) = match client.create_release(&release).await {
        Ok(stored) => (stored, true),
        Err(e) if e.is_conflict() => (client.update_release(&release).await?, false),
        Err(e) => return Err(e.into()),
    };

    print_applied("Release", &key, created, stored.metadata.generation);
    Ok(())
}

async fn delete_release(client: &CanaryClient, key: &ObjectKey) -> Result<()> {
    client.delete_release(key).await?;
    println!("{} Release {} deleted", "✓".green(), key.to_string().cyan());
    Ok(())
}

fn print_release_summary(summary: &ReleaseSummary) {
    println!(
        "  {} {}/{}",
        "▸".cyan(),
        summary.namespace.dimmed(),
        summary.name.bold()
    );
    println!("    Phase:      {}", colorize_phase(summary.phase));
    println!("    Chart:      {}", summary.source);
    println!("    Deploys to: {}", summary.deployment_namespace);
    if summary.deployed_at.is_some() {
        println!("    Deployed:   {}", format_time(summary.deployed_at).dimmed());
    }
    if !summary.message.is_empty() {
        println!("    Message:    {}", summary.message.dimmed());
    }
    println!();
}

fn print_release_details(release: &Release) {
    let spec = &release.spec;
    let status = &release.status;

    println!("{}", "Release Details:".bold());
    println!("  Name:         {}", release.metadata.key().to_string().cyan());
    println!("  UID:          {}", release.metadata.uid.to_string().dimmed());
    println!("  Generation:   {}", release.metadata.generation);
    println!("  Chart:        {}", describe_chart(release));
    println!("  Deploys to:   {}", release.deployment_namespace());
    println!("  Timeout:      {:?}", spec.deployment.timeout);
    println!("  Retries:      {}", spec.deployment.retries);
    if let Some(after) = spec.deployment.auto_uninstall_after {
        println!("  Uninstall:    {:?} after deploy", after);
    }

    println!("\n{}", "Status:".bold());
    println!("  Phase:        {}", colorize_phase(status.phase));
    println!("  Deployed:     {}", format_time(status.deployed_at));
    if status.uninstall_at.is_some() {
        println!("  Uninstall at: {}", format_time(status.uninstall_at));
    }
    if status.retry_count > 0 {
        println!("  Retry count:  {}", status.retry_count);
    }
    if let Some(helm) = &status.helm_release {
        println!(
            "  Helm:         {} revision {} ({})",
            helm.name, helm.version, helm.status
        );
    }
    if !status.message.is_empty() {
        println!("  Message:      {}", status.message);
    }
}

fn describe_chart(release: &Release) -> String {
    let chart = &release.spec.chart;
    if let Some(repo) = &chart.repository {
        let version = if repo.version.is_empty() { "latest" } else { repo.version.as_str() };
        return format!("{} from {} ({})", repo.name, repo.url, version);
    }
    if let Some(git) = &chart.git {
        return format!("{}@{}:{}", git.url, git.r#ref, git.path);
    }
    if let Some(local) = &chart.local {
        return local.path.clone();
    }
    chart.source.to_string()
}

fn colorize_phase(phase: ReleasePhase) -> ColoredString {
    let phase_str = phase.to_string();
    match phase {
        ReleasePhase::Pending => phase_str.yellow(),
        ReleasePhase::Installing | ReleasePhase::Uninstalling => phase_str.cyan(),
        ReleasePhase::Installed => phase_str.green(),
        ReleasePhase::Failed => phase_str.red(),
        ReleasePhase::Uninstalled => phase_str.dimmed(),
    }
}

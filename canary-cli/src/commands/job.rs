//! Test job command handlers
//!
//! Listing, inspection and manifest apply for test jobs, plus a status
//! view with per-hook and per-test results.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use canary_core::domain::meta::ObjectKey;
use canary_core::domain::test_job::{self, HookResult, JobPhase, TestJob, TestResult};
use canary_core::dto::test_job::TestJobSummary;

use super::{format_time, print_applied};
use crate::config::Config;
use crate::manifest;
use canary_client::CanaryClient;

/// Test job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List test jobs
    List {
        /// Only list jobs in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Get test job details
    Get {
        /// Test job as namespace/name
        job: ObjectKey,
    },
    /// Create or update a test job from a JSON manifest
    Apply {
        /// Path to the manifest
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a test job
    Delete {
        /// Test job as namespace/name
        job: ObjectKey,
    },
    /// Show the current run of a test job
    Status {
        /// Test job as namespace/name
        job: ObjectKey,

        /// Print the captured test logs
        #[arg(short, long)]
        logs: bool,
    },
}

pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let client = CanaryClient::new(&config.server_url);

    match command {
        JobCommands::List { namespace } => list_jobs(&client, namespace.as_deref()).await,
        JobCommands::Get { job } => get_job(&client, &job).await,
        JobCommands::Apply { file } => apply_job(&client, &file).await,
        JobCommands::Delete { job } => delete_job(&client, &job).await,
        JobCommands::Status { job, logs } => job_status(&client, &job, logs).await,
    }
}

async fn list_jobs(client: &CanaryClient, namespace: Option<&str>) -> Result<()> {
    let jobs = client.list_test_jobs(namespace).await?;

    if jobs.is_empty() {
        println!("{}", "No test jobs found.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} test job(s):", jobs.len()).bold());
    println!();
    for job in jobs {
        print_job_summary(&TestJobSummary::from(job));
    }

    Ok(())
}

async fn get_job(client: &CanaryClient, key: &ObjectKey) -> Result<()> {
    let job = client.get_test_job(key).await?;
    print_job_details(&job);
    Ok(())
}

/// Creates the job, or replaces its spec if it already exists
async fn apply_job(client: &CanaryClient, path: &Path) -> Result<()> {
    let job: TestJob = manifest::load(path, test_job::KIND)?;
    let key = job.metadata.key();

    let (stored, created) = match client.create_test_job(&job).await {
        Ok(stored) => (stored, true),
        Err(e) if e.is_conflict() => (client.update_test_job(&job).await?, false),
        Err(e) => return Err(e.into()),
    };

    print_applied("TestJob", &key, created, stored.metadata.generation);
    Ok(())
}

async fn delete_job(client: &CanaryClient, key: &ObjectKey) -> Result<()> {
    client.delete_test_job(key).await?;
    println!("{} TestJob {} deleted", "✓".green(), key.to_string().cyan());
    Ok(())
}

async fn job_status(client: &CanaryClient, key: &ObjectKey, show_logs: bool) -> Result<()> {
    let job = client.get_test_job(key).await?;
    let status = &job.status;

    println!(
        "{} {}",
        job.metadata.key().to_string().cyan(),
        colorize_phase(status.phase())
    );
    if let Some(stage) = status.current_stage {
        println!("  Stage:     {} (index {})", stage, status.current_index);
    }
    println!("  Started:   {}", format_time(status.start_time));
    println!("  Completed: {}", format_time(status.completion_time));
    if !status.message.is_empty() {
        println!("  Message:   {}", status.message);
    }

    print_hook_results("Pre-test hooks", &status.hook_results.pre_test);
    print_test_results(&status.test_results, show_logs);
    print_hook_results("Post-test hooks", &status.hook_results.post_test);

    Ok(())
}

fn print_job_summary(summary: &TestJobSummary) {
    println!(
        "  {} {}/{}",
        "▸".cyan(),
        summary.namespace.dimmed(),
        summary.name.bold()
    );
    println!("    Release:  {}", summary.release);
    println!("    Schedule: {}", summary.schedule);
    println!("    Phase:    {}", colorize_phase(summary.phase));
    if let Some(stage) = summary.current_stage {
        println!("    Stage:    {}", stage);
    }
    if summary.next_schedule_time.is_some() {
        println!("    Next run: {}", format_time(summary.next_schedule_time).dimmed());
    }
    if !summary.message.is_empty() {
        println!("    Message:  {}", summary.message.dimmed());
    }
    println!();
}

fn print_job_details(job: &TestJob) {
    let spec = &job.spec;
    let status = &job.status;

    println!("{}", "Test Job Details:".bold());
    println!("  Name:       {}", job.metadata.key().to_string().cyan());
    println!("  UID:        {}", job.metadata.uid.to_string().dimmed());
    println!("  Release:    {}", job.release_key());
    match spec.schedule.kind {
        test_job::ScheduleKind::Once => {
            println!("  Schedule:   once, {:?} after creation", spec.schedule.delay)
        }
        test_job::ScheduleKind::Cron => {
            let timezone = if spec.schedule.timezone.is_empty() {
                "default timezone"
            } else {
                spec.schedule.timezone.as_str()
            };
            println!("  Schedule:   {} ({})", spec.schedule.cron, timezone);
        }
    }
    let image = if spec.test.image.is_empty() {
        "<controller default>"
    } else {
        spec.test.image.as_str()
    };
    println!("  Image:      {}", image);
    println!("  Timeout:    {:?}", spec.test.timeout);
    if !spec.test.filter.is_empty() {
        println!("  Filter:     {}", spec.test.filter);
    }

    if !spec.hooks.pre_test.is_empty() || !spec.hooks.post_test.is_empty() {
        println!("\n{}", "Hooks:".bold());
        for hook in &spec.hooks.pre_test {
            println!("  pre-test   {} ({})", hook.name.cyan(), hook.action.type_name());
        }
        for hook in &spec.hooks.post_test {
            println!("  post-test  {} ({})", hook.name.cyan(), hook.action.type_name());
        }
    }

    println!("\n{}", "Status:".bold());
    println!("  Phase:      {}", colorize_phase(status.phase()));
    println!("  Last run:   {}", format_time(status.last_schedule_time));
    println!("  Next run:   {}", format_time(status.next_schedule_time));
    if !status.message.is_empty() {
        println!("  Message:    {}", status.message);
    }
}

fn print_hook_results(title: &str, results: &[HookResult]) {
    if results.is_empty() {
        return;
    }

    println!("\n{}", format!("{}:", title).bold());
    for result in results {
        println!(
            "  {} {} {}",
            phase_marker(result.phase),
            result.name,
            result.worker_name.dimmed()
        );
        if !result.message.is_empty() {
            println!("      {}", result.message.dimmed());
        }
    }
}

fn print_test_results(results: &[TestResult], show_logs: bool) {
    if results.is_empty() {
        return;
    }

    println!("\n{}", "Tests:".bold());
    for result in results {
        println!("  {} {}", phase_marker(result.phase), result.name);
        if let (Some(started), Some(completed)) = (result.started_at, result.completed_at) {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("      Duration: {}s", seconds);
        }

        if show_logs && !result.logs.is_empty() {
            println!("{}", "─".repeat(80).dimmed());
            println!("{}", result.logs.trim_end());
            println!("{}", "─".repeat(80).dimmed());
        }
    }
}

fn phase_marker(phase: JobPhase) -> ColoredString {
    match phase {
        JobPhase::Succeeded => "✓".green(),
        JobPhase::Failed => "✗".red(),
        JobPhase::Running => "●".cyan(),
        JobPhase::Pending => "○".yellow(),
    }
}

fn colorize_phase(phase: JobPhase) -> ColoredString {
    let phase_str = phase.to_string();
    match phase {
        JobPhase::Pending => phase_str.yellow(),
        JobPhase::Running => phase_str.cyan(),
        JobPhase::Succeeded => phase_str.green(),
        JobPhase::Failed => phase_str.red(),
    }
}

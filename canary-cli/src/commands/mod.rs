//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod release;

pub use job::JobCommands;
pub use release::ReleaseCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;

use crate::config::Config;
use canary_core::domain::meta::ObjectKey;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Release management
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },
    /// Test job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Release { command } => release::handle_release_command(command, config).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
    }
}

/// Prints the result of an apply
fn print_applied(kind: &str, key: &ObjectKey, created: bool, generation: i64) {
    if !created {
        println!(
            "{} {} {} updated (generation {})",
            "✓".green(),
            kind,
            key.to_string().cyan(),
            generation
        );
    } else {
        println!("{} {} {} created", "✓".green(), kind, key.to_string().cyan());
    }
}

/// Formats an optional timestamp, `-` when unset
fn format_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

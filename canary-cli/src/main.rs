//! Canary CLI
//!
//! Command-line interface for managing releases and test jobs stored in
//! the canary server.

mod commands;
mod config;
mod manifest;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "canary")]
#[command(about = "Scheduled Helm release testing", long_about = None)]
struct Cli {
    /// Canary server URL
    #[arg(long, env = "CANARY_SERVER_URL", default_value = "http://localhost:8080")]
    server_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        server_url: cli.server_url,
    };

    handle_command(cli.command, &config).await
}

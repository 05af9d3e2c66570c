//! # Insights CLI Binary
//!
//! Command-line interface for generating and inspecting comparison insights.

use anyhow::Result;
use clap::Parser;
use insights_engine::cli::{Cli, CliHandler};
use insights_engine::logging::initialize_logging;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    // Parse CLI arguments
    let cli = Cli::parse();

    let config = cli.load_config()?;
    initialize_logging(&config.logging)?;
    tracing::info!("🚀 insights-cli {} starting", insights_engine::VERSION);

    // Create CLI handler
    let handler = CliHandler::new(config)?;

    // Handle command
    handler.handle_command(cli.command).await
}

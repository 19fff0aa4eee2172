//! Cost Manager CLI
//!
//! Provides commands for:
//! - `run`: Execute the pipeline for specific dates or a date range
//! - `backfill`: Reload the last N days
//! - `stats`: Show statistics for the target table
//!
//! Exit codes: 0 on full success, 2 when some (scope, date) units failed
//! but others loaded, 1 on a fatal error.

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cost_manager::cli::{backfill, run, stats, Cli, Commands};
use cost_manager::pipeline::RunResult;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("cost_manager=info".parse()?))
        .init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    let code = match cli.command {
        Commands::Run(args) => exit_code(run::execute(args).await),
        Commands::Backfill(args) => exit_code(backfill::execute(args).await),
        Commands::Stats(args) => match stats::execute(args).await {
            Ok(()) => 0,
            Err(e) => {
                error!("stats failed: {e:#}");
                1
            }
        },
    };

    std::process::exit(code)
}

fn exit_code(result: Result<RunResult>) -> i32 {
    match result {
        Ok(run) if run.is_success() => 0,
        Ok(_) => 2,
        Err(e) => {
            error!("run failed: {e:#}");
            1
        }
    }
}

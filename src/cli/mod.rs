//! Command-line interface
//!
//! Provides CLI commands for the cost manager.

pub mod backfill;
pub mod run;
pub mod stats;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::info;

/// Cost Manager CLI
#[derive(Parser)]
#[command(name = "cost-manager")]
#[command(about = "Extracts Azure cost data into a partitioned table")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline for specific dates or a date range
    Run(run::RunArgs),
    /// Backfill the last N days
    Backfill(backfill::BackfillArgs),
    /// Show statistics for the target table
    Stats(stats::StatsArgs),
}

/// Broadcast receiver that fires once on Ctrl-C. The orchestrator checks
/// it between dates, so the unit in flight always finishes.
pub(crate) fn shutdown_signal() -> broadcast::Receiver<()> {
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, finishing current date");
            let _ = tx.send(());
        }
    });
    rx
}

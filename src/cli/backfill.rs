//! Backfill command - reload a trailing window of days
//!
//! Processes the last N days ending yesterday, oldest first, so a
//! partially completed backfill leaves a contiguous historical prefix.

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::config::Settings;
use crate::pipeline::{PipelineOrchestrator, RunResult};
use crate::storage::{build_sink, WriteMode};

/// Arguments for the backfill command
#[derive(Args)]
pub struct BackfillArgs {
    /// Number of days to backfill, ending yesterday
    #[arg(long, short, default_value_t = 30)]
    pub days: u32,

    /// Append rows instead of the idempotent merge
    #[arg(long)]
    pub append: bool,
}

/// Execute the backfill command
pub async fn execute(args: BackfillArgs) -> Result<RunResult> {
    let mode = if args.append {
        WriteMode::Append
    } else {
        WriteMode::Merge
    };
    info!(days = args.days, ?mode, "backfill command");

    let settings = Settings::load()?;
    let sink = build_sink(&settings).await?;
    let mut orchestrator =
        PipelineOrchestrator::new(&settings, sink)?.with_shutdown(super::shutdown_signal());

    let result = orchestrator.run_backfill(args.days, mode).await?;
    Ok(result)
}

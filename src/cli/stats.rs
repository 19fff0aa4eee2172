//! Stats command - report on the target table

use anyhow::Result;
use clap::Args;

use crate::config::Settings;
use crate::storage::build_sink;

/// Arguments for the stats command
#[derive(Args)]
pub struct StatsArgs {}

/// Execute the stats command
pub async fn execute(_args: StatsArgs) -> Result<()> {
    let settings = Settings::load()?;
    let sink = build_sink(&settings).await?;
    let stats = sink.stats().await?;

    println!("Cost table statistics");
    println!("  rows:       {}", stats.row_count);
    println!("  partitions: {}", stats.partition_count);
    println!("  scopes:     {}", stats.scope_count);
    match (stats.min_cost_date, stats.max_cost_date) {
        (Some(min), Some(max)) => println!("  date span:  {min} to {max}"),
        _ => println!("  date span:  (empty)"),
    }
    Ok(())
}

//! Run command - execute the pipeline for explicit dates
//!
//! With no date arguments the pipeline processes yesterday, which is the
//! newest day the Cost Management API reports completely. A --start/--end
//! range or --lifetime runs as a single range query.

use anyhow::Result;
use chrono::{Duration, Months, NaiveDate, Utc};
use clap::Args;
use tracing::info;

use crate::config::Settings;
use crate::extract::DateRange;
use crate::pipeline::{PipelineOrchestrator, RunResult};
use crate::storage::{build_sink, WriteMode};

/// Months of history the Cost Management API retains.
const LIFETIME_MONTHS: u32 = 13;

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Usage dates to process (comma-separated, YYYY-MM-DD)
    #[arg(long, short, value_delimiter = ',')]
    pub date: Vec<String>,

    /// Start of a date range (YYYY-MM-DD, used with --end)
    #[arg(long, conflicts_with = "date")]
    pub start: Option<String>,

    /// End of a date range (YYYY-MM-DD, used with --start)
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Extract all available history (about 13 months) as one range
    #[arg(long, conflicts_with_all = ["date", "start", "end"])]
    pub lifetime: bool,

    /// Append rows instead of the idempotent merge
    #[arg(long)]
    pub append: bool,
}

/// What a run processes: individual dates, each its own unit, or one
/// inclusive range queried as a single unit.
#[derive(Debug, PartialEq, Eq)]
pub enum RunPlan {
    Dates(Vec<NaiveDate>),
    Range(DateRange),
}

impl RunArgs {
    /// Resolve the dates or range to process.
    pub fn plan(&self, today: NaiveDate) -> Result<RunPlan> {
        if self.lifetime {
            let start = today
                .checked_sub_months(Months::new(LIFETIME_MONTHS))
                .ok_or_else(|| anyhow::anyhow!("cannot compute lifetime start from {today}"))?;
            let range = DateRange::new(start, today).map_err(|e| anyhow::anyhow!(e))?;
            return Ok(RunPlan::Range(range));
        }

        if !self.date.is_empty() {
            let mut dates = self
                .date
                .iter()
                .map(|d| parse_date(d))
                .collect::<Result<Vec<_>>>()?;
            dates.sort();
            dates.dedup();
            return Ok(RunPlan::Dates(dates));
        }

        if let Some(start) = &self.start {
            let start = parse_date(start)?;
            let end = match &self.end {
                Some(end) => parse_date(end)?,
                None => start,
            };
            let range = DateRange::new(start, end).map_err(|e| anyhow::anyhow!(e))?;
            return Ok(RunPlan::Range(range));
        }

        Ok(RunPlan::Dates(vec![today - Duration::days(1)]))
    }

    pub fn mode(&self) -> WriteMode {
        if self.append {
            WriteMode::Append
        } else {
            WriteMode::Merge
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date {s:?}: {e}"))
}

/// Execute the run command
pub async fn execute(args: RunArgs) -> Result<RunResult> {
    let plan = args.plan(Utc::now().date_naive())?;
    let mode = args.mode();
    info!(?plan, ?mode, "run command");

    let settings = Settings::load()?;
    let sink = build_sink(&settings).await?;
    let mut orchestrator =
        PipelineOrchestrator::new(&settings, sink)?.with_shutdown(super::shutdown_signal());

    let result = match plan {
        RunPlan::Dates(dates) => orchestrator.run(&dates, mode).await?,
        RunPlan::Range(range) => orchestrator.run_range(range, mode).await?,
    };
    Ok(result)
}

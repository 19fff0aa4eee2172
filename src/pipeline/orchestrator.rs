//! Pipeline orchestrator

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::auth::{AuthError, CredentialManager};
use crate::config::Settings;
use crate::extract::{CostExtractor, CostQueryClient, DateRange, ExtractError};
use crate::schema::ScopeDescriptor;
use crate::storage::{CostTableSink, TableLoader, WriteMode};

/// Errors fatal to a whole run. Per-unit extraction and load failures
/// are contained in the run summary instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid dates: {0}")]
    InvalidDates(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// One failed (scope, date) unit.
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub scope: String,
    pub date: String,
    pub reason: String,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub total_records: usize,
    pub records_per_scope: HashMap<String, usize>,
    pub records_per_date: HashMap<String, usize>,
    pub failures: Vec<UnitFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Log the run summary at the appropriate level.
    pub fn log_summary(&self) {
        info!(
            total_records = self.total_records,
            dates = self.records_per_date.len(),
            scopes = self.records_per_scope.len(),
            elapsed = ?self.elapsed(),
            "run complete"
        );
        let mut dates: Vec<_> = self.records_per_date.iter().collect();
        dates.sort();
        for (date, count) in dates {
            info!("  {date}: {count} records");
        }
        for failure in &self.failures {
            warn!(
                scope = %failure.scope,
                date = %failure.date,
                "unit failed: {}",
                failure.reason
            );
        }
    }
}

/// Runs the extract-and-load pipeline over dates and scopes.
///
/// Dates are processed sequentially; within a date all scopes are
/// extracted through the bounded pool and loaded one scope at a time.
/// A failing unit is recorded and never aborts the remaining units.
pub struct PipelineOrchestrator {
    scopes: Vec<ScopeDescriptor>,
    credentials: Arc<CredentialManager>,
    extractor: CostExtractor,
    loader: TableLoader,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl PipelineOrchestrator {
    pub fn new(settings: &Settings, sink: Arc<dyn CostTableSink>) -> PipelineResult<Self> {
        settings.validate()?;
        let scopes = ScopeDescriptor::parse_all(&settings.scopes);

        let timeout = Duration::from_secs(settings.http.request_timeout_secs);
        let credentials = Arc::new(
            CredentialManager::new(&settings.azure, timeout)
                .map_err(PipelineError::Auth)?,
        );
        let client = CostQueryClient::new(settings, credentials.clone())?;
        let extractor = CostExtractor::new(settings, client);

        Ok(Self {
            scopes,
            credentials,
            extractor,
            loader: TableLoader::new(sink),
            shutdown: None,
        })
    }

    /// Attach a shutdown signal, checked between date units. The unit in
    /// flight always completes so no partition is left half-written.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run for a set of individual dates.
    pub async fn run(&mut self, dates: &[NaiveDate], mode: WriteMode) -> PipelineResult<RunResult> {
        if dates.is_empty() {
            return Err(PipelineError::InvalidDates(
                "no dates to process".to_string(),
            ));
        }
        let ranges: Vec<DateRange> = dates.iter().map(|d| DateRange::single(*d)).collect();
        self.run_units(&ranges, mode).await
    }

    /// Run for one inclusive date range as a single query unit.
    pub async fn run_range(
        &mut self,
        range: DateRange,
        mode: WriteMode,
    ) -> PipelineResult<RunResult> {
        self.run_units(&[range], mode).await
    }

    /// Backfill the last `days` days ending yesterday, oldest first.
    pub async fn run_backfill(&mut self, days: u32, mode: WriteMode) -> PipelineResult<RunResult> {
        if days == 0 {
            return Err(PipelineError::InvalidDates(
                "backfill needs at least one day".to_string(),
            ));
        }
        let yesterday = Utc::now().date_naive() - ChronoDuration::days(1);
        let dates: Vec<NaiveDate> = (0..days)
            .rev()
            .map(|offset| yesterday - ChronoDuration::days(offset as i64))
            .collect();
        info!(days, from = %dates[0], to = %yesterday, "starting backfill");
        self.run(&dates, mode).await
    }

    async fn run_units(
        &mut self,
        ranges: &[DateRange],
        mode: WriteMode,
    ) -> PipelineResult<RunResult> {
        let started_at = Utc::now();
        info!(
            units = ranges.len(),
            scopes = self.scopes.len(),
            ?mode,
            "starting pipeline run"
        );

        // Acquire a token up front: a run that cannot authenticate at all
        // should fail fast instead of recording one failure per unit.
        self.credentials.authorization_header().await?;

        let mut result = RunResult {
            total_records: 0,
            records_per_scope: HashMap::new(),
            records_per_date: HashMap::new(),
            failures: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        for range in ranges {
            if self.shutdown_requested() {
                warn!(remaining = %range, "shutdown requested, stopping before next date");
                break;
            }
            self.process_range(range, mode, &mut result).await;
        }

        result.finished_at = Utc::now();
        result.log_summary();
        Ok(result)
    }

    async fn process_range(&self, range: &DateRange, mode: WriteMode, result: &mut RunResult) {
        info!(date = %range, "processing");
        let (extractions, failures) = self.extractor.extract(&self.scopes, range).await;

        for failure in failures {
            result.failures.push(UnitFailure {
                scope: failure.scope.name.clone(),
                date: range.label(),
                reason: failure.error.to_string(),
            });
        }

        for extraction in extractions {
            match self
                .loader
                .load(&extraction.scope, &extraction.records, mode)
                .await
            {
                Ok(written) => {
                    result.total_records += written;
                    *result
                        .records_per_scope
                        .entry(extraction.scope.name.clone())
                        .or_default() += written;
                    *result.records_per_date.entry(range.label()).or_default() += written;
                }
                Err(e) => {
                    error!(scope = %extraction.scope, date = %range, error = %e, "load failed");
                    result.failures.push(UnitFailure {
                        scope: extraction.scope.name.clone(),
                        date: range.label(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn shutdown_requested(&mut self) -> bool {
        match &mut self.shutdown {
            Some(rx) => !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
            None => false,
        }
    }
}

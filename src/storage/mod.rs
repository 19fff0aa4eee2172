//! Table storage
//!
//! Defines the sink abstraction for the partitioned cost table and the
//! loader that enriches raw records and writes them. Three sinks:
//! Postgres (production), CSV files (local testing), and an in-memory
//! table used by tests.

mod csv;
mod memory;
mod postgres;

pub use csv::CsvCostTable;
pub use memory::InMemoryCostTable;
pub use postgres::PostgresCostTable;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Settings, StorageMode};
use crate::schema::{CostRecord, EnrichError, EnrichedRecord, ScopeDescriptor};

/// How rows are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Idempotent upsert keyed by the natural row key (default). Safe to
    /// re-run or overlap during backfills.
    Merge,
    /// Plain insert. Faster, but loading the same date twice duplicates
    /// rows; only for callers that guarantee non-overlapping runs.
    Append,
}

/// Statistics about the target table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStats {
    pub row_count: u64,
    pub partition_count: u64,
    pub scope_count: u64,
    pub min_cost_date: Option<NaiveDate>,
    pub max_cost_date: Option<NaiveDate>,
}

/// Load errors, fatal for the (scope, date) unit being written.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("record rejected: {0}")]
    Rejected(#[from] EnrichError),

    #[error("invalid column name: {0:?}")]
    InvalidColumn(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed batch: {0}")]
    MalformedBatch(String),
}

pub type LoadResult<T> = Result<T, LoadError>;

/// An upsert-capable, partition-aware table sink.
///
/// A write must only touch partitions (cost dates) present in the input
/// batch, so the cost of a merge stays proportional to input size.
#[async_trait]
pub trait CostTableSink: Send + Sync {
    /// Upsert the batch keyed by the natural row key.
    async fn merge(&self, batch: &[EnrichedRecord]) -> LoadResult<usize>;

    /// Insert the batch without a key match.
    async fn append(&self, batch: &[EnrichedRecord]) -> LoadResult<usize>;

    /// Current table statistics.
    async fn stats(&self) -> LoadResult<TableStats>;
}

/// Build the natural row key for a record.
///
/// The key is the rendered values of the configured identifying columns
/// that are present in the record, joined with a unit separator. When a
/// response schema carries none of them (e.g. daily granularity without
/// grouping), every data column participates instead, so the key is
/// always non-empty and deterministic for identical rows.
pub fn natural_key(record: &EnrichedRecord, key_columns: &[String]) -> String {
    let mut parts: Vec<String> = key_columns
        .iter()
        .filter_map(|column| record.record.get(column))
        .map(|value| value.render())
        .collect();

    if parts.is_empty() {
        parts = record
            .record
            .fields()
            .iter()
            .map(|(_, value)| value.render())
            .collect();
    }

    parts.join("\u{1f}")
}

/// Enriches raw records and hands them to the configured sink.
pub struct TableLoader {
    sink: Arc<dyn CostTableSink>,
}

impl TableLoader {
    pub fn new(sink: Arc<dyn CostTableSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<dyn CostTableSink> {
        &self.sink
    }

    /// Enrich and write one scope's records. Returns the number of rows
    /// written. A record without a derivable cost date fails the whole
    /// batch; it must never be silently misplaced in another partition.
    pub async fn load(
        &self,
        scope: &ScopeDescriptor,
        records: &[CostRecord],
        mode: WriteMode,
    ) -> LoadResult<usize> {
        if records.is_empty() {
            info!(scope = %scope, "no records to load");
            return Ok(0);
        }

        let ingested_at = Utc::now();
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            match EnrichedRecord::new(record.clone(), scope, ingested_at) {
                Ok(enriched) => batch.push(enriched),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "rejecting batch");
                    return Err(LoadError::Rejected(e));
                }
            }
        }

        let written = match mode {
            WriteMode::Merge => self.sink.merge(&batch).await?,
            WriteMode::Append => self.sink.append(&batch).await?,
        };
        info!(scope = %scope, rows = written, ?mode, "loaded batch");
        Ok(written)
    }
}

/// Build the sink named by the storage settings.
pub async fn build_sink(settings: &Settings) -> LoadResult<Arc<dyn CostTableSink>> {
    match settings.storage.mode {
        StorageMode::Postgres => {
            let sink = PostgresCostTable::connect(&settings.storage).await?;
            Ok(Arc::new(sink))
        }
        StorageMode::Csv => {
            let sink = CsvCostTable::new(&settings.storage)?;
            Ok(Arc::new(sink))
        }
    }
}

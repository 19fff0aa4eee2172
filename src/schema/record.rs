//! Dynamic cost record representation
//!
//! The Cost Management Query API describes its own schema: each response
//! carries an ordered column manifest and positional row arrays. Records
//! are built by zipping manifest to row values, preserving column order.
//! Column order is authoritative; the API does not guarantee stable
//! ordering across requests, so nothing here looks columns up by a fixed
//! position.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;

/// Columns consulted (in order) to derive the cost date of a record.
pub const USAGE_DATE_COLUMNS: &[&str] = &["UsageDate", "Date", "UsageDateTime", "BillingMonth"];

/// Lineage column: full scope path the record was extracted from.
pub const COL_SOURCE_SCOPE: &str = "_source_scope";
/// Lineage column: human-readable scope name.
pub const COL_SOURCE_SCOPE_NAME: &str = "_source_scope_name";
/// Lineage column: wall-clock instant of processing.
pub const COL_INGESTION_TIMESTAMP: &str = "_ingestion_timestamp";
/// Lineage column: date of the ingestion timestamp.
pub const COL_INGESTION_DATE: &str = "_ingestion_date";
/// Partition column: usage date the record belongs to.
pub const COL_COST_DATE: &str = "_cost_date";

/// Enrichment errors
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("no usable usage-date column among {0:?}")]
    MissingCostDate(&'static [&'static str]),

    #[error("unparseable usage-date value: {0}")]
    InvalidCostDate(String),
}

/// A single typed cell value.
///
/// The remote response is JSON, so the only value kinds that occur in
/// practice are numbers, strings and nulls. Anything else (nested arrays
/// or objects) is preserved as its JSON text rather than dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Null,
}

impl CellValue {
    /// Convert a raw JSON row value into a typed cell.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => CellValue::Null,
            Value::Number(n) => match n.as_f64() {
                Some(f) => CellValue::Number(f),
                None => CellValue::Text(n.to_string()),
            },
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Bool(b) => CellValue::Text(b.to_string()),
            other => CellValue::Text(other.to_string()),
        }
    }

    /// Numeric view of the cell, if it holds a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text view of the cell, if it holds a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Render the cell as a plain string (used for row keys and CSV).
    ///
    /// Whole numbers render without a trailing `.0` so that a value that
    /// arrives as `20260106` keys identically across runs.
    pub fn render(&self) -> String {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 9e15 => {
                format!("{}", *n as i64)
            }
            CellValue::Number(n) => n.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Null => String::new(),
        }
    }
}

/// One row of cost data: an ordered mapping of column name to typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct CostRecord {
    fields: Vec<(String, CellValue)>,
}

impl CostRecord {
    /// Build a record by positionally pairing the column manifest with one
    /// response row. Extra row values beyond the manifest are dropped;
    /// columns without a value are not fabricated.
    pub fn from_row(columns: &[String], row: &[Value]) -> Self {
        let fields = columns
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.clone(), CellValue::from_json(value)))
            .collect();
        Self { fields }
    }

    /// Construct from already-typed fields (used by tests and sinks).
    pub fn from_fields(fields: Vec<(String, CellValue)>) -> Self {
        Self { fields }
    }

    /// Look a column up by name (case-insensitive, first match wins).
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Ordered column/value pairs.
    pub fn fields(&self) -> &[(String, CellValue)] {
        &self.fields
    }

    /// Ordered column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Derive the cost date from the record's own usage-date column.
    ///
    /// Rejects records with no derivable date rather than defaulting to
    /// the ingestion date, which would misplace them in the wrong
    /// partition.
    pub fn cost_date(&self) -> Result<NaiveDate, EnrichError> {
        for candidate in USAGE_DATE_COLUMNS {
            if let Some(value) = self.get(candidate) {
                if value.is_null() {
                    continue;
                }
                return parse_usage_date(value);
            }
        }
        Err(EnrichError::MissingCostDate(USAGE_DATE_COLUMNS))
    }
}

/// Parse a usage-date cell: the Query API emits `UsageDate` as a yyyymmdd
/// number (e.g. `20260106`); other feeds use ISO strings.
fn parse_usage_date(value: &CellValue) -> Result<NaiveDate, EnrichError> {
    match value {
        CellValue::Number(n) => {
            let packed = *n as i64;
            if n.fract() != 0.0 || !(10_000_101..=99_991_231).contains(&packed) {
                return Err(EnrichError::InvalidCostDate(n.to_string()));
            }
            let (year, month, day) = (packed / 10_000, (packed / 100) % 100, packed % 100);
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .ok_or_else(|| EnrichError::InvalidCostDate(packed.to_string()))
        }
        CellValue::Text(s) => parse_date_text(s),
        CellValue::Null => Err(EnrichError::MissingCostDate(USAGE_DATE_COLUMNS)),
    }
}

fn parse_date_text(s: &str) -> Result<NaiveDate, EnrichError> {
    let trimmed = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y%m%d") {
        return Ok(date);
    }
    // Timestamp forms like "2026-01-06T00:00:00Z": the date prefix is enough.
    if trimmed.len() >= 10 {
        if let Ok(date) = NaiveDate::parse_from_str(&trimmed[..10], "%Y-%m-%d") {
            return Ok(date);
        }
    }
    Err(EnrichError::InvalidCostDate(s.to_string()))
}

/// A cost record plus the five lineage/partitioning fields.
#[derive(Debug, Clone)]
pub struct EnrichedRecord {
    pub record: CostRecord,
    pub source_scope: String,
    pub source_scope_name: String,
    pub ingestion_timestamp: DateTime<Utc>,
    pub ingestion_date: NaiveDate,
    pub cost_date: NaiveDate,
}

impl EnrichedRecord {
    /// Enrich a raw record for the given scope.
    ///
    /// Fails when the record has no derivable cost date.
    pub fn new(
        record: CostRecord,
        scope: &super::ScopeDescriptor,
        ingested_at: DateTime<Utc>,
    ) -> Result<Self, EnrichError> {
        let cost_date = record.cost_date()?;
        Ok(Self {
            record,
            source_scope: scope.path.clone(),
            source_scope_name: scope.name.clone(),
            ingestion_timestamp: ingested_at,
            ingestion_date: ingested_at.date_naive(),
            cost_date,
        })
    }
}

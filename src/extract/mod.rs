//! Cost data extraction
//!
//! Issues scoped, date-bounded queries against the Cost Management Query
//! API, follows pagination links, and assembles normalized records per
//! scope.

mod client;
mod extractor;
mod types;

pub use client::{CostQueryClient, ExtractError, ExtractResult};
pub use extractor::{CostExtractor, ScopeExtraction, ScopeFailure};
pub use types::{QueryColumn, QueryProperties, QueryRequest, QueryResponse};

use chrono::NaiveDate;

/// An inclusive date range for a cost query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// A range covering a single day.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// A custom range; fails when end precedes start.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if end < start {
            return Err(format!("end date {end} precedes start date {start}"));
        }
        Ok(Self { start, end })
    }

    /// Label used in logs and run summaries.
    pub fn label(&self) -> String {
        if self.start == self.end {
            self.start.to_string()
        } else {
            format!("{}_to_{}", self.start, self.end)
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

//! Cost extractor
//!
//! Walks the paginated query response for each scope and assembles
//! normalized records. Scopes are processed through a bounded worker
//! pool; one scope failing never aborts the others.

use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::config::Settings;
use crate::schema::{CostRecord, ScopeDescriptor};

use super::client::{CostQueryClient, ExtractError, ExtractResult};
use super::types::QueryResponse;
use super::DateRange;

/// Successful extraction for one scope.
#[derive(Debug)]
pub struct ScopeExtraction {
    pub scope: ScopeDescriptor,
    pub records: Vec<CostRecord>,
    pub pages: u32,
}

/// Failed extraction for one scope.
#[derive(Debug)]
pub struct ScopeFailure {
    pub scope: ScopeDescriptor,
    pub error: ExtractError,
}

/// Extracts cost data across scopes.
pub struct CostExtractor {
    client: CostQueryClient,
    pagination_budget: Duration,
    concurrency: usize,
}

impl CostExtractor {
    pub fn new(settings: &Settings, client: CostQueryClient) -> Self {
        Self {
            client,
            pagination_budget: Duration::from_secs(settings.http.pagination_timeout_secs),
            concurrency: settings.pipeline.scope_concurrency.max(1),
        }
    }

    /// Extract cost records for every scope over the given range.
    ///
    /// Results come back in input scope order regardless of completion
    /// order, split into per-scope successes and failures.
    pub async fn extract(
        &self,
        scopes: &[ScopeDescriptor],
        range: &DateRange,
    ) -> (Vec<ScopeExtraction>, Vec<ScopeFailure>) {
        let mut outcomes: Vec<(usize, ExtractResult<ScopeExtraction>)> =
            stream::iter(scopes.iter().enumerate())
                .map(|(index, scope)| async move {
                    (index, self.extract_scope(scope, range).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for ((_, outcome), scope) in outcomes.into_iter().zip(scopes.iter()) {
            match outcome {
                Ok(extraction) => {
                    info!(
                        scope = %scope,
                        records = extraction.records.len(),
                        pages = extraction.pages,
                        "extracted scope"
                    );
                    successes.push(extraction);
                }
                Err(error) => {
                    warn!(scope = %scope, %error, "failed to extract scope");
                    failures.push(ScopeFailure {
                        scope: scope.clone(),
                        error,
                    });
                }
            }
        }
        (successes, failures)
    }

    /// Extract one scope, following pagination links until exhausted or
    /// the pagination time budget runs out.
    pub async fn extract_scope(
        &self,
        scope: &ScopeDescriptor,
        range: &DateRange,
    ) -> ExtractResult<ScopeExtraction> {
        let deadline = Instant::now() + self.pagination_budget;

        let mut response = self.client.query(scope, range).await?;
        let mut columns = column_names(&response);
        let mut records = Vec::new();
        append_rows(&mut records, &columns, &response);

        let mut pages = 1u32;
        while let Some(link) = response.properties.next_link.take() {
            response = timeout_at(deadline, self.client.next_page(&link))
                .await
                .map_err(|_| ExtractError::Timeout(self.pagination_budget))??;
            pages += 1;

            // Later pages normally repeat the manifest; if one declares
            // its own columns, that ordering is authoritative for its rows.
            if !response.properties.columns.is_empty() {
                columns = column_names(&response);
            }
            append_rows(&mut records, &columns, &response);
        }

        Ok(ScopeExtraction {
            scope: scope.clone(),
            records,
            pages,
        })
    }
}

fn column_names(response: &QueryResponse) -> Vec<String> {
    response
        .properties
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect()
}

fn append_rows(records: &mut Vec<CostRecord>, columns: &[String], response: &QueryResponse) {
    for row in &response.properties.rows {
        records.push(CostRecord::from_row(columns, row));
    }
}

//! In-memory cost table
//!
//! Test sink with the same merge/append semantics as the real backends.

use chrono::NaiveDate;
use std::collections::HashSet;
use tokio::sync::RwLock;

use async_trait::async_trait;

use crate::schema::EnrichedRecord;

use super::{natural_key, CostTableSink, LoadResult, TableStats};

#[derive(Default)]
pub struct InMemoryCostTable {
    key_columns: Vec<String>,
    rows: RwLock<Vec<EnrichedRecord>>,
}

impl InMemoryCostTable {
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            rows: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of all stored rows.
    pub async fn rows(&self) -> Vec<EnrichedRecord> {
        self.rows.read().await.clone()
    }

    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn row_count_for_date(&self, date: NaiveDate) -> usize {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.cost_date == date)
            .count()
    }
}

#[async_trait]
impl CostTableSink for InMemoryCostTable {
    async fn merge(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        let incoming: HashSet<(NaiveDate, String, String)> = batch
            .iter()
            .map(|r| {
                (
                    r.cost_date,
                    r.source_scope.clone(),
                    natural_key(r, &self.key_columns),
                )
            })
            .collect();

        let mut rows = self.rows.write().await;
        rows.retain(|existing| {
            !incoming.contains(&(
                existing.cost_date,
                existing.source_scope.clone(),
                natural_key(existing, &self.key_columns),
            ))
        });
        rows.extend(batch.iter().cloned());
        Ok(batch.len())
    }

    async fn append(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        let mut rows = self.rows.write().await;
        rows.extend(batch.iter().cloned());
        Ok(batch.len())
    }

    async fn stats(&self) -> LoadResult<TableStats> {
        let rows = self.rows.read().await;
        let dates: HashSet<NaiveDate> = rows.iter().map(|r| r.cost_date).collect();
        let scopes: HashSet<&str> = rows.iter().map(|r| r.source_scope.as_str()).collect();
        Ok(TableStats {
            row_count: rows.len() as u64,
            partition_count: dates.len() as u64,
            scope_count: scopes.len() as u64,
            min_cost_date: dates.iter().min().copied(),
            max_cost_date: dates.iter().max().copied(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CellValue, CostRecord, ScopeDescriptor};
    use chrono::Utc;

    fn enriched(resource: &str, date: f64) -> EnrichedRecord {
        let record = CostRecord::from_fields(vec![
            ("UsageDate".to_string(), CellValue::Number(date)),
            ("ResourceId".to_string(), CellValue::Text(resource.to_string())),
            ("PreTaxCost".to_string(), CellValue::Number(1.0)),
        ]);
        let scope = ScopeDescriptor::parse("subscriptions/abcd1234");
        EnrichedRecord::new(record, &scope, Utc::now()).unwrap()
    }

    fn keys() -> Vec<String> {
        vec!["ResourceId".to_string()]
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let table = InMemoryCostTable::new(keys());
        let batch = vec![enriched("/vm/a", 20260106.0), enriched("/vm/b", 20260106.0)];

        table.merge(&batch).await.unwrap();
        table.merge(&batch).await.unwrap();

        assert_eq!(table.row_count().await, 2);
    }

    #[tokio::test]
    async fn test_append_duplicates() {
        let table = InMemoryCostTable::new(keys());
        let batch = vec![enriched("/vm/a", 20260106.0)];

        table.append(&batch).await.unwrap();
        table.append(&batch).await.unwrap();

        assert_eq!(table.row_count().await, 2);
    }

    #[tokio::test]
    async fn test_merge_does_not_touch_other_partitions() {
        let table = InMemoryCostTable::new(keys());
        table
            .merge(&[enriched("/vm/a", 20260106.0)])
            .await
            .unwrap();
        table
            .merge(&[enriched("/vm/a", 20260107.0)])
            .await
            .unwrap();

        let d1 = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 7).unwrap();
        assert_eq!(table.row_count_for_date(d1).await, 1);
        assert_eq!(table.row_count_for_date(d2).await, 1);

        let stats = table.stats().await.unwrap();
        assert_eq!(stats.row_count, 2);
        assert_eq!(stats.partition_count, 2);
        assert_eq!(stats.scope_count, 1);
        assert_eq!(stats.min_cost_date, Some(d1));
        assert_eq!(stats.max_cost_date, Some(d2));
    }
}

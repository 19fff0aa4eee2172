//! Postgres cost table
//!
//! Stores cost records in a single wide table partitioned logically by
//! `_cost_date`. The response schema is dynamic, so data columns are
//! added on demand with `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`;
//! existing columns are never dropped or retyped. Merge is a
//! delete-then-insert transaction scoped to the (date, scope) pairs in
//! the batch, so re-running a day is idempotent and its cost stays
//! proportional to the batch size.

use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use async_trait::async_trait;

use crate::config::StorageSettings;
use crate::schema::{CellValue, EnrichedRecord};
use crate::schema::{
    COL_COST_DATE, COL_INGESTION_DATE, COL_INGESTION_TIMESTAMP, COL_SOURCE_SCOPE,
    COL_SOURCE_SCOPE_NAME,
};

use super::{natural_key, CostTableSink, LoadError, LoadResult, TableStats};

const COL_ROW_KEY: &str = "_row_key";

/// SQL type a data column was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Double,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Postgres-backed cost table sink.
pub struct PostgresCostTable {
    pool: PgPool,
    table: String,
    key_columns: Vec<String>,
    batch_size: usize,
    // Data columns known to exist in the table, with their created type.
    columns: Mutex<HashMap<String, ColumnType>>,
}

impl PostgresCostTable {
    /// Connect, create the table if needed, and load the current schema.
    pub async fn connect(settings: &StorageSettings) -> LoadResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&settings.database_url)
            .await?;
        Self::with_pool(pool, settings).await
    }

    /// Build from an existing pool (used by tests).
    pub async fn with_pool(pool: PgPool, settings: &StorageSettings) -> LoadResult<Self> {
        validate_identifier(&settings.table_name)?;
        let table = Self {
            pool,
            table: settings.table_name.clone(),
            key_columns: settings.key_columns.clone(),
            batch_size: settings.batch_insert_size.max(1),
            columns: Mutex::new(HashMap::new()),
        };
        table.ensure_table().await?;
        table.load_existing_columns().await?;
        Ok(table)
    }

    /// Create the table and its partition/scope index.
    ///
    /// No primary key: append mode is allowed to write duplicate rows,
    /// and merge enforces uniqueness itself via the row key.
    async fn ensure_table(&self) -> LoadResult<()> {
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                {row_key} TEXT NOT NULL,
                {cost_date} DATE NOT NULL,
                {scope} TEXT NOT NULL,
                {scope_name} TEXT NOT NULL,
                {ingested_at} TIMESTAMPTZ NOT NULL,
                {ingested_on} DATE NOT NULL
            )
            "#,
            table = self.table,
            row_key = COL_ROW_KEY,
            cost_date = COL_COST_DATE,
            scope = COL_SOURCE_SCOPE,
            scope_name = COL_SOURCE_SCOPE_NAME,
            ingested_at = COL_INGESTION_TIMESTAMP,
            ingested_on = COL_INGESTION_DATE,
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            r#"
            CREATE INDEX IF NOT EXISTS "idx_{table}_date_scope"
            ON "{table}" ({cost_date}, {scope})
            "#,
            table = self.table,
            cost_date = COL_COST_DATE,
            scope = COL_SOURCE_SCOPE,
        );
        sqlx::query(&index).execute(&self.pool).await?;

        info!(table = %self.table, "cost table ready");
        Ok(())
    }

    async fn load_existing_columns(&self) -> LoadResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT column_name, data_type
            FROM information_schema.columns
            WHERE table_name = $1
            "#,
        )
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await?;

        let mut columns = self.columns.lock().await;
        for row in rows {
            let name: String = row.get("column_name");
            if name.starts_with('_') {
                continue;
            }
            let data_type: String = row.get("data_type");
            let column_type = if data_type.eq_ignore_ascii_case("double precision") {
                ColumnType::Double
            } else {
                ColumnType::Text
            };
            columns.insert(name, column_type);
        }
        debug!(table = %self.table, columns = columns.len(), "loaded existing data columns");
        Ok(())
    }

    /// Add any data columns the batch carries that the table lacks.
    ///
    /// The type is inferred from the first non-null value seen; columns
    /// that already exist keep their type.
    async fn ensure_columns(&self, batch: &[EnrichedRecord]) -> LoadResult<Vec<(String, ColumnType)>> {
        let mut ordered: Vec<(String, ColumnType)> = Vec::new();
        for enriched in batch {
            for (name, value) in enriched.record.fields() {
                if ordered.iter().any(|(n, _)| n == name) {
                    continue;
                }
                let inferred = match value {
                    CellValue::Number(_) => ColumnType::Double,
                    _ => ColumnType::Text,
                };
                ordered.push((name.clone(), inferred));
            }
        }

        let mut known = self.columns.lock().await;
        for (name, inferred) in ordered.iter_mut() {
            match known.get(name.as_str()) {
                Some(existing) => *inferred = *existing,
                None => {
                    validate_identifier(name)?;
                    let alter = format!(
                        r#"ALTER TABLE "{}" ADD COLUMN IF NOT EXISTS "{}" {}"#,
                        self.table,
                        name,
                        inferred.sql()
                    );
                    sqlx::query(&alter).execute(&self.pool).await?;
                    info!(table = %self.table, column = %name, sql_type = inferred.sql(), "added data column");
                    known.insert(name.clone(), *inferred);
                }
            }
        }
        Ok(ordered)
    }

    async fn insert_chunk<'e, E>(
        &self,
        executor: E,
        columns: &[(String, ColumnType)],
        chunk: &[&EnrichedRecord],
    ) -> LoadResult<usize>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let lineage = [
            COL_ROW_KEY,
            COL_COST_DATE,
            COL_SOURCE_SCOPE,
            COL_SOURCE_SCOPE_NAME,
            COL_INGESTION_TIMESTAMP,
            COL_INGESTION_DATE,
        ];
        let width = lineage.len() + columns.len();

        let mut sql = format!(r#"INSERT INTO "{}" ("#, self.table);
        sql.push_str(&lineage.join(", "));
        for (name, _) in columns {
            sql.push_str(&format!(r#", "{name}""#));
        }
        sql.push_str(") VALUES ");

        let mut param = 1;
        for i in 0..chunk.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for j in 0..width {
                if j > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&format!("${param}"));
                param += 1;
            }
            sql.push(')');
        }

        let mut query = sqlx::query(&sql);
        for enriched in chunk {
            query = query
                .bind(natural_key(enriched, &self.key_columns))
                .bind(enriched.cost_date)
                .bind(enriched.source_scope.clone())
                .bind(enriched.source_scope_name.clone())
                .bind(enriched.ingestion_timestamp)
                .bind(enriched.ingestion_date);
            for (name, column_type) in columns {
                let value = enriched.record.get(name);
                match column_type {
                    ColumnType::Double => {
                        query = query.bind(value.and_then(|v| v.as_number()));
                    }
                    ColumnType::Text => {
                        let text = value.and_then(|v| {
                            if v.is_null() {
                                None
                            } else {
                                Some(v.render())
                            }
                        });
                        query = query.bind(text);
                    }
                }
            }
        }

        let result = query.execute(executor).await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl CostTableSink for PostgresCostTable {
    async fn merge(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let columns = self.ensure_columns(batch).await?;

        // Group by (cost_date, scope) so the delete stays bounded to the
        // partitions actually being rewritten.
        let mut groups: Vec<((NaiveDate, String), Vec<&EnrichedRecord>)> = Vec::new();
        for enriched in batch {
            let key = (enriched.cost_date, enriched.source_scope.clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(enriched),
                None => groups.push((key, vec![enriched])),
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for ((cost_date, scope), rows) in &groups {
            let keys: Vec<String> = rows
                .iter()
                .map(|enriched| natural_key(enriched, &self.key_columns))
                .collect();

            let delete = format!(
                r#"DELETE FROM "{}" WHERE {} = $1 AND {} = $2 AND {} = ANY($3)"#,
                self.table, COL_COST_DATE, COL_SOURCE_SCOPE, COL_ROW_KEY
            );
            let deleted = sqlx::query(&delete)
                .bind(cost_date)
                .bind(scope)
                .bind(&keys)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted > 0 {
                debug!(%cost_date, %scope, deleted, "replaced existing rows");
            }

            for chunk in rows.chunks(self.batch_size) {
                written += self.insert_chunk(&mut *tx, &columns, chunk).await?;
            }
        }

        tx.commit().await?;
        info!(table = %self.table, rows = written, groups = groups.len(), "merge committed");
        Ok(written)
    }

    async fn append(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let columns = self.ensure_columns(batch).await?;

        let refs: Vec<&EnrichedRecord> = batch.iter().collect();
        let mut written = 0;
        for chunk in refs.chunks(self.batch_size) {
            written += self.insert_chunk(&self.pool, &columns, chunk).await?;
        }
        debug!(table = %self.table, rows = written, "append complete");
        Ok(written)
    }

    async fn stats(&self) -> LoadResult<TableStats> {
        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS row_count,
                COUNT(DISTINCT {cost_date}) AS partition_count,
                COUNT(DISTINCT {scope}) AS scope_count,
                MIN({cost_date}) AS min_cost_date,
                MAX({cost_date}) AS max_cost_date
            FROM "{table}"
            "#,
            table = self.table,
            cost_date = COL_COST_DATE,
            scope = COL_SOURCE_SCOPE,
        );
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;

        Ok(TableStats {
            row_count: row.get::<i64, _>("row_count") as u64,
            partition_count: row.get::<i64, _>("partition_count") as u64,
            scope_count: row.get::<i64, _>("scope_count") as u64,
            min_cost_date: row.get::<Option<NaiveDate>, _>("min_cost_date"),
            max_cost_date: row.get::<Option<NaiveDate>, _>("max_cost_date"),
        })
    }
}

/// Only plain identifiers are interpolated into SQL; anything else is
/// rejected before it reaches a statement.
fn validate_identifier(name: &str) -> LoadResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(LoadError::InvalidColumn(name.to_string()))
    }
}

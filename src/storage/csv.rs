//! CSV cost table
//!
//! Local-testing sink that writes one CSV file per (cost date, scope)
//! pair under the configured output directory. Merge rewrites the file
//! with matching row keys replaced; append concatenates. File names are
//! `cost_data_<date>_<scope>.csv`, so a partition is a file and stats
//! can be answered from the directory listing alone.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use async_trait::async_trait;

use crate::config::StorageSettings;
use crate::schema::{
    EnrichedRecord, COL_COST_DATE, COL_INGESTION_DATE, COL_INGESTION_TIMESTAMP, COL_SOURCE_SCOPE,
    COL_SOURCE_SCOPE_NAME,
};

use super::{natural_key, CostTableSink, LoadError, LoadResult, TableStats};

const FILE_PREFIX: &str = "cost_data_";
const COL_ROW_KEY: &str = "_row_key";

/// CSV-file-backed cost table sink.
pub struct CsvCostTable {
    dir: PathBuf,
    key_columns: Vec<String>,
}

impl CsvCostTable {
    pub fn new(settings: &StorageSettings) -> LoadResult<Self> {
        let dir = PathBuf::from(&settings.output_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            key_columns: settings.key_columns.clone(),
        })
    }

    fn partition_path(&self, cost_date: NaiveDate, scope_name: &str) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{cost_date}_{}.csv", sanitize(scope_name)))
    }

    /// Write one (date, scope) group, replacing rows whose key matches a
    /// new row when `dedup` is set.
    async fn write_group(
        &self,
        path: &Path,
        group: &[&EnrichedRecord],
        dedup: bool,
    ) -> LoadResult<usize> {
        // Header: data columns in first-seen batch order, then lineage.
        let mut header: Vec<String> = Vec::new();
        for enriched in group {
            for name in enriched.record.column_names() {
                if !header.iter().any(|h| h == name) {
                    header.push(name.to_string());
                }
            }
        }
        header.extend(
            [
                COL_ROW_KEY,
                COL_COST_DATE,
                COL_SOURCE_SCOPE,
                COL_SOURCE_SCOPE_NAME,
                COL_INGESTION_TIMESTAMP,
                COL_INGESTION_DATE,
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        let new_keys: HashSet<String> = group
            .iter()
            .map(|enriched| natural_key(enriched, &self.key_columns))
            .collect();

        // Carry over rows already in the file, re-shaped to the merged
        // header. On merge, rows superseded by an incoming key are dropped.
        let mut retained: Vec<Vec<String>> = Vec::new();
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let (existing_header, existing_rows) = parse_csv(&content)?;

            for column in &existing_header {
                if !header.iter().any(|h| h == column) {
                    header.push(column.clone());
                }
            }

            let key_index = existing_header.iter().position(|h| h == COL_ROW_KEY);
            if dedup && key_index.is_none() {
                return Err(LoadError::MalformedBatch(format!(
                    "existing file {} has no {COL_ROW_KEY} column",
                    path.display()
                )));
            }

            for row in existing_rows {
                if dedup {
                    let key = key_index.and_then(|i| row.get(i));
                    if key.map(|k| new_keys.contains(k)).unwrap_or(false) {
                        continue;
                    }
                }
                retained.push(reshape(&existing_header, &row, &header));
            }
        }

        let mut out = String::new();
        write_row(&mut out, &header);
        for row in &retained {
            write_row(&mut out, row);
        }
        for enriched in group {
            let row = render_record(enriched, &header, &self.key_columns);
            write_row(&mut out, &row);
        }

        tokio::fs::write(path, out).await?;
        debug!(
            path = %path.display(),
            new_rows = group.len(),
            retained = retained.len(),
            "wrote partition file"
        );
        Ok(group.len())
    }

    async fn write_batch(&self, batch: &[EnrichedRecord], dedup: bool) -> LoadResult<usize> {
        let mut groups: Vec<((NaiveDate, String), Vec<&EnrichedRecord>)> = Vec::new();
        for enriched in batch {
            let key = (enriched.cost_date, enriched.source_scope_name.clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, rows)) => rows.push(enriched),
                None => groups.push((key, vec![enriched])),
            }
        }

        let mut written = 0;
        for ((cost_date, scope_name), rows) in &groups {
            let path = self.partition_path(*cost_date, scope_name);
            written += self.write_group(&path, rows, dedup).await?;
        }
        info!(rows = written, files = groups.len(), "wrote CSV batch");
        Ok(written)
    }
}

#[async_trait]
impl CostTableSink for CsvCostTable {
    async fn merge(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        self.write_batch(batch, true).await
    }

    async fn append(&self, batch: &[EnrichedRecord]) -> LoadResult<usize> {
        self.write_batch(batch, false).await
    }

    async fn stats(&self) -> LoadResult<TableStats> {
        let mut stats = TableStats::default();
        let mut dates: HashSet<NaiveDate> = HashSet::new();
        let mut scopes: HashSet<String> = HashSet::new();

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((date, scope)) = parse_file_name(&name) else {
                continue;
            };
            dates.insert(date);
            scopes.insert(scope);

            let content = tokio::fs::read_to_string(entry.path()).await?;
            let (_, rows) = parse_csv(&content)?;
            stats.row_count += rows.len() as u64;
        }

        stats.partition_count = dates.len() as u64;
        stats.scope_count = scopes.len() as u64;
        stats.min_cost_date = dates.iter().min().copied();
        stats.max_cost_date = dates.iter().max().copied();
        Ok(stats)
    }
}

/// Scope names may contain path separators; keep file names flat.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Recover (cost date, scope label) from a partition file name.
fn parse_file_name(name: &str) -> Option<(NaiveDate, String)> {
    let rest = name.strip_prefix(FILE_PREFIX)?.strip_suffix(".csv")?;
    // "<yyyy-mm-dd>_<scope>"
    if rest.len() < 12 {
        return None;
    }
    let (date_part, scope_part) = rest.split_at(10);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, scope_part.trim_start_matches('_').to_string()))
}

fn render_record(
    enriched: &EnrichedRecord,
    header: &[String],
    key_columns: &[String],
) -> Vec<String> {
    header
        .iter()
        .map(|column| match column.as_str() {
            COL_ROW_KEY => natural_key(enriched, key_columns),
            COL_COST_DATE => enriched.cost_date.to_string(),
            COL_SOURCE_SCOPE => enriched.source_scope.clone(),
            COL_SOURCE_SCOPE_NAME => enriched.source_scope_name.clone(),
            COL_INGESTION_TIMESTAMP => enriched.ingestion_timestamp.to_rfc3339(),
            COL_INGESTION_DATE => enriched.ingestion_date.to_string(),
            name => enriched
                .record
                .get(name)
                .map(|v| v.render())
                .unwrap_or_default(),
        })
        .collect()
}

/// Re-shape a row from its original header to the merged one.
fn reshape(from_header: &[String], row: &[String], to_header: &[String]) -> Vec<String> {
    to_header
        .iter()
        .map(|column| {
            from_header
                .iter()
                .position(|h| h == column)
                .and_then(|i| row.get(i).cloned())
                .unwrap_or_default()
        })
        .collect()
}

fn write_row(out: &mut String, row: &[String]) {
    for (i, field) in row.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
        {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

/// Minimal RFC 4180 reader: quoted fields, doubled quotes, embedded
/// newlines. Returns (header, rows).
fn parse_csv(content: &str) -> LoadResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => {
                    row.push(std::mem::take(&mut field));
                }
                '\r' => {}
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut row));
                }
                _ => field.push(c),
            }
        }
    }
    if in_quotes {
        return Err(LoadError::MalformedBatch(
            "unterminated quoted CSV field".to_string(),
        ));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        records.push(row);
    }

    if records.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let header = records.remove(0);
    Ok((header, records))
}

//! CSV export row source
//!
//! Feeds the pipeline from a single flat CSV export. Every mapping entry
//! reads the same file; its filters select which rows belong to which
//! target table, the way wide extracts from EHR systems are usually cut.
//! Values are type-inferred per cell (empty -> null, integer, float,
//! otherwise string) so the resolver sees the same shapes a database
//! source would produce.

use super::filters::matches_in_memory;
use super::traits::RowSource;
use crate::errors::{AppResult, MappingError, SourceError};
use crate::mapping::TableMapping;
use crate::models::RawRow;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct CsvRowSource {
    path: PathBuf,
    headers: BTreeSet<String>,
    rows: Vec<RawRow>,
}

/// Infer a JSON scalar from a CSV cell.
fn infer_cell(cell: &str) -> JsonValue {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return JsonValue::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return JsonValue::from(f);
    }
    JsonValue::String(cell.to_string())
}

impl CsvRowSource {
    /// Read and type-infer the whole export up front.
    pub fn open(path: &Path) -> AppResult<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(SourceError::from)?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(SourceError::from)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(SourceError::from)?;
            let mut row = RawRow::new();
            for (header, cell) in headers.iter().zip(record.iter()) {
                row.insert(header.clone(), infer_cell(cell));
            }
            rows.push(row);
        }

        debug!(
            "Loaded {} row(s) with {} column(s) from {}",
            rows.len(),
            headers.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            headers: headers.into_iter().collect(),
            rows,
        })
    }
}

#[async_trait]
impl RowSource for CsvRowSource {
    fn describe(&self) -> String {
        format!("CSV export {}", self.path.display())
    }

    async fn has_source(&self, _mapping: &TableMapping) -> AppResult<bool> {
        // Every mapping entry reads the one export.
        Ok(true)
    }

    async fn check_filters(&self, mapping: &TableMapping) -> Result<(), MappingError> {
        for filter in &mapping.filters {
            if !self.headers.contains(&filter.column) {
                return Err(MappingError::UnknownFilterColumn {
                    source_name: self.path.display().to_string(),
                    column: filter.column.clone(),
                });
            }
        }
        Ok(())
    }

    async fn fetch(&self, mapping: &TableMapping) -> AppResult<Vec<RawRow>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| matches_in_memory(&mapping.filters, row))
            .cloned()
            .collect())
    }
}

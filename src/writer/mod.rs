//! Batched target writer
//!
//! Inserts resolved rows in fixed-size chunks, one multi-row INSERT per
//! chunk. A rejected chunk skips its rows and the run continues; the chunk
//! is the unit of atomicity. Rows carrying an unresolved person reference
//! get it written into a staging text column that normalization resolves
//! and drops afterwards.

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::mapping::TableMapping;
use crate::models::{LoadWarning, ResolvedRow, RunReport, TableReport};
use crate::resolver::null_for;
use crate::schema::{ColumnType, TableSchema};
use sea_orm::Value;
use sea_orm::sea_query::{Alias, ColumnDef, Query, Table};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Staging column added to tables whose person references arrive
/// non-numeric. Always dropped again after normalization.
pub const STAGING_COLUMN: &str = "person_id_text";

/// Tracks which target tables currently carry the staging column.
pub struct StagingManager {
    db: Database,
    tables: BTreeSet<String>,
}

impl StagingManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            tables: BTreeSet::new(),
        }
    }

    /// Add the staging column to a table if this run has not already.
    pub async fn ensure(&mut self, table: &str) -> AppResult<()> {
        if self.tables.contains(table) {
            return Ok(());
        }
        let stmt = Table::alter()
            .table(Alias::new(table))
            .add_column(ColumnDef::new(Alias::new(STAGING_COLUMN)).text().null())
            .to_owned();
        match self.db.execute(self.db.build(&stmt)).await {
            Ok(_) => {
                info!("Added staging column to '{table}'");
            }
            Err(e) => {
                // Left over from an interrupted run.
                debug!("Staging column on '{table}' already present ({e})");
            }
        }
        self.tables.insert(table.to_string());
        Ok(())
    }

    /// Tables that currently carry the staging column.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Drop the staging column everywhere it was added. Best effort; a
    /// failed drop is logged and does not fail the run.
    pub async fn drop_all(&mut self) {
        for table in std::mem::take(&mut self.tables) {
            let stmt = Table::alter()
                .table(Alias::new(&table))
                .drop_column(Alias::new(STAGING_COLUMN))
                .to_owned();
            match self.db.execute(self.db.build(&stmt)).await {
                Ok(_) => info!("Dropped staging column from '{table}'"),
                Err(e) => warn!("Could not drop staging column from '{table}': {e}"),
            }
        }
    }
}

pub struct BatchedWriter {
    db: Database,
}

impl BatchedWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert resolved rows into the mapping entry's target table.
    pub async fn write(
        &self,
        mapping: &TableMapping,
        schema: &TableSchema,
        rows: Vec<ResolvedRow>,
        batch_size: usize,
        staging: &mut StagingManager,
        table_report: &mut TableReport,
        run_report: &mut RunReport,
    ) -> AppResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let needs_staging = rows.iter().any(|r| r.staged_person_ref.is_some());
        if needs_staging {
            staging.ensure(&mapping.name).await?;
        }

        // Stable column order shared by every chunk.
        let mut columns: Vec<String> = mapping
            .columns
            .keys()
            .filter(|c| schema.has_column(c))
            .cloned()
            .collect();
        if needs_staging {
            columns.push(STAGING_COLUMN.to_string());
        }
        if columns.is_empty() {
            return Ok(());
        }

        let chunk_size = batch_size.max(1);
        for chunk in rows.chunks(chunk_size) {
            let mut insert = Query::insert();
            insert
                .into_table(Alias::new(&mapping.name))
                .columns(columns.iter().map(|c| Alias::new(c)));

            for row in chunk {
                let values = columns.iter().map(|column| {
                    if column == STAGING_COLUMN {
                        match &row.staged_person_ref {
                            Some(text) => Value::String(Some(Box::new(text.clone()))),
                            None => Value::String(None),
                        }
                    } else {
                        row.columns.get(column).cloned().unwrap_or_else(|| {
                            let column_type = schema
                                .column(column)
                                .map(|c| c.column_type)
                                .unwrap_or(ColumnType::Other);
                            null_for(column_type)
                        })
                    }
                });
                insert
                    .values(values.map(Into::into))
                    .map_err(|e| AppError::internal(format!("insert build failed: {e}")))?;
            }

            // One multi-row INSERT per chunk: it either lands whole or the
            // chunk's rows are skipped.
            match self.db.execute(self.db.build(&insert)).await {
                Ok(_) => {
                    table_report.inserted += chunk.len() as u64;
                }
                Err(e) => {
                    table_report.skipped += chunk.len() as u64;
                    run_report.warn(LoadWarning::ChunkRejected {
                        table: mapping.name.clone(),
                        rows: chunk.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        debug!(
            "Wrote {}/{} row(s) to '{}'",
            table_report.inserted,
            table_report.fetched,
            mapping.name
        );
        Ok(())
    }
}

//! Load orchestration
//!
//! The [`Loader`] drives a full run: filter pre-checks, per-entry fetch,
//! resolve and write, then the normalization passes. Fatal errors abort
//! with staging columns cleaned up; everything else degrades into the
//! run report.

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::mapping::MappingSpec;
use crate::models::{LoadWarning, RunReport, RunState, TableReport};
use crate::normalize::NormalizationPipeline;
use crate::resolver::ValueResolver;
use crate::schema::SchemaCatalog;
use crate::sources::RowSource;
use crate::writer::{BatchedWriter, StagingManager};
use std::time::Instant;
use tracing::{info, warn};

pub struct Loader {
    source: Box<dyn RowSource>,
    target: Database,
    catalog: SchemaCatalog,
    batch_size: usize,
}

impl Loader {
    pub fn new(
        source: Box<dyn RowSource>,
        target: Database,
        catalog: SchemaCatalog,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            target,
            catalog,
            batch_size,
        }
    }

    /// Run the whole migration for a validated mapping specification.
    pub async fn run(&self, spec: &MappingSpec) -> AppResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new();
        report.set_state(RunState::SpecLoaded);

        let mut staging = StagingManager::new(self.target.clone());
        let outcome = self.execute(spec, &mut staging, &mut report).await;
        report.elapsed = started.elapsed();

        match outcome {
            Ok(()) => {
                report.set_state(RunState::Done);
                info!(
                    "Run finished: {} row(s) inserted, {} skipped, {} warning(s)",
                    report.total_inserted(),
                    report.total_skipped(),
                    report.warnings.len()
                );
                Ok(report)
            }
            Err(e) => {
                report.set_state(RunState::Failed);
                // Leave no staging columns behind on the failure path.
                staging.drop_all().await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        spec: &MappingSpec,
        staging: &mut StagingManager,
        report: &mut RunReport,
    ) -> AppResult<()> {
        // All filters are checked before the first fetch so a mapping typo
        // cannot leave a half-loaded target behind.
        for mapping in &spec.tables {
            if self.source.has_source(mapping).await? {
                self.source
                    .check_filters(mapping)
                    .await
                    .map_err(AppError::from)?;
            }
        }

        report.set_state(RunState::Loading);
        let resolver = ValueResolver::new(spec);
        let writer = BatchedWriter::new(self.target.clone());

        for mapping in &spec.tables {
            let source_name = mapping.source_identifier().to_string();
            let Some(schema) = self.catalog.table(&mapping.name) else {
                report.warn(LoadWarning::MissingTarget {
                    target_table: mapping.name.clone(),
                });
                continue;
            };
            if !self.source.has_source(mapping).await? {
                report.warn(LoadWarning::MissingSource {
                    source_table: source_name,
                    target_table: mapping.name.clone(),
                });
                continue;
            }

            let table_started = Instant::now();
            let mut table_report = TableReport::new(&source_name, &mapping.name);

            let rows = self.source.fetch(mapping).await?;
            table_report.fetched = rows.len() as u64;
            if rows.is_empty() {
                info!("No rows from '{source_name}'; skipping '{}'", mapping.name);
                report.tables.push(table_report);
                continue;
            }

            for column in mapping.columns.keys() {
                if !schema.has_column(column) {
                    report.warn(LoadWarning::DroppedColumn {
                        table: mapping.name.clone(),
                        column: column.clone(),
                    });
                }
            }

            let resolved: Vec<_> = rows
                .iter()
                .map(|row| resolver.resolve(row, mapping, schema, &mut table_report))
                .collect();

            writer
                .write(
                    mapping,
                    schema,
                    resolved,
                    self.batch_size,
                    staging,
                    &mut table_report,
                    report,
                )
                .await?;

            info!(
                "Loaded '{source_name}' -> '{}': {}/{} row(s) in {:.2}s",
                mapping.name,
                table_report.inserted,
                table_report.fetched,
                table_started.elapsed().as_secs_f64()
            );
            if table_report.coercion_warnings > 0 {
                warn!(
                    "{} value(s) degraded to NULL while loading '{}'",
                    table_report.coercion_warnings, mapping.name
                );
            }
            report.tables.push(table_report);
        }

        report.set_state(RunState::Normalizing);
        NormalizationPipeline::new(&self.target, &self.catalog)
            .run(spec, staging, report)
            .await
    }
}

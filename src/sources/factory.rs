//! Row source construction

use super::csv::CsvRowSource;
use super::database::DatabaseRowSource;
use super::traits::RowSource;
use crate::errors::AppResult;
use std::path::PathBuf;
use tracing::info;

/// Where source rows come from.
#[derive(Debug, Clone)]
pub enum SourceInput {
    /// A flat CSV export on disk.
    CsvFile(PathBuf),
    /// A live relational database.
    Database { url: String, max_connections: u32 },
}

/// Build the row source for the given input.
pub async fn create_row_source(input: SourceInput) -> AppResult<Box<dyn RowSource>> {
    let source: Box<dyn RowSource> = match input {
        SourceInput::CsvFile(path) => Box::new(CsvRowSource::open(&path)?),
        SourceInput::Database {
            url,
            max_connections,
        } => Box::new(DatabaseRowSource::connect(&url, max_connections).await?),
    };
    info!("Using {}", source.describe());
    Ok(source)
}

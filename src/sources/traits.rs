//! Row source abstraction

use crate::errors::{AppResult, MappingError};
use crate::mapping::TableMapping;
use crate::models::RawRow;
use async_trait::async_trait;

/// A provider of source rows for mapping entries.
///
/// Implementations resolve a mapping entry's source identifier to a table
/// or file, apply the entry's filters and return the surviving rows as
/// untyped [`RawRow`]s.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Whether the mapping entry's source identifier exists on this source.
    async fn has_source(&self, mapping: &TableMapping) -> AppResult<bool>;

    /// Verify the entry's filters reference fields this source has.
    ///
    /// Called for every entry before any fetch so a typo fails the run
    /// up front instead of after a partial load.
    async fn check_filters(&self, mapping: &TableMapping) -> Result<(), MappingError>;

    /// Fetch all rows for the entry with its filters applied.
    async fn fetch(&self, mapping: &TableMapping) -> AppResult<Vec<RawRow>>;
}

//! Row sources
//!
//! A row source hands the pipeline filtered [`RawRow`]s for a mapping
//! entry. Two adapters exist: a live relational database (filters pushed
//! down into the WHERE clause) and a single flat CSV export (filters
//! applied in memory). The pipeline only sees the [`RowSource`] trait.

pub mod csv;
pub mod database;
pub mod factory;
pub mod filters;
pub mod traits;

pub use csv::CsvRowSource;
pub use database::DatabaseRowSource;
pub use factory::{SourceInput, create_row_source};
pub use traits::RowSource;

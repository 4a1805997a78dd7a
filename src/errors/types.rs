//! Error type definitions for the cdm-migrate application
//!
//! This module defines all fatal error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level application error type
///
/// This enum represents all fatal errors that can occur during a run.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining. Non-fatal conditions never surface here; they are
/// counted as warnings in the run report.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors (SeaORM)
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Mapping document errors (fatal validation failures)
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Source side errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Target side errors
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Mapping document specific errors
///
/// Raised while loading or validating the declarative mapping document,
/// always before any source row is fetched or any target row is written.
#[derive(Error, Debug)]
pub enum MappingError {
    /// The mapping file could not be read
    #[error("Failed to read mapping document: {0}")]
    Io(#[from] std::io::Error),

    /// The mapping file is not valid JSON or violates the document shape
    #[error("Mapping document is not valid: {0}")]
    Json(#[from] serde_json::Error),

    /// A mapping entry targets a table the catalog does not know
    #[error("Target table '{table}' does not exist in the target schema")]
    UnknownTargetTable { table: String },

    /// A mapping entry references a column missing from the target table
    #[error("Column '{column}' does not exist on target table '{table}'")]
    UnknownTargetColumn { table: String, column: String },

    /// A filter references a field the source does not have
    #[error("Filter column '{column}' does not exist in source '{source_name}'")]
    UnknownFilterColumn { source_name: String, column: String },
}

/// Source side specific errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source database is unreachable
    #[error("Cannot connect to source database '{url}': {message}")]
    Connectivity { url: String, message: String },

    /// The CSV export could not be read or parsed
    #[error("Failed to read CSV source: {0}")]
    Csv(#[from] csv::Error),

    /// A source query failed mid-fetch
    #[error("Source query failed for '{table}': {message}")]
    QueryFailed { table: String, message: String },
}

/// Target side specific errors
#[derive(Error, Debug)]
pub enum TargetError {
    /// The target database is unreachable
    #[error("Cannot connect to target database '{url}': {message}")]
    Connectivity { url: String, message: String },

    /// The target schema catalog could not be populated
    #[error("Failed to introspect target schema: {message}")]
    Introspection { message: String },
}

/// Convenience methods for creating common error types
impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

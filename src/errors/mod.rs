//! Error handling for cdm-migrate
//!
//! Fatal conditions (validation failures, connectivity loss) are modeled as
//! errors and abort the run. Everything recoverable is a [`LoadWarning`]
//! accumulated in the run report instead (see `crate::models`).

pub mod types;

pub use types::{AppError, MappingError, SourceError, TargetError};

/// Convenient result alias used throughout the application
pub type AppResult<T> = Result<T, AppError>;

//! cdm-migrate: mapping-driven ETL into an OMOP-style clinical data model
//!
//! Loads heterogeneous tabular data, from a relational database or a flat
//! CSV export, into a fixed target schema. A declarative JSON mapping
//! document describes which sources feed which target tables and how each
//! column is produced; post-load normalization passes repair person
//! references, birth fields, gender concepts and vocabulary codes.

pub mod config;
pub mod database;
pub mod errors;
pub mod mapping;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod sources;
pub mod writer;

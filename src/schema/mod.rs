//! Target schema catalog
//!
//! The target data model is never hardcoded: it is introspected from the
//! live target database at startup and held here as a [`SchemaCatalog`].
//! The mapping validator and the value resolver both consult the catalog,
//! so coercion decisions always reflect the actual column types.

pub mod introspect;

pub use introspect::{extract_schema_markdown, introspect_catalog};

use std::collections::BTreeMap;

/// Coarse column type used to pick a coercion strategy.
///
/// Derived from the backend's declared SQL type by keyword matching, the
/// same affinity rules SQLite applies to its own type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    BigInt,
    Float,
    Decimal,
    Text,
    Date,
    DateTime,
    Boolean,
    Other,
}

impl ColumnType {
    /// Classify a declared SQL type name.
    pub fn from_sql_type(sql_type: &str) -> Self {
        let t = sql_type.to_ascii_uppercase();
        // Order matters: BIGINT contains INT, TIMESTAMP/DATETIME contain DATE.
        if t.contains("BIGINT") {
            ColumnType::BigInt
        } else if t.contains("INT") {
            ColumnType::Integer
        } else if t.contains("BOOL") {
            ColumnType::Boolean
        } else if t.contains("DATETIME") || t.contains("TIMESTAMP") {
            ColumnType::DateTime
        } else if t.contains("DATE") {
            ColumnType::Date
        } else if t.contains("CHAR") || t.contains("TEXT") || t.contains("CLOB") {
            ColumnType::Text
        } else if t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB") {
            ColumnType::Float
        } else if t.contains("NUMERIC") || t.contains("DECIMAL") {
            ColumnType::Decimal
        } else {
            ColumnType::Other
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::Text)
    }
}

/// A single target column as reported by the backend.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    /// Declared type string as reported by the backend, kept for reporting.
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// One target table with its columns in declaration order.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key_columns(&self) -> Vec<&ColumnSchema> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }
}

/// All tables of the target database, keyed by table name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaCatalog {
    pub fn from_tables<I: IntoIterator<Item = TableSchema>>(tables: I) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

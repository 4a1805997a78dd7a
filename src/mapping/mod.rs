//! Declarative mapping document
//!
//! The mapping document is a JSON file that declares, per target table,
//! which source table or file feeds it, which rows qualify (filters) and
//! how each target column is produced (copied from a source field or set
//! to a constant). It also carries vocabulary mapping rules applied after
//! the load and a list of fields forced to text regardless of appearance.

pub mod validator;

use crate::errors::MappingError;
use crate::schema::SchemaCatalog;
use serde::Deserialize;
use serde::de::Error as _;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// How a single target column gets its value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRule {
    /// Copy the named source field, coercing to the column type.
    Copy(String),
    /// Insert the constant verbatim, bypassing coercion.
    Const(JsonValue),
}

impl<'de> Deserialize<'de> for ColumnRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        match value {
            JsonValue::String(field) => Ok(ColumnRule::Copy(field)),
            JsonValue::Object(map) if map.len() == 1 => match map.get("const") {
                Some(constant) => Ok(ColumnRule::Const(constant.clone())),
                None => Err(D::Error::custom(
                    "column rule object must have a single 'const' key",
                )),
            },
            _ => Err(D::Error::custom(
                "column rule must be a source field name or {\"const\": value}",
            )),
        }
    }
}

/// Row-level filter on the source.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub column: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    /// Keep rows whose field equals the given scalar.
    Equals(JsonValue),
    /// Keep rows whose field is non-null and, for strings, non-blank.
    NotEmpty,
}

impl<'de> Deserialize<'de> for FilterSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFilter {
            column: String,
            equals: Option<JsonValue>,
            #[serde(default)]
            not_empty: bool,
        }

        let raw = RawFilter::deserialize(deserializer)?;
        let op = match (raw.equals, raw.not_empty) {
            (Some(_), true) => {
                return Err(D::Error::custom(format!(
                    "filter on '{}' sets both 'equals' and 'not_empty'",
                    raw.column
                )));
            }
            (Some(value), false) => FilterOp::Equals(value),
            (None, true) => FilterOp::NotEmpty,
            (None, false) => {
                return Err(D::Error::custom(format!(
                    "filter on '{}' needs 'equals' or 'not_empty'",
                    raw.column
                )));
            }
        };
        Ok(FilterSpec {
            column: raw.column,
            op,
        })
    }
}

/// One target table's mapping entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TableMapping {
    /// Target table name.
    pub name: String,
    /// Source table or file key; defaults to the target name.
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Target column name -> rule.
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnRule>,
}

impl TableMapping {
    /// The source-side identifier this entry reads from.
    pub fn source_identifier(&self) -> &str {
        self.source_table.as_deref().unwrap_or(&self.name)
    }
}

/// Wire shape of the vocabulary mapping section.
#[derive(Debug, Clone, Deserialize)]
struct ConceptTableMappings {
    table: String,
    #[serde(default)]
    mappings: Vec<ConceptFieldMapping>,
}

#[derive(Debug, Clone, Deserialize)]
struct ConceptFieldMapping {
    source: String,
    target: String,
}

/// Wire shape of the whole document.
#[derive(Debug, Clone, Deserialize)]
struct MappingDocument {
    #[serde(default)]
    tables: Vec<TableMapping>,
    #[serde(default)]
    concept: Vec<ConceptTableMappings>,
    #[serde(default)]
    force_text_fields: Vec<String>,
}

/// A flattened vocabulary mapping rule: fill `target_field` from the
/// concept matching the code in `source_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptRule {
    pub table: String,
    pub source_field: String,
    pub target_field: String,
}

/// Validated, ready-to-run mapping specification.
#[derive(Debug, Clone, Default)]
pub struct MappingSpec {
    pub tables: Vec<TableMapping>,
    pub concepts: Vec<ConceptRule>,
    force_text_fields: BTreeSet<String>,
}

impl MappingSpec {
    /// Load a mapping document from disk and validate it against the
    /// target schema catalog.
    pub fn load(path: &Path, catalog: &SchemaCatalog) -> Result<Self, MappingError> {
        let text = std::fs::read_to_string(path)?;
        debug!("Loaded mapping document from {}", path.display());
        Self::from_json(&text, catalog)
    }

    /// Parse and validate a mapping document from JSON text.
    pub fn from_json(text: &str, catalog: &SchemaCatalog) -> Result<Self, MappingError> {
        let document: MappingDocument = serde_json::from_str(text)?;
        let spec = Self {
            tables: document.tables,
            concepts: document
                .concept
                .into_iter()
                .flat_map(|entry| {
                    let table = entry.table;
                    entry
                        .mappings
                        .into_iter()
                        .map(move |m| ConceptRule {
                            table: table.clone(),
                            source_field: m.source,
                            target_field: m.target,
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
            force_text_fields: document.force_text_fields.into_iter().collect(),
        };
        validator::validate(&spec, catalog)?;
        Ok(spec)
    }

    /// Whether the target column must be rendered as text even when the
    /// source value looks numeric.
    pub fn is_force_text(&self, column: &str) -> bool {
        self.force_text_fields.contains(column)
    }
}

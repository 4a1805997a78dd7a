//! Domain models shared across the pipeline
//!
//! Rows flow through two representations: [`RawRow`] as fetched from the
//! source (untyped JSON scalars keyed by source field name) and
//! [`ResolvedRow`] after column-rule application and coercion (typed values
//! keyed by target column name). The [`RunReport`] accumulates everything a
//! run wants to tell the caller; there is no implicit global state.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Name of the entity-of-record table in the target schema.
pub const PERSON_TABLE: &str = "person";

/// Surrogate-key column of the entity-of-record table, also the foreign-key
/// column dependent tables carry.
pub const PERSON_ID_COLUMN: &str = "person_id";

/// Natural/external identifier preserved on the entity-of-record table.
pub const PERSON_SOURCE_VALUE_COLUMN: &str = "person_source_value";

/// A single record fetched from the source, keyed by source field name.
///
/// Values are untyped JSON scalars; coercion to target column types happens
/// later in the value resolver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    values: BTreeMap<String, JsonValue>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, JsonValue)>,
        K: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        }
    }

    pub fn insert<K: Into<String>>(&mut self, field: K, value: JsonValue) {
        self.values.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.values.get(field)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A row coerced to the target table's column types, ready for insertion.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRow {
    /// Target column name -> typed value.
    pub columns: BTreeMap<String, sea_orm::Value>,
    /// Unresolved external person reference, routed through the staging
    /// column by the writer and resolved to a surrogate key post-load.
    pub staged_person_ref: Option<String>,
}

impl ResolvedRow {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Convert a scalar JSON value into a SeaORM bind value without coercion.
///
/// Used for constants (which bypass coercion) and for primary-key values
/// read back during normalization. Arrays and objects render as JSON text.
pub fn json_scalar_to_value(value: &JsonValue) -> sea_orm::Value {
    match value {
        JsonValue::Null => sea_orm::Value::String(None),
        JsonValue::Bool(b) => (*b).into(),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else if let Some(u) = n.as_u64() {
                (u as i64).into()
            } else {
                n.as_f64().unwrap_or(0.0).into()
            }
        }
        JsonValue::String(s) => s.clone().into(),
        other => other.to_string().into(),
    }
}

/// Non-fatal conditions recorded during a run.
///
/// These degrade the run but never abort it; fatal conditions are modeled
/// in `crate::errors` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadWarning {
    /// A mapping entry's source table/file key is absent from the source.
    MissingSource {
        source_table: String,
        target_table: String,
    },
    /// A mapping entry's target table is absent from the catalog.
    MissingTarget { target_table: String },
    /// A resolved column had no matching target column and was dropped.
    DroppedColumn { table: String, column: String },
    /// A chunk insert was rejected; its rows were skipped, not retried.
    ChunkRejected {
        table: String,
        rows: usize,
        message: String,
    },
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::MissingSource {
                source_table,
                target_table,
            } => write!(
                f,
                "source '{source_table}' not found; skipped mapping for '{target_table}'"
            ),
            LoadWarning::MissingTarget { target_table } => {
                write!(f, "target table '{target_table}' not found; mapping skipped")
            }
            LoadWarning::DroppedColumn { table, column } => {
                write!(f, "no column '{column}' on '{table}'; mapped value dropped")
            }
            LoadWarning::ChunkRejected {
                table,
                rows,
                message,
            } => write!(f, "chunk of {rows} row(s) rejected on '{table}': {message}"),
        }
    }
}

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    SpecLoaded,
    Loading,
    Normalizing,
    Done,
    Failed,
}

/// Per-table outcome counters.
#[derive(Debug, Clone, Default)]
pub struct TableReport {
    pub source_table: String,
    pub target_table: String,
    /// Rows fetched from the source after filtering.
    pub fetched: u64,
    /// Rows successfully inserted.
    pub inserted: u64,
    /// Rows skipped because their chunk was rejected.
    pub skipped: u64,
    /// Values degraded to null or a string fallback during coercion.
    pub coercion_warnings: u64,
}

impl TableReport {
    pub fn new<S: Into<String>, T: Into<String>>(source_table: S, target_table: T) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            ..Self::default()
        }
    }
}

/// Structured outcome of a full run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub warnings: Vec<LoadWarning>,
    /// Vocabulary lookups that found no matching concept code.
    pub concept_misses: u64,
    pub elapsed: Duration,
    state: RunState,
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Init
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal warning and emit it to the log.
    pub fn warn(&mut self, warning: LoadWarning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub fn total_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    pub fn total_coercion_warnings(&self) -> u64 {
        self.tables.iter().map(|t| t.coercion_warnings).sum()
    }

    /// Whether anything degraded during the run.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
            || self.concept_misses > 0
            || self.total_skipped() > 0
            || self.total_coercion_warnings() > 0
    }

    /// Render a human-readable end-of-run summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{:<24} {:<24} {:>8} {:>8} {:>8} {:>8}\n",
            "source", "target", "fetched", "inserted", "skipped", "coerced"
        ));
        for t in &self.tables {
            out.push_str(&format!(
                "{:<24} {:<24} {:>8} {:>8} {:>8} {:>8}\n",
                t.source_table,
                t.target_table,
                t.fetched,
                t.inserted,
                t.skipped,
                t.coercion_warnings
            ));
        }
        out.push_str(&format!("concept lookup misses: {}\n", self.concept_misses));
        for w in &self.warnings {
            out.push_str(&format!("warning: {w}\n"));
        }
        out.push_str(&format!(
            "state: {:?}, elapsed: {:.2}s\n",
            self.state,
            self.elapsed.as_secs_f64()
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_row_lookup() {
        let row = RawRow::from_pairs([("a", json!(1)), ("b", json!("x"))]);
        assert_eq!(row.get("a"), Some(&json!(1)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn json_scalar_conversion() {
        assert_eq!(json_scalar_to_value(&json!(42)), sea_orm::Value::from(42i64));
        assert_eq!(
            json_scalar_to_value(&json!("abc")),
            sea_orm::Value::from("abc".to_string())
        );
        assert_eq!(json_scalar_to_value(&json!(null)), sea_orm::Value::String(None));
    }

    #[test]
    fn report_summary_includes_tables_and_warnings() {
        let mut report = RunReport::new();
        let mut t = TableReport::new("patients", "person");
        t.fetched = 10;
        t.inserted = 10;
        report.tables.push(t);
        report.warn(LoadWarning::MissingSource {
            source_table: "visits".into(),
            target_table: "visit_occurrence".into(),
        });
        let summary = report.summary();
        assert!(summary.contains("person"));
        assert!(summary.contains("visits"));
        assert!(report.is_partial());
    }
}

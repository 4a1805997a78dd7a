//! Value resolution and coercion
//!
//! Turns a [`RawRow`] into a [`ResolvedRow`] by applying the mapping
//! entry's column rules and coercing each copied value to its target
//! column's type. Coercion never aborts a run: a value that cannot be
//! converted becomes NULL and is counted on the table report.
//!
//! Foreign keys to the person table get special handling. A value that is
//! already numeric is used as-is; anything else (a UUID, an MRN string) is
//! routed into a staging column and resolved to the surrogate key after
//! the load.

pub mod datetime;

use crate::mapping::{ColumnRule, MappingSpec, TableMapping};
use crate::models::{
    PERSON_ID_COLUMN, PERSON_TABLE, RawRow, ResolvedRow, TableReport, json_scalar_to_value,
};
use crate::schema::{ColumnSchema, ColumnType, TableSchema};
use datetime::{parse_flexible_date, parse_flexible_datetime};
use sea_orm::Value;
use serde_json::Value as JsonValue;
use tracing::debug;

/// The NULL bind value matching a column type.
///
/// Postgres infers bind parameter types, so an untyped NULL against a
/// bigint column would fail at the protocol level.
pub fn null_for(column_type: ColumnType) -> Value {
    match column_type {
        ColumnType::Integer | ColumnType::BigInt => Value::BigInt(None),
        ColumnType::Float | ColumnType::Decimal => Value::Double(None),
        ColumnType::Boolean => Value::Bool(None),
        ColumnType::Date => Value::ChronoDate(None),
        ColumnType::DateTime => Value::ChronoDateTime(None),
        ColumnType::Text | ColumnType::Other => Value::String(None),
    }
}

/// Length declared in a SQL type like `VARCHAR(50)`, if any.
fn declared_len(sql_type: &str) -> Option<usize> {
    let open = sql_type.find('(')?;
    let close = sql_type[open..].find(')')? + open;
    sql_type[open + 1..close]
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Render any JSON scalar as the text a textual column should store.
///
/// Integral floats lose their fractional suffix (a spreadsheet-mangled
/// identifier like `96702913868313.0` becomes `"96702913868313"`), arrays
/// join with commas, objects serialize as JSON.
pub fn render_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        JsonValue::String(s) => {
            // Exported identifiers sometimes arrive as "123.0".
            if let Some(prefix) = s.strip_suffix(".0")
                && !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_digit())
            {
                prefix.to_string()
            } else {
                s.clone()
            }
        }
        JsonValue::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn as_i64(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u as i64))
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            }),
        JsonValue::String(s) => {
            let t = s.trim();
            t.parse::<i64>().ok().or_else(|| {
                t.parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
        }
        JsonValue::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &JsonValue) -> Option<bool> {
    match value {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Some(true),
            "false" | "f" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub struct ValueResolver<'a> {
    spec: &'a MappingSpec,
}

impl<'a> ValueResolver<'a> {
    pub fn new(spec: &'a MappingSpec) -> Self {
        Self { spec }
    }

    /// Resolve one source row against a mapping entry.
    pub fn resolve(
        &self,
        row: &RawRow,
        mapping: &TableMapping,
        schema: &TableSchema,
        report: &mut TableReport,
    ) -> ResolvedRow {
        let mut resolved = ResolvedRow::new();

        for (target_column, rule) in &mapping.columns {
            let Some(column) = schema.column(target_column) else {
                // Pre-warned once per run by the pipeline.
                continue;
            };

            let value = match rule {
                ColumnRule::Const(constant) => {
                    if constant.is_null() {
                        null_for(column.column_type)
                    } else {
                        json_scalar_to_value(constant)
                    }
                }
                ColumnRule::Copy(source_field) => {
                    let raw = row.get(source_field).unwrap_or(&JsonValue::Null);
                    if target_column == PERSON_ID_COLUMN && mapping.name != PERSON_TABLE {
                        self.resolve_person_ref(raw, column, &mut resolved)
                    } else {
                        self.coerce(raw, column, report)
                    }
                }
            };
            resolved.columns.insert(target_column.clone(), value);
        }

        resolved
    }

    /// Route a person foreign-key value.
    fn resolve_person_ref(
        &self,
        raw: &JsonValue,
        column: &ColumnSchema,
        resolved: &mut ResolvedRow,
    ) -> Value {
        if raw.is_null() {
            return if column.nullable {
                null_for(column.column_type)
            } else {
                Value::BigInt(Some(0))
            };
        }
        if let Some(id) = as_i64(raw) {
            return Value::BigInt(Some(id));
        }
        // Non-numeric reference: stage its text for post-load resolution
        // and insert a placeholder key.
        resolved.staged_person_ref = Some(render_text(raw));
        if column.nullable {
            null_for(column.column_type)
        } else {
            Value::BigInt(Some(0))
        }
    }

    /// Coerce one copied value to its column's type.
    fn coerce(&self, raw: &JsonValue, column: &ColumnSchema, report: &mut TableReport) -> Value {
        if raw.is_null() {
            return null_for(column.column_type);
        }

        if self.spec.is_force_text(&column.name) || column.column_type.is_textual() {
            let mut text = render_text(raw);
            if let Some(max) = declared_len(&column.sql_type)
                && text.chars().count() > max
            {
                text = text.chars().take(max).collect();
            }
            return Value::String(Some(Box::new(text)));
        }

        let coerced = match column.column_type {
            ColumnType::Integer | ColumnType::BigInt => as_i64(raw).map(Value::from),
            ColumnType::Float | ColumnType::Decimal => as_f64(raw).map(Value::from),
            ColumnType::Boolean => as_bool(raw).map(Value::from),
            ColumnType::Date => match raw {
                JsonValue::String(s) => parse_flexible_date(s).map(Value::from),
                _ => None,
            },
            ColumnType::DateTime => match raw {
                JsonValue::String(s) => parse_flexible_datetime(s).map(Value::from),
                _ => None,
            },
            ColumnType::Text => unreachable!("textual columns handled above"),
            ColumnType::Other => Some(json_scalar_to_value(raw)),
        };

        match coerced {
            Some(value) => value,
            None => {
                debug!(
                    "Could not coerce {raw} to {:?} for column '{}'",
                    column.column_type, column.name
                );
                report.coercion_warnings += 1;
                null_for(column.column_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingSpec;
    use crate::schema::TableSchema;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn column(name: &str, sql_type: &str, nullable: bool) -> ColumnSchema {
        ColumnSchema {
            name: name.into(),
            column_type: ColumnType::from_sql_type(sql_type),
            sql_type: sql_type.into(),
            nullable,
            primary_key: false,
        }
    }

    fn spec_with_force_text(fields: &[&str]) -> MappingSpec {
        let doc = format!(
            r#"{{"tables": [], "force_text_fields": {}}}"#,
            serde_json::to_string(fields).unwrap()
        );
        MappingSpec::from_json(&doc, &crate::schema::SchemaCatalog::default()).unwrap()
    }

    fn mapping(columns: &[(&str, ColumnRule)]) -> TableMapping {
        TableMapping {
            name: "measurement".into(),
            source_table: None,
            filters: vec![],
            columns: columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn integral_float_renders_without_suffix() {
        assert_eq!(render_text(&json!(96702913868313.0_f64)), "96702913868313");
        assert_eq!(render_text(&json!("96702913868313.0")), "96702913868313");
        assert_eq!(render_text(&json!(3.5)), "3.5");
        assert_eq!(render_text(&json!(["A", "B"])), "A,B");
    }

    #[test]
    fn force_text_wins_over_numeric_appearance() {
        let spec = spec_with_force_text(&["value_source_value"]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("value_source_value", "FLOAT", true)],
        };
        let m = mapping(&[("value_source_value", ColumnRule::Copy("value".into()))]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("value", json!(96702913868313.0_f64))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert_eq!(
            resolved.columns["value_source_value"],
            Value::String(Some(Box::new("96702913868313".to_string())))
        );
    }

    #[test]
    fn failed_numeric_coercion_degrades_to_null() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("value_as_number", "FLOAT", true)],
        };
        let m = mapping(&[("value_as_number", ColumnRule::Copy("value".into()))]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("value", json!("not a number"))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert_eq!(resolved.columns["value_as_number"], Value::Double(None));
        assert_eq!(report.coercion_warnings, 1);
    }

    #[test]
    fn dates_parse_permissively() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![
                column("measurement_date", "DATE", true),
                column("measurement_datetime", "DATETIME", true),
            ],
        };
        let m = mapping(&[
            ("measurement_date", ColumnRule::Copy("when".into())),
            ("measurement_datetime", ColumnRule::Copy("when".into())),
        ]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("when", json!("2021-03-04T05:06:07Z"))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert!(matches!(
            resolved.columns["measurement_date"],
            Value::ChronoDate(Some(_))
        ));
        assert!(matches!(
            resolved.columns["measurement_datetime"],
            Value::ChronoDateTime(Some(_))
        ));
        assert_eq!(report.coercion_warnings, 0);
    }

    #[test]
    fn person_ref_numeric_passes_through() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("person_id", "BIGINT", false)],
        };
        let m = mapping(&[("person_id", ColumnRule::Copy("patient".into()))]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("patient", json!(42))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert_eq!(resolved.columns["person_id"], Value::BigInt(Some(42)));
        assert!(resolved.staged_person_ref.is_none());
    }

    #[test]
    fn person_ref_uuid_is_staged_with_placeholder() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("person_id", "BIGINT", false)],
        };
        let m = mapping(&[("person_id", ColumnRule::Copy("patient".into()))]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("patient", json!("af5f4c5e-9ab1-4b4e"))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert_eq!(resolved.columns["person_id"], Value::BigInt(Some(0)));
        assert_eq!(
            resolved.staged_person_ref.as_deref(),
            Some("af5f4c5e-9ab1-4b4e")
        );
    }

    #[test]
    fn person_table_own_key_is_not_staged() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "person".into(),
            columns: vec![column("person_id", "BIGINT", false)],
        };
        let mut m = mapping(&[("person_id", ColumnRule::Copy("id".into()))]);
        m.name = "person".into();
        let mut report = TableReport::new("patients", "person");

        let row = RawRow::from_pairs([("id", json!("not numeric"))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert!(resolved.staged_person_ref.is_none());
        // Ordinary coercion applies: unparseable becomes NULL plus warning.
        assert_eq!(resolved.columns["person_id"], Value::BigInt(None));
        assert_eq!(report.coercion_warnings, 1);
    }

    #[test]
    fn null_const_uses_typed_null() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("value_as_number", "FLOAT", true)],
        };
        let m = mapping(&[("value_as_number", ColumnRule::Const(json!(null)))]);
        let mut report = TableReport::new("m", "measurement");

        let resolved = resolver.resolve(&RawRow::new(), &m, &schema, &mut report);
        assert_eq!(resolved.columns["value_as_number"], Value::Double(None));
    }

    #[test]
    fn text_is_capped_to_declared_length() {
        let spec = spec_with_force_text(&[]);
        let resolver = ValueResolver::new(&spec);
        let schema = TableSchema {
            name: "measurement".into(),
            columns: vec![column("unit_source_value", "VARCHAR(5)", true)],
        };
        let m = mapping(&[("unit_source_value", ColumnRule::Copy("unit".into()))]);
        let mut report = TableReport::new("m", "measurement");

        let row = RawRow::from_pairs([("unit", json!("milligrams per deciliter"))]);
        let resolved = resolver.resolve(&row, &m, &schema, &mut report);
        assert_eq!(
            resolved.columns["unit_source_value"],
            Value::String(Some(Box::new("milli".to_string())))
        );
    }
}

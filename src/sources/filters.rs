//! Filter evaluation
//!
//! The same declared filters run in two places: compiled into a WHERE
//! clause when the source is a database, or evaluated in memory when the
//! source is a CSV export. Both paths keep the same semantics, so a
//! mapping behaves identically regardless of where the data lives.

use crate::database::DatabaseType;
use crate::mapping::{FilterOp, FilterSpec};
use crate::models::{RawRow, json_scalar_to_value};
use sea_orm::sea_query::{Alias, Condition, Expr, Func};
use serde_json::Value as JsonValue;

/// Compile filters into a WHERE condition for push-down execution.
pub fn compile_pushdown(filters: &[FilterSpec], database_type: DatabaseType) -> Condition {
    // MySQL spells the text cast CHAR; SQLite and Postgres accept TEXT.
    let text_type = match database_type {
        DatabaseType::MySQL => "CHAR",
        _ => "TEXT",
    };

    let mut condition = Condition::all();
    for filter in filters {
        let col = || Expr::col(Alias::new(&filter.column));
        condition = match &filter.op {
            FilterOp::Equals(value) => condition.add(col().eq(json_scalar_to_value(value))),
            // Trimmed, matching the in-memory evaluation: blank text is
            // empty text.
            FilterOp::NotEmpty => condition.add(col().is_not_null()).add(
                Expr::expr(Func::cust(Alias::new("TRIM")).arg(col().cast_as(Alias::new(text_type))))
                    .ne(""),
            ),
        };
    }
    condition
}

/// Evaluate filters against an already-fetched row.
pub fn matches_in_memory(filters: &[FilterSpec], row: &RawRow) -> bool {
    filters.iter().all(|filter| {
        let value = row.get(&filter.column);
        match &filter.op {
            FilterOp::Equals(expected) => filter_equals(value, expected),
            FilterOp::NotEmpty => match value {
                None | Some(JsonValue::Null) => false,
                Some(JsonValue::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            },
        }
    })
}

fn filter_equals(value: Option<&JsonValue>, expected: &JsonValue) -> bool {
    let Some(value) = value else {
        return expected.is_null();
    };
    if value == expected {
        return true;
    }
    // CSV columns often infer numeric while the mapping says "42" (or the
    // reverse), so fall back to comparing textual renderings.
    match (scalar_text(value), scalar_text(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Textual rendering used for cross-type comparisons. Integral floats
/// render without a fractional part.
pub fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            } else {
                None
            }
        }
        JsonValue::String(s) => Some(s.clone()),
        _ => None,
    }
}

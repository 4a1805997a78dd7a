//! Live schema introspection
//!
//! Reads table and column definitions out of the target database using each
//! backend's native catalog (sqlite_master/PRAGMA, information_schema). The
//! result is the [`SchemaCatalog`] the rest of the pipeline validates and
//! coerces against.

use super::{ColumnSchema, ColumnType, SchemaCatalog, TableSchema};
use crate::database::{Database, DatabaseType};
use crate::errors::{AppResult, TargetError};
use sea_orm::JsonValue;
use sea_orm::Statement;
use sea_orm::sea_query::{Alias, Expr, Query};
use std::collections::BTreeSet;
use tracing::debug;

fn json_str(row: &JsonValue, key: &str) -> Option<String> {
    row.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn introspection_error(message: impl std::fmt::Display) -> TargetError {
    TargetError::Introspection {
        message: message.to_string(),
    }
}

/// Build the schema catalog for the connected database.
pub async fn introspect_catalog(db: &Database) -> AppResult<SchemaCatalog> {
    let tables = match db.database_type() {
        DatabaseType::SQLite => introspect_sqlite(db).await?,
        DatabaseType::PostgreSQL => introspect_postgres(db).await?,
        DatabaseType::MySQL => introspect_mysql(db).await?,
    };
    let catalog = SchemaCatalog::from_tables(tables);
    debug!("Introspected {} table(s) from target schema", catalog.len());
    Ok(catalog)
}

async fn introspect_sqlite(db: &Database) -> AppResult<Vec<TableSchema>> {
    // PRAGMA output carries no declared column types, so JSON row reads
    // drop its columns; everything here goes through typed try_get.
    let names = db
        .query_all(Statement::from_string(
            db.backend(),
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
        ))
        .await
        .map_err(introspection_error)?;

    let mut tables = Vec::new();
    for row in names {
        let table_name: String = row.try_get("", "name").map_err(introspection_error)?;
        // PRAGMA arguments cannot be bound, but table names come from
        // sqlite_master itself.
        let pragma = format!("PRAGMA table_info(\"{table_name}\")");
        let columns = db
            .query_all(Statement::from_string(db.backend(), pragma))
            .await
            .map_err(introspection_error)?;

        let mut table = TableSchema {
            name: table_name,
            columns: Vec::new(),
        };
        for col in columns {
            let name: String = col.try_get("", "name").map_err(introspection_error)?;
            let sql_type: String = col.try_get("", "type").unwrap_or_default();
            let notnull: i64 = col.try_get("", "notnull").unwrap_or(0);
            let pk: i64 = col.try_get("", "pk").unwrap_or(0);
            table.columns.push(ColumnSchema {
                column_type: ColumnType::from_sql_type(&sql_type),
                sql_type,
                nullable: notnull == 0,
                primary_key: pk > 0,
                name,
            });
        }
        tables.push(table);
    }
    Ok(tables)
}

async fn introspect_postgres(db: &Database) -> AppResult<Vec<TableSchema>> {
    let columns = db
        .query_json(Statement::from_string(
            db.backend(),
            "SELECT table_name AS table_name, column_name AS column_name, \
                    data_type AS data_type, is_nullable AS is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = 'public' \
             ORDER BY table_name, ordinal_position",
        ))
        .await
        .map_err(introspection_error)?;

    let pk_rows = db
        .query_json(Statement::from_string(
            db.backend(),
            "SELECT tc.table_name AS table_name, kcu.column_name AS column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = 'public'",
        ))
        .await
        .map_err(introspection_error)?;

    let primary_keys: BTreeSet<(String, String)> = pk_rows
        .iter()
        .filter_map(|r| Some((json_str(r, "table_name")?, json_str(r, "column_name")?)))
        .collect();

    Ok(collect_tables(columns, |table, column| {
        primary_keys.contains(&(table.to_string(), column.to_string()))
    }))
}

async fn introspect_mysql(db: &Database) -> AppResult<Vec<TableSchema>> {
    let columns = db
        .query_json(Statement::from_string(
            db.backend(),
            "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, \
                    COLUMN_TYPE AS data_type, IS_NULLABLE AS is_nullable, \
                    COLUMN_KEY AS column_key \
             FROM information_schema.columns \
             WHERE table_schema = DATABASE() \
             ORDER BY table_name, ordinal_position",
        ))
        .await
        .map_err(introspection_error)?;

    Ok(collect_tables(columns, |_, _| false))
}

/// Fold ordered information_schema column rows into table schemas.
fn collect_tables<F>(rows: Vec<JsonValue>, is_primary_key: F) -> Vec<TableSchema>
where
    F: Fn(&str, &str) -> bool,
{
    let mut tables: Vec<TableSchema> = Vec::new();
    for row in rows {
        let Some(table_name) = json_str(&row, "table_name") else {
            continue;
        };
        let Some(column_name) = json_str(&row, "column_name") else {
            continue;
        };
        let sql_type = json_str(&row, "data_type").unwrap_or_default();
        let nullable = json_str(&row, "is_nullable")
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(true);
        let primary_key = json_str(&row, "column_key")
            .map(|k| k == "PRI")
            .unwrap_or_else(|| is_primary_key(&table_name, &column_name));

        if tables.last().map(|t| t.name.as_str()) != Some(table_name.as_str()) {
            tables.push(TableSchema {
                name: table_name.clone(),
                columns: Vec::new(),
            });
        }
        if let Some(table) = tables.last_mut() {
            table.columns.push(ColumnSchema {
                name: column_name,
                column_type: ColumnType::from_sql_type(&sql_type),
                sql_type,
                nullable,
                primary_key,
            });
        }
    }
    tables
}

async fn table_row_count(db: &Database, table: &str) -> Option<i64> {
    let stmt = Query::select()
        .expr_as(Expr::cust("COUNT(*)"), Alias::new("row_count"))
        .from(Alias::new(table))
        .to_owned();
    // COUNT(*) has no declared type, so the row must be read typed.
    let row = db.query_one(db.build(&stmt)).await.ok()??;
    row.try_get("", "row_count").ok()
}

/// A single foreign-key edge for the schema document.
struct ForeignKeyEdge {
    column: String,
    referenced_table: String,
    referenced_column: String,
}

async fn foreign_keys(db: &Database, table: &str) -> Vec<ForeignKeyEdge> {
    let rows = match db.database_type() {
        DatabaseType::SQLite => {
            let pragma = format!("PRAGMA foreign_key_list(\"{table}\")");
            db.query_all(Statement::from_string(db.backend(), pragma))
                .await
                .unwrap_or_default()
                .into_iter()
                .filter_map(|r| {
                    Some(ForeignKeyEdge {
                        column: r.try_get("", "from").ok()?,
                        referenced_table: r.try_get("", "table").ok()?,
                        referenced_column: r
                            .try_get::<Option<String>>("", "to")
                            .ok()
                            .flatten()
                            .unwrap_or_default(),
                    })
                })
                .collect()
        }
        DatabaseType::PostgreSQL => {
            let sql = "SELECT kcu.column_name AS column_name, \
                              ccu.table_name AS referenced_table, \
                              ccu.column_name AS referenced_column \
                       FROM information_schema.table_constraints tc \
                       JOIN information_schema.key_column_usage kcu \
                         ON tc.constraint_name = kcu.constraint_name \
                        AND tc.table_schema = kcu.table_schema \
                       JOIN information_schema.constraint_column_usage ccu \
                         ON tc.constraint_name = ccu.constraint_name \
                        AND tc.table_schema = ccu.table_schema \
                       WHERE tc.constraint_type = 'FOREIGN KEY' \
                         AND tc.table_schema = 'public' \
                         AND tc.table_name = $1";
            db.query_json(Statement::from_sql_and_values(
                db.backend(),
                sql,
                [table.into()],
            ))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                Some(ForeignKeyEdge {
                    column: json_str(&r, "column_name")?,
                    referenced_table: json_str(&r, "referenced_table")?,
                    referenced_column: json_str(&r, "referenced_column").unwrap_or_default(),
                })
            })
            .collect()
        }
        DatabaseType::MySQL => {
            let sql = "SELECT COLUMN_NAME AS column_name, \
                              REFERENCED_TABLE_NAME AS referenced_table, \
                              REFERENCED_COLUMN_NAME AS referenced_column \
                       FROM information_schema.key_column_usage \
                       WHERE table_schema = DATABASE() \
                         AND table_name = ? \
                         AND referenced_table_name IS NOT NULL";
            db.query_json(Statement::from_sql_and_values(
                db.backend(),
                sql,
                [table.into()],
            ))
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                Some(ForeignKeyEdge {
                    column: json_str(&r, "column_name")?,
                    referenced_table: json_str(&r, "referenced_table")?,
                    referenced_column: json_str(&r, "referenced_column").unwrap_or_default(),
                })
            })
            .collect()
        }
    };
    rows
}

/// Render the connected database's schema as a markdown document.
///
/// Covers a summary table with row counts, per-table column listings and
/// foreign-key relationships. Intended for mapping authors who need to see
/// what a source or target actually contains.
pub async fn extract_schema_markdown(db: &Database) -> AppResult<String> {
    let catalog = introspect_catalog(db).await?;
    let mut out = String::new();

    out.push_str("# Database Schema\n\n");
    out.push_str(&format!("Backend: {}\n\n", db.database_type()));

    out.push_str("## Tables\n\n");
    out.push_str("| Table | Columns | Rows |\n");
    out.push_str("|-------|---------|------|\n");
    for table in catalog.tables() {
        let rows = table_row_count(db, &table.name)
            .await
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            table.name,
            table.columns.len(),
            rows
        ));
    }
    out.push('\n');

    for table in catalog.tables() {
        out.push_str(&format!("## {}\n\n", table.name));
        out.push_str("| Column | Type | Nullable | Key |\n");
        out.push_str("|--------|------|----------|-----|\n");
        for col in &table.columns {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                col.name,
                col.sql_type,
                if col.nullable { "yes" } else { "no" },
                if col.primary_key { "PK" } else { "" }
            ));
        }

        let fks = foreign_keys(db, &table.name).await;
        if !fks.is_empty() {
            out.push_str("\nForeign keys:\n\n");
            for fk in fks {
                out.push_str(&format!(
                    "- `{}` -> `{}.{}`\n",
                    fk.column, fk.referenced_table, fk.referenced_column
                ));
            }
        }
        out.push('\n');
    }

    Ok(out)
}

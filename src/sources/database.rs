//! Relational database row source
//!
//! Reads mapping sources straight from a live database. Filters are pushed
//! down into the WHERE clause so only qualifying rows cross the wire.

use super::filters::compile_pushdown;
use super::traits::RowSource;
use crate::database::{Database, redact_url};
use crate::errors::{AppResult, MappingError, SourceError};
use crate::mapping::TableMapping;
use crate::models::RawRow;
use crate::schema::{SchemaCatalog, introspect_catalog};
use async_trait::async_trait;
use sea_orm::JsonValue;
use sea_orm::sea_query::{Alias, Asterisk, Query};
use tracing::debug;

pub struct DatabaseRowSource {
    db: Database,
    schema: SchemaCatalog,
}

impl DatabaseRowSource {
    /// Connect to the source database and introspect its schema.
    ///
    /// The schema is needed up front so filter columns can be checked
    /// before any fetch.
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let db = Database::connect(url, max_connections)
            .await
            .map_err(|e| SourceError::Connectivity {
                url: redact_url(url),
                message: e.to_string(),
            })?;
        let schema = introspect_catalog(&db).await?;
        debug!(
            "Source database ready: {} table(s) visible",
            schema.len()
        );
        Ok(Self { db, schema })
    }

    #[cfg(test)]
    pub async fn from_database(db: Database) -> AppResult<Self> {
        let schema = introspect_catalog(&db).await?;
        Ok(Self { db, schema })
    }
}

#[async_trait]
impl RowSource for DatabaseRowSource {
    fn describe(&self) -> String {
        format!("{} database source", self.db.database_type())
    }

    async fn has_source(&self, mapping: &TableMapping) -> AppResult<bool> {
        Ok(self.schema.has_table(mapping.source_identifier()))
    }

    async fn check_filters(&self, mapping: &TableMapping) -> Result<(), MappingError> {
        let source = mapping.source_identifier();
        // A missing source table is a non-fatal skip handled by the
        // pipeline; only filters against existing tables are checked.
        let Some(table) = self.schema.table(source) else {
            return Ok(());
        };
        for filter in &mapping.filters {
            if !table.has_column(&filter.column) {
                return Err(MappingError::UnknownFilterColumn {
                    source_name: source.to_string(),
                    column: filter.column.clone(),
                });
            }
        }
        Ok(())
    }

    async fn fetch(&self, mapping: &TableMapping) -> AppResult<Vec<RawRow>> {
        let source = mapping.source_identifier();
        let mut stmt = Query::select();
        stmt.column(Asterisk).from(Alias::new(source));
        if !mapping.filters.is_empty() {
            stmt.cond_where(compile_pushdown(&mapping.filters, self.db.database_type()));
        }

        let rows = self
            .db
            .query_json(self.db.build(&stmt))
            .await
            .map_err(|e| SourceError::QueryFailed {
                table: source.to_string(),
                message: e.to_string(),
            })?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                JsonValue::Object(map) => Some(RawRow::from_pairs(map)),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FilterOp, FilterSpec};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn seeded_source() -> DatabaseRowSource {
        let db = Database::connect("sqlite::memory:", 1).await.unwrap();
        db.execute_sql(
            "CREATE TABLE patients (id INTEGER PRIMARY KEY, gender TEXT, status TEXT)",
        )
        .await
        .unwrap();
        db.execute_sql(
            "INSERT INTO patients VALUES \
             (1, 'F', 'active'), (2, '', 'active'), (3, 'M', 'inactive'), \
             (4, '   ', 'active'), (5, NULL, 'active')",
        )
        .await
        .unwrap();
        DatabaseRowSource::from_database(db).await.unwrap()
    }

    fn mapping(filters: Vec<FilterSpec>) -> TableMapping {
        TableMapping {
            name: "person".into(),
            source_table: Some("patients".into()),
            filters,
            columns: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn pushes_filters_into_query() {
        let source = seeded_source().await;
        let rows = source
            .fetch(&mapping(vec![
                FilterSpec {
                    column: "status".into(),
                    op: FilterOp::Equals(json!("active")),
                },
                FilterSpec {
                    column: "gender".into(),
                    op: FilterOp::NotEmpty,
                },
            ]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn not_empty_pushdown_rejects_null_blank_and_whitespace() {
        let source = seeded_source().await;
        let rows = source
            .fetch(&mapping(vec![FilterSpec {
                column: "gender".into(),
                op: FilterOp::NotEmpty,
            }]))
            .await
            .unwrap();
        // Same outcome the in-memory evaluation produces for these rows.
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| r.get("id").and_then(|v| v.as_i64()).unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn reports_unknown_filter_column() {
        let source = seeded_source().await;
        let err = source
            .check_filters(&mapping(vec![FilterSpec {
                column: "no_such_field".into(),
                op: FilterOp::NotEmpty,
            }]))
            .await
            .unwrap_err();
        assert!(matches!(err, MappingError::UnknownFilterColumn { .. }));
    }

    #[tokio::test]
    async fn missing_source_table_is_not_a_filter_error() {
        let source = seeded_source().await;
        let mut m = mapping(vec![FilterSpec {
            column: "anything".into(),
            op: FilterOp::NotEmpty,
        }]);
        m.source_table = Some("nonexistent".into());
        assert!(!source.has_source(&m).await.unwrap());
        assert!(source.check_filters(&m).await.is_ok());
    }
}

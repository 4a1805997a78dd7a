//! Post-load referential normalization
//!
//! Four passes run after every table has loaded, in this order:
//!
//! 1. resolve staged person references to surrogate keys and drop the
//!    staging columns,
//! 2. backfill year/month/day of birth from `birth_datetime`,
//! 3. set `gender_concept_id` from `gender_source_value`,
//! 4. fill `*_concept_id` columns by vocabulary code lookup.
//!
//! Every pass is idempotent: rerunning over already-normalized data
//! changes nothing.

use crate::database::Database;
use crate::errors::AppResult;
use crate::mapping::{ConceptRule, MappingSpec};
use crate::models::{
    PERSON_ID_COLUMN, PERSON_SOURCE_VALUE_COLUMN, PERSON_TABLE, RunReport, json_scalar_to_value,
};
use crate::resolver::datetime::parse_flexible_datetime;
use crate::resolver::render_text;
use crate::schema::SchemaCatalog;
use crate::writer::{STAGING_COLUMN, StagingManager};
use sea_orm::sea_query::{Alias, Condition, Expr, Query};
use sea_orm::JsonValue;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Standard gender concept identifiers of the target vocabulary.
const GENDER_MALE_CONCEPT_ID: i64 = 8507;
const GENDER_FEMALE_CONCEPT_ID: i64 = 8532;
const GENDER_UNKNOWN_CONCEPT_ID: i64 = 0;

/// Vocabulary table consulted for code lookups.
const CONCEPT_TABLE: &str = "concept";
const CONCEPT_ID_COLUMN: &str = "concept_id";
const CONCEPT_CODE_COLUMN: &str = "concept_code";

/// Map a raw gender label to its standard concept identifier.
fn map_gender(source_value: &str) -> i64 {
    match source_value.trim().to_ascii_lowercase().as_str() {
        "m" | "male" => GENDER_MALE_CONCEPT_ID,
        "f" | "female" => GENDER_FEMALE_CONCEPT_ID,
        _ => GENDER_UNKNOWN_CONCEPT_ID,
    }
}

/// Extract the lookup code from a source value: the first comma-separated
/// element, trimmed. Arrays contribute their first element.
fn lookup_code(value: &JsonValue) -> Option<String> {
    let text = match value {
        JsonValue::Array(items) => render_text(items.first()?),
        other => render_text(other),
    };
    let code = text.split(',').next().unwrap_or("").trim().to_string();
    if code.is_empty() { None } else { Some(code) }
}

pub struct NormalizationPipeline<'a> {
    db: &'a Database,
    catalog: &'a SchemaCatalog,
}

impl<'a> NormalizationPipeline<'a> {
    pub fn new(db: &'a Database, catalog: &'a SchemaCatalog) -> Self {
        Self { db, catalog }
    }

    pub async fn run(
        &self,
        spec: &MappingSpec,
        staging: &mut StagingManager,
        report: &mut RunReport,
    ) -> AppResult<()> {
        let started = Instant::now();
        self.fix_person_references(staging).await?;
        info!(
            "Person reference resolution finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        let started = Instant::now();
        self.backfill_birth_fields().await?;
        info!(
            "Birth field backfill finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        let started = Instant::now();
        self.update_gender_concepts().await?;
        info!(
            "Gender concept update finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );

        let started = Instant::now();
        self.apply_concept_mappings(&spec.concepts, report).await?;
        info!(
            "Concept mapping finished in {:.2}s ({} miss(es))",
            started.elapsed().as_secs_f64(),
            report.concept_misses
        );

        Ok(())
    }

    /// Pass 1: rewrite placeholder person keys from the staging column,
    /// then drop the staging columns.
    async fn fix_person_references(&self, staging: &mut StagingManager) -> AppResult<()> {
        if staging.is_empty() {
            debug!("No staged person references; skipping resolution");
            return Ok(());
        }

        let stmt = Query::select()
            .column(Alias::new(PERSON_SOURCE_VALUE_COLUMN))
            .column(Alias::new(PERSON_ID_COLUMN))
            .from(Alias::new(PERSON_TABLE))
            .and_where(Expr::col(Alias::new(PERSON_SOURCE_VALUE_COLUMN)).is_not_null())
            .to_owned();
        let rows = self.db.query_json(self.db.build(&stmt)).await?;

        let mut key_by_source: BTreeMap<String, i64> = BTreeMap::new();
        for row in &rows {
            let Some(source) = row.get(PERSON_SOURCE_VALUE_COLUMN).and_then(|v| v.as_str())
            else {
                continue;
            };
            let Some(id) = row.get(PERSON_ID_COLUMN).and_then(|v| v.as_i64()) else {
                continue;
            };
            key_by_source.insert(source.to_string(), id);
        }
        debug!(
            "Resolving staged references against {} person record(s)",
            key_by_source.len()
        );

        let tables: Vec<String> = staging.tables().map(str::to_string).collect();
        for table in tables {
            for (source, id) in &key_by_source {
                let update = Query::update()
                    .table(Alias::new(&table))
                    .value(Alias::new(PERSON_ID_COLUMN), *id)
                    .and_where(Expr::col(Alias::new(STAGING_COLUMN)).eq(source.as_str()))
                    .to_owned();
                self.db.execute(self.db.build(&update)).await?;
            }
        }

        staging.drop_all().await;
        Ok(())
    }

    /// Pass 2: fill year/month/day of birth where missing, from the
    /// timestamp of record.
    async fn backfill_birth_fields(&self) -> AppResult<()> {
        let Some(person) = self.catalog.table(PERSON_TABLE) else {
            debug!("No person table; skipping birth backfill");
            return Ok(());
        };
        let parts = ["year_of_birth", "month_of_birth", "day_of_birth"];
        if !person.has_column("birth_datetime")
            || !parts.iter().all(|c| person.has_column(c))
        {
            debug!("Person table lacks birth columns; skipping birth backfill");
            return Ok(());
        }

        let stmt = Query::select()
            .column(Alias::new(PERSON_ID_COLUMN))
            .column(Alias::new("birth_datetime"))
            .columns(parts.map(Alias::new))
            .from(Alias::new(PERSON_TABLE))
            .and_where(Expr::col(Alias::new("birth_datetime")).is_not_null())
            .to_owned();
        let rows = self.db.query_json(self.db.build(&stmt)).await?;

        for row in rows {
            let Some(id) = row.get(PERSON_ID_COLUMN).and_then(|v| v.as_i64()) else {
                continue;
            };
            let Some(birth) = row
                .get("birth_datetime")
                .and_then(|v| v.as_str())
                .and_then(parse_flexible_datetime)
            else {
                continue;
            };

            use chrono::Datelike;
            let wanted = [
                birth.year() as i64,
                birth.month() as i64,
                birth.day() as i64,
            ];

            let mut update = Query::update();
            update.table(Alias::new(PERSON_TABLE));
            let mut changed = false;
            for (column, value) in parts.iter().zip(wanted) {
                let current = row.get(*column).and_then(|v| v.as_i64());
                if current.is_none() || current == Some(0) {
                    update.value(Alias::new(*column), value);
                    changed = true;
                }
            }
            if changed {
                update.and_where(Expr::col(Alias::new(PERSON_ID_COLUMN)).eq(id));
                self.db.execute(self.db.build(&update)).await?;
            }
        }
        Ok(())
    }

    /// Pass 3: derive `gender_concept_id` from `gender_source_value`.
    async fn update_gender_concepts(&self) -> AppResult<()> {
        let Some(person) = self.catalog.table(PERSON_TABLE) else {
            return Ok(());
        };
        if !person.has_column("gender_source_value") || !person.has_column("gender_concept_id") {
            debug!("Person table lacks gender columns; skipping gender update");
            return Ok(());
        }

        let stmt = Query::select()
            .column(Alias::new(PERSON_ID_COLUMN))
            .column(Alias::new("gender_source_value"))
            .column(Alias::new("gender_concept_id"))
            .from(Alias::new(PERSON_TABLE))
            .to_owned();
        let rows = self.db.query_json(self.db.build(&stmt)).await?;

        // Group keys per wanted concept so each concept is one UPDATE.
        let mut pending: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for row in rows {
            let Some(id) = row.get(PERSON_ID_COLUMN).and_then(|v| v.as_i64()) else {
                continue;
            };
            let source = row
                .get("gender_source_value")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let wanted = map_gender(source);
            let current = row.get("gender_concept_id").and_then(|v| v.as_i64());
            if current != Some(wanted) {
                pending.entry(wanted).or_default().push(id);
            }
        }

        for (concept, ids) in pending {
            let update = Query::update()
                .table(Alias::new(PERSON_TABLE))
                .value(Alias::new("gender_concept_id"), concept)
                .and_where(Expr::col(Alias::new(PERSON_ID_COLUMN)).is_in(ids))
                .to_owned();
            self.db.execute(self.db.build(&update)).await?;
        }
        Ok(())
    }

    /// Pass 4: fill concept-id columns by code lookup in the vocabulary
    /// table. Misses are counted, never fatal.
    async fn apply_concept_mappings(
        &self,
        rules: &[ConceptRule],
        report: &mut RunReport,
    ) -> AppResult<()> {
        if rules.is_empty() {
            return Ok(());
        }
        if !self.catalog.has_table(CONCEPT_TABLE) {
            debug!("No vocabulary table; skipping concept mapping");
            return Ok(());
        }

        // Lookup cache shared across rules; None records a known miss.
        let mut cache: BTreeMap<String, Option<i64>> = BTreeMap::new();

        for rule in rules {
            let Some(table) = self.catalog.table(&rule.table) else {
                debug!("Concept rule table '{}' not in target; skipped", rule.table);
                continue;
            };
            if !table.has_column(&rule.source_field) || !table.has_column(&rule.target_field) {
                debug!(
                    "Concept rule {}.{} -> {} references missing column(s); skipped",
                    rule.table, rule.source_field, rule.target_field
                );
                continue;
            }
            let key_columns: Vec<String> = table
                .primary_key_columns()
                .iter()
                .map(|c| c.name.clone())
                .collect();
            if key_columns.is_empty() {
                debug!(
                    "Concept rule table '{}' has no primary key; skipped",
                    rule.table
                );
                continue;
            }

            let stmt = Query::select()
                .columns(key_columns.iter().map(Alias::new))
                .column(Alias::new(&rule.source_field))
                .from(Alias::new(&rule.table))
                .cond_where(
                    Condition::all()
                        .add(
                            Condition::any()
                                .add(Expr::col(Alias::new(&rule.target_field)).is_null())
                                .add(Expr::col(Alias::new(&rule.target_field)).eq(0)),
                        )
                        .add(Expr::col(Alias::new(&rule.source_field)).is_not_null()),
                )
                .to_owned();
            let rows = self.db.query_json(self.db.build(&stmt)).await?;

            for row in rows {
                let Some(code) = row.get(&rule.source_field).and_then(lookup_code) else {
                    continue;
                };

                let concept_id = match cache.get(&code) {
                    Some(cached) => *cached,
                    None => {
                        let found = self.find_concept(&code).await?;
                        cache.insert(code.clone(), found);
                        found
                    }
                };

                let Some(concept_id) = concept_id else {
                    report.concept_misses += 1;
                    continue;
                };

                let mut update = Query::update();
                update
                    .table(Alias::new(&rule.table))
                    .value(Alias::new(&rule.target_field), concept_id);
                for key in &key_columns {
                    let key_value = row.get(key).cloned().unwrap_or(JsonValue::Null);
                    update.and_where(
                        Expr::col(Alias::new(key)).eq(json_scalar_to_value(&key_value)),
                    );
                }
                self.db.execute(self.db.build(&update)).await?;
            }
        }
        Ok(())
    }

    async fn find_concept(&self, code: &str) -> AppResult<Option<i64>> {
        let stmt = Query::select()
            .column(Alias::new(CONCEPT_ID_COLUMN))
            .from(Alias::new(CONCEPT_TABLE))
            .and_where(Expr::col(Alias::new(CONCEPT_CODE_COLUMN)).eq(code))
            .limit(1)
            .to_owned();
        let row = self.db.query_json_one(self.db.build(&stmt)).await?;
        Ok(row.and_then(|r| r.get(CONCEPT_ID_COLUMN).and_then(|v| v.as_i64())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gender_labels_map_to_standard_concepts() {
        assert_eq!(map_gender("M"), 8507);
        assert_eq!(map_gender(" male "), 8507);
        assert_eq!(map_gender("F"), 8532);
        assert_eq!(map_gender("Female"), 8532);
        assert_eq!(map_gender("unknown"), 0);
        assert_eq!(map_gender(""), 0);
    }

    #[test]
    fn lookup_code_takes_first_element() {
        assert_eq!(lookup_code(&json!("A,B")), Some("A".to_string()));
        assert_eq!(lookup_code(&json!(" 8480-6 , 8462-4")), Some("8480-6".to_string()));
        assert_eq!(lookup_code(&json!(["X", "Y"])), Some("X".to_string()));
        assert_eq!(lookup_code(&json!(12345)), Some("12345".to_string()));
        assert_eq!(lookup_code(&json!("")), None);
        assert_eq!(lookup_code(&json!(null)), None);
    }
}

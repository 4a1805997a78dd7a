//! End-to-end migration tests against SQLite
//!
//! Cover the full path: mapping validation, filter push-down, coercion,
//! batched writes, person reference staging and every normalization pass.

use anyhow::Result;
use cdm_migrate::database::Database;
use cdm_migrate::errors::{AppError, MappingError};
use cdm_migrate::mapping::MappingSpec;
use cdm_migrate::models::{LoadWarning, RunReport, RunState};
use cdm_migrate::normalize::NormalizationPipeline;
use cdm_migrate::pipeline::Loader;
use cdm_migrate::schema::introspect_catalog;
use cdm_migrate::sources::{SourceInput, create_row_source};
use cdm_migrate::writer::{STAGING_COLUMN, StagingManager};
use sea_orm::{JsonValue, Statement};

async fn connect_file_db(dir: &tempfile::TempDir, name: &str) -> (Database, String) {
    let url = format!("sqlite:{}/{name}", dir.path().display());
    let db = Database::connect(&url, 2).await.unwrap();
    (db, url)
}

async fn setup_target(dir: &tempfile::TempDir) -> (Database, String) {
    let (db, url) = connect_file_db(dir, "target.sqlite").await;
    for ddl in [
        "CREATE TABLE person (\
            person_id BIGINT NOT NULL PRIMARY KEY, \
            gender_concept_id INTEGER, \
            year_of_birth INTEGER, \
            month_of_birth INTEGER, \
            day_of_birth INTEGER, \
            birth_datetime DATETIME, \
            gender_source_value VARCHAR(50), \
            person_source_value VARCHAR(50))",
        "CREATE TABLE condition_occurrence (\
            condition_occurrence_id BIGINT NOT NULL PRIMARY KEY, \
            person_id BIGINT NOT NULL, \
            condition_concept_id INTEGER, \
            condition_source_value VARCHAR(50), \
            condition_start_date DATE)",
        "CREATE TABLE visit_occurrence (\
            visit_occurrence_id BIGINT NOT NULL PRIMARY KEY, \
            person_id BIGINT NOT NULL)",
        "CREATE TABLE concept (\
            concept_id BIGINT NOT NULL PRIMARY KEY, \
            concept_name VARCHAR(255), \
            concept_code VARCHAR(50))",
        "INSERT INTO concept VALUES (100, 'Essential hypertension', 'C1')",
    ] {
        db.execute_sql(ddl).await.unwrap();
    }
    (db, url)
}

async fn setup_source(dir: &tempfile::TempDir) -> String {
    let (db, url) = connect_file_db(dir, "source.sqlite").await;
    for ddl in [
        "CREATE TABLE patients (\
            id INTEGER, uuid TEXT, gender TEXT, birth TEXT)",
        "INSERT INTO patients VALUES \
            (1, 'uuid-a', 'F', '1980-12-01T00:00:00'), \
            (2, 'uuid-b', 'male', '1975-06-15 10:30:00'), \
            (3, 'uuid-c', '', '1990-01-01')",
        "CREATE TABLE conditions (\
            cond_id INTEGER, patient_ref TEXT, code TEXT, onset TEXT)",
        "INSERT INTO conditions VALUES \
            (10, 'uuid-a', 'C1,C2', '2020-01-02'), \
            (11, 'uuid-b', 'MISSING', '2020-02-03'), \
            (12, '42', 'C1', 'not a date')",
    ] {
        db.execute_sql(ddl).await.unwrap();
    }
    url
}

const MAPPING: &str = r#"{
    "tables": [
        {
            "name": "person",
            "source_table": "patients",
            "filters": [{"column": "gender", "not_empty": true}],
            "columns": {
                "person_id": "id",
                "gender_source_value": "gender",
                "person_source_value": "uuid",
                "birth_datetime": "birth"
            }
        },
        {
            "name": "condition_occurrence",
            "source_table": "conditions",
            "columns": {
                "condition_occurrence_id": "cond_id",
                "person_id": "patient_ref",
                "condition_source_value": "code",
                "condition_start_date": "onset"
            }
        },
        {
            "name": "visit_occurrence",
            "source_table": "no_such_table",
            "columns": {"person_id": "x"}
        }
    ],
    "concept": [
        {
            "table": "condition_occurrence",
            "mappings": [
                {"source": "condition_source_value", "target": "condition_concept_id"}
            ]
        }
    ]
}"#;

async fn query(db: &Database, sql: &str) -> Vec<JsonValue> {
    db.query_json(Statement::from_string(db.backend(), sql))
        .await
        .unwrap()
}

/// Read a single aliased value typed; COUNT(*) and friends have no
/// declared type and do not survive JSON row reads on SQLite.
async fn scalar_i64(db: &Database, sql: &str, column: &str) -> Option<i64> {
    db.query_one(Statement::from_string(db.backend(), sql))
        .await
        .unwrap()
        .and_then(|row| row.try_get::<i64>("", column).ok())
}

#[tokio::test]
async fn full_migration_from_database_source() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (target, _target_url) = setup_target(&dir).await;
    let source_url = setup_source(&dir).await;

    let catalog = introspect_catalog(&target).await?;
    let spec = MappingSpec::from_json(MAPPING, &catalog)?;
    let source = create_row_source(SourceInput::Database {
        url: source_url,
        max_connections: 2,
    })
    .await?;

    let loader = Loader::new(source, target.clone(), catalog, 100);
    let report = loader.run(&spec).await?;

    assert_eq!(report.state(), RunState::Done);

    // Blank-gender patient filtered out at the source.
    assert_eq!(
        scalar_i64(&target, "SELECT COUNT(*) AS n FROM person", "n").await,
        Some(2)
    );

    // Gender concepts resolved from the source labels.
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT gender_concept_id AS v FROM person WHERE person_id = 1", "v")
        .await,
        Some(8532)
    );
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT gender_concept_id AS v FROM person WHERE person_id = 2", "v")
        .await,
        Some(8507)
    );

    // Birth parts backfilled from birth_datetime.
    let birth = query(
        &target,
        "SELECT year_of_birth, month_of_birth, day_of_birth \
         FROM person WHERE person_id = 2",
    )
    .await;
    assert_eq!(birth[0]["year_of_birth"].as_i64(), Some(1975));
    assert_eq!(birth[0]["month_of_birth"].as_i64(), Some(6));
    assert_eq!(birth[0]["day_of_birth"].as_i64(), Some(15));

    // Staged UUID references resolved to surrogate keys; numeric refs
    // passed straight through.
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT person_id AS v FROM condition_occurrence \
             WHERE condition_occurrence_id = 10", "v")
        .await,
        Some(1)
    );
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT person_id AS v FROM condition_occurrence \
             WHERE condition_occurrence_id = 11", "v")
        .await,
        Some(2)
    );
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT person_id AS v FROM condition_occurrence \
             WHERE condition_occurrence_id = 12", "v")
        .await,
        Some(42)
    );

    // Concept lookup uses the first comma-separated code; misses stay NULL.
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT condition_concept_id AS v FROM condition_occurrence \
             WHERE condition_occurrence_id = 10", "v")
        .await,
        Some(100)
    );
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT COUNT(*) AS n FROM condition_occurrence \
             WHERE condition_concept_id IS NULL", "n")
        .await,
        Some(1)
    );
    assert_eq!(report.concept_misses, 1);

    // Unparseable date degraded to NULL and was counted.
    assert_eq!(
        scalar_i64(
            &target,
            "SELECT COUNT(*) AS n FROM condition_occurrence \
             WHERE condition_start_date IS NULL", "n")
        .await,
        Some(1)
    );
    assert!(report.total_coercion_warnings() >= 1);

    // Staging column was dropped after resolution.
    let refreshed = introspect_catalog(&target).await?;
    assert!(
        !refreshed
            .table("condition_occurrence")
            .unwrap()
            .has_column(STAGING_COLUMN)
    );

    // Missing source entry degraded into a warning, not a failure.
    assert!(report.warnings.iter().any(|w| matches!(
        w,
        LoadWarning::MissingSource { source_table, .. } if source_table == "no_such_table"
    )));
    assert!(report.is_partial());

    Ok(())
}

#[tokio::test]
async fn normalization_passes_are_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (target, _target_url) = setup_target(&dir).await;
    let source_url = setup_source(&dir).await;

    let catalog = introspect_catalog(&target).await?;
    let spec = MappingSpec::from_json(MAPPING, &catalog)?;
    let source = create_row_source(SourceInput::Database {
        url: source_url,
        max_connections: 2,
    })
    .await?;

    let loader = Loader::new(source, target.clone(), catalog.clone(), 100);
    let report = loader.run(&spec).await?;
    assert_eq!(report.state(), RunState::Done);

    let before_person = query(&target, "SELECT * FROM person ORDER BY person_id").await;
    let before_conditions = query(
        &target,
        "SELECT * FROM condition_occurrence ORDER BY condition_occurrence_id",
    )
    .await;

    // Rerun every pass over the already-normalized database.
    let refreshed = introspect_catalog(&target).await?;
    let mut staging = StagingManager::new(target.clone());
    let mut second = RunReport::new();
    NormalizationPipeline::new(&target, &refreshed)
        .run(&spec, &mut staging, &mut second)
        .await?;

    assert_eq!(
        query(&target, "SELECT * FROM person ORDER BY person_id").await,
        before_person
    );
    assert_eq!(
        query(
            &target,
            "SELECT * FROM condition_occurrence ORDER BY condition_occurrence_id"
        )
        .await,
        before_conditions
    );
    assert_eq!(second.concept_misses, 1);

    Ok(())
}

#[tokio::test]
async fn unknown_filter_column_fails_before_any_write() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (target, _target_url) = setup_target(&dir).await;
    let source_url = setup_source(&dir).await;

    let mapping = r#"{
        "tables": [
            {
                "name": "condition_occurrence",
                "source_table": "conditions",
                "columns": {
                    "condition_occurrence_id": "cond_id",
                    "person_id": "patient_ref"
                }
            },
            {
                "name": "person",
                "source_table": "patients",
                "filters": [{"column": "no_such_field", "not_empty": true}],
                "columns": {"person_id": "id"}
            }
        ]
    }"#;

    let catalog = introspect_catalog(&target).await?;
    let spec = MappingSpec::from_json(mapping, &catalog)?;
    let source = create_row_source(SourceInput::Database {
        url: source_url,
        max_connections: 2,
    })
    .await?;

    let loader = Loader::new(source, target.clone(), catalog, 100);
    let err = loader.run(&spec).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Mapping(MappingError::UnknownFilterColumn { column, .. })
            if column == "no_such_field"
    ));

    // The earlier entry must not have loaded anything.
    assert_eq!(
        scalar_i64(&target, "SELECT COUNT(*) AS n FROM condition_occurrence", "n").await,
        Some(0)
    );

    Ok(())
}

#[tokio::test]
async fn unknown_target_table_rejected_at_validation() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (target, _target_url) = setup_target(&dir).await;

    let catalog = introspect_catalog(&target).await?;
    let err = MappingSpec::from_json(
        r#"{"tables": [{"name": "no_such_target", "columns": {"x": "y"}}]}"#,
        &catalog,
    )
    .unwrap_err();
    assert!(matches!(err, MappingError::UnknownTargetTable { .. }));
    Ok(())
}

#[tokio::test]
async fn zeroed_birth_parts_are_backfilled() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (target, _target_url) = setup_target(&dir).await;

    // Some exports write 0 instead of NULL for unknown birth parts.
    target
        .execute_sql(
            "INSERT INTO person VALUES \
             (99, 0, 0, 0, 0, '1942-07-09 00:00:00', 'F', 'uuid-z')",
        )
        .await?;

    let catalog = introspect_catalog(&target).await?;
    let spec = MappingSpec::from_json(r#"{"tables": []}"#, &catalog)?;
    let mut staging = StagingManager::new(target.clone());
    let mut report = RunReport::new();
    NormalizationPipeline::new(&target, &catalog)
        .run(&spec, &mut staging, &mut report)
        .await?;

    let row = query(
        &target,
        "SELECT year_of_birth, month_of_birth, day_of_birth, gender_concept_id \
         FROM person WHERE person_id = 99",
    )
    .await;
    assert_eq!(row[0]["year_of_birth"].as_i64(), Some(1942));
    assert_eq!(row[0]["month_of_birth"].as_i64(), Some(7));
    assert_eq!(row[0]["day_of_birth"].as_i64(), Some(9));
    assert_eq!(row[0]["gender_concept_id"].as_i64(), Some(8532));

    Ok(())
}

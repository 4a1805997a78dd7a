//! Mapping validation against the target schema catalog
//!
//! Runs before any row is fetched. A mapping that names a target table or
//! column the catalog does not know is a fatal error: silently dropping a
//! whole mapping entry would hide data loss behind a clean exit. Source
//! side filter columns are checked later by the row source, which is the
//! only party that knows what fields the source actually has.

use super::MappingSpec;
use crate::errors::MappingError;
use crate::schema::SchemaCatalog;
use tracing::debug;

pub fn validate(spec: &MappingSpec, catalog: &SchemaCatalog) -> Result<(), MappingError> {
    for table in &spec.tables {
        let Some(schema) = catalog.table(&table.name) else {
            return Err(MappingError::UnknownTargetTable {
                table: table.name.clone(),
            });
        };
        for column in table.columns.keys() {
            if !schema.has_column(column) {
                return Err(MappingError::UnknownTargetColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
        }
    }
    // Concept rules referencing unknown tables or fields are skipped at
    // apply time rather than rejected here, matching their advisory role.
    debug!(
        "Mapping validated: {} table entr{}, {} concept rule(s)",
        spec.tables.len(),
        if spec.tables.len() == 1 { "y" } else { "ies" },
        spec.concepts.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::errors::MappingError;
    use crate::mapping::MappingSpec;
    use crate::mapping::tests::catalog_with;

    #[test]
    fn unknown_target_table_is_fatal() {
        let catalog = catalog_with(&[("person", &["person_id"])]);
        let err = MappingSpec::from_json(
            r#"{"tables": [{"name": "visit_occurrence", "columns": {"person_id": "id"}}]}"#,
            &catalog,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MappingError::UnknownTargetTable { table } if table == "visit_occurrence"
        ));
    }

    #[test]
    fn unknown_target_column_is_fatal() {
        let catalog = catalog_with(&[("person", &["person_id"])]);
        let err = MappingSpec::from_json(
            r#"{"tables": [{"name": "person", "columns": {"no_such_column": "x"}}]}"#,
            &catalog,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MappingError::UnknownTargetColumn { table, column }
                if table == "person" && column == "no_such_column"
        ));
    }

    #[test]
    fn concept_rules_are_not_validated_here() {
        let catalog = catalog_with(&[("person", &["person_id"])]);
        let spec = MappingSpec::from_json(
            r#"{
                "tables": [],
                "concept": [{"table": "nonexistent", "mappings": [{"source": "a", "target": "b"}]}]
            }"#,
            &catalog,
        )
        .unwrap();
        assert_eq!(spec.concepts.len(), 1);
    }
}

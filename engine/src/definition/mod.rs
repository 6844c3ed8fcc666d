//! Loading of `relations.json` and `mapping.json`.
//!
//! Both documents are checked against JSON schemas embedded at compile time
//! from `schemas/` before being deserialized into [`crate::models`] types:
//!
//! - `relations.schema.json`
//! - `mapping.schema.json`
//!
//! Relations are additionally checked for duplicate foreign keys: two
//! relations feeding the same FK column would make the join ambiguous.

use indexmap::{IndexMap, IndexSet};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::path::Path;

use crate::error::{DefinitionError, DefinitionResult};
use crate::models::{Mapping, Relation};

static RELATIONS_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/relations.schema.json"))
        .expect("Invalid embedded relations schema")
});

static MAPPING_SCHEMA: Lazy<Value> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/mapping.schema.json"))
        .expect("Invalid embedded mapping schema")
});

/// Validate a JSON document against a schema.
///
/// Returns every violation message, not just the first.
pub fn check_schema(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Parse and check a relations document.
pub fn relations_from_str(json: &str) -> DefinitionResult<Vec<Relation>> {
    let value: Value = serde_json::from_str(json)?;
    check_schema(&RELATIONS_SCHEMA, &value).map_err(|errors| DefinitionError::Schema {
        document: "relations",
        errors,
    })?;

    let relations: Vec<Relation> = serde_json::from_value(value)?;
    reject_duplicate_relations(&relations)?;
    Ok(relations)
}

/// Load and check `relations.json`.
pub fn load_relations(path: &Path) -> DefinitionResult<Vec<Relation>> {
    relations_from_str(&std::fs::read_to_string(path)?)
}

/// Parse and check a mapping document.
pub fn mapping_from_str(json: &str) -> DefinitionResult<Mapping> {
    let value: Value = serde_json::from_str(json)?;
    check_schema(&MAPPING_SCHEMA, &value).map_err(|errors| DefinitionError::Schema {
        document: "mapping",
        errors,
    })?;

    Ok(serde_json::from_value(value)?)
}

/// Load and check `mapping.json`.
pub fn load_mapping(path: &Path) -> DefinitionResult<Mapping> {
    mapping_from_str(&std::fs::read_to_string(path)?)
}

/// Fail if two relations share the same `(ForeignKey file, field)` pair.
///
/// Relations without a foreign key never collide with each other.
pub fn reject_duplicate_relations(relations: &[Relation]) -> DefinitionResult<()> {
    let mut seen: IndexMap<String, usize> = IndexMap::new();
    for fk in relations.iter().filter_map(|r| r.foreign_key.as_ref()) {
        *seen.entry(fk.to_string()).or_default() += 1;
    }

    let duplicates: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(key, _)| key)
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(DefinitionError::DuplicateRelations(duplicates))
    }
}

/// Every table named by a top-level field, a first-level nested field or a
/// relation, in first-mention order. Deeper nested mappings are never read.
pub fn required_tables(mapping: &Mapping, relations: &[Relation]) -> IndexSet<String> {
    let mut tables = IndexSet::new();

    for field in &mapping.fields {
        if let Some(file) = field.csv_file.as_deref().filter(|f| !f.is_empty()) {
            tables.insert(file.to_string());
        }
    }
    for field in mapping.nested_fields.iter().flat_map(|nested| &nested.fields) {
        if let Some(file) = field.csv_file.as_deref().filter(|f| !f.is_empty()) {
            tables.insert(file.to_string());
        }
    }

    for relation in relations {
        if let Some(fk) = &relation.foreign_key {
            tables.insert(fk.file.clone());
        }
        tables.insert(relation.primary_key.file.clone());
    }

    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NestedKind;

    const RELATIONS: &str = r#"[
        { "PrimaryKey": { "CSVFileName": "customers.csv", "CSVField": "CustomerId" },
          "ForeignKey": { "CSVFileName": "orders.csv", "CSVField": "CustomerId" } },
        { "PrimaryKey": { "CSVFileName": "orders.csv", "CSVField": "OrderId" },
          "ForeignKey": { "CSVFileName": "products.csv", "CSVField": "OrderId" } },
        { "PrimaryKey": { "CSVFileName": "regions.csv", "CSVField": "RegionId" },
          "ForeignKey": null }
    ]"#;

    const MAPPING: &str = r#"{
        "Fields": [
            { "CSVFile": "customers.csv", "CSVField": "CustomerId", "JSONField": "id",
              "Validations": { "Type": "Int", "Required": true } }
        ],
        "NestedFields": [
            { "JSONNestedFieldName": "orders", "JSONNestedType": "Array",
              "Fields": [ { "CSVFile": "orders.csv", "CSVField": "OrderId", "JSONField": "orderId" } ],
              "NestedFields": [
                  { "JSONNestedFieldName": "lines", "JSONNestedType": "Array",
                    "Fields": [ { "CSVFile": "lines.csv", "CSVField": "Sku", "JSONField": "sku" } ] }
              ] }
        ]
    }"#;

    #[test]
    fn test_load_relations() {
        let relations = relations_from_str(RELATIONS).unwrap();
        assert_eq!(relations.len(), 3);
        assert_eq!(relations[1].foreign_file(), Some("products.csv"));
        assert_eq!(relations[2].foreign_key, None);
    }

    #[test]
    fn test_duplicate_relations_rejected() {
        let json = r#"[
            { "PrimaryKey": { "CSVFileName": "a.csv", "CSVField": "Id" },
              "ForeignKey": { "CSVFileName": "b.csv", "CSVField": "AId" } },
            { "PrimaryKey": { "CSVFileName": "c.csv", "CSVField": "Id" },
              "ForeignKey": { "CSVFileName": "b.csv", "CSVField": "AId" } }
        ]"#;

        match relations_from_str(json) {
            Err(DefinitionError::DuplicateRelations(keys)) => {
                assert_eq!(keys, vec!["b.csv.AId".to_string()]);
            }
            other => panic!("expected duplicate error, got {:?}", other),
        }
    }

    #[test]
    fn test_standalone_relations_are_not_duplicates() {
        let json = r#"[
            { "PrimaryKey": { "CSVFileName": "a.csv", "CSVField": "Id" } },
            { "PrimaryKey": { "CSVFileName": "b.csv", "CSVField": "Id" } }
        ]"#;
        assert_eq!(relations_from_str(json).unwrap().len(), 2);
    }

    #[test]
    fn test_relations_schema_violation() {
        let err = relations_from_str(r#"{ "PrimaryKey": {} }"#).unwrap_err();
        assert!(matches!(err, DefinitionError::Schema { document: "relations", .. }));
    }

    #[test]
    fn test_load_mapping() {
        let mapping = mapping_from_str(MAPPING).unwrap();
        assert_eq!(mapping.fields.len(), 1);
        assert_eq!(mapping.nested_fields[0].kind, NestedKind::Array);
        assert_eq!(mapping.nested_fields[0].nested_fields[0].name, "lines");
    }

    #[test]
    fn test_mapping_rejects_unknown_nested_type() {
        let json = r#"{ "NestedFields": [ { "JSONNestedFieldName": "x", "JSONNestedType": "Map" } ] }"#;
        let err = mapping_from_str(json).unwrap_err();
        match err {
            DefinitionError::Schema { errors, .. } => assert!(!errors.is_empty()),
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[test]
    fn test_required_tables() {
        let mapping = mapping_from_str(MAPPING).unwrap();
        let relations = relations_from_str(RELATIONS).unwrap();

        let tables: Vec<_> = required_tables(&mapping, &relations).into_iter().collect();
        assert_eq!(
            tables,
            vec!["customers.csv", "orders.csv", "products.csv", "regions.csv"]
        );
    }

    #[test]
    fn test_deeper_nested_tables_not_required() {
        let mapping = mapping_from_str(MAPPING).unwrap();
        assert_eq!(mapping.nested_fields[0].nested_fields[0].fields[0].csv_file.as_deref(), Some("lines.csv"));

        let tables = required_tables(&mapping, &[]);
        assert!(!tables.contains("lines.csv"));
        assert!(tables.contains("orders.csv"));
    }
}

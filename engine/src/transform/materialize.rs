//! Mapping tree materializer.
//!
//! Builds one JSON object per driver entity:
//!
//! - top-level fields read row `i` of their table
//! - `Object` nested mappings do the same into a sub-object
//! - `Array` nested mappings are assembled from the joined data, one element
//!   per [`IdentityKey`], scoped to the current driver entity
//!
//! Fatal errors mean the mapping does not fit the data. Orphan or partial
//! relational data only produces warnings.

use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::definition::required_tables;
use crate::error::{MaterializeError, MaterializeResult};
use crate::logs::RunLog;
use crate::models::{FieldMapping, JsonObject, Mapping, NestedKind, NestedMapping, Relation, TableData};
use crate::transform::driver::{resolve_driver, Driver};
use crate::transform::join::{EnrichedRecord, JoinedData};
use crate::validation::validate;

/// Identity of one element in a nested array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub table: String,
    pub value: String,
    pub ordinal: usize,
}

impl IdentityKey {
    fn new(table: impl Into<String>, value: impl Into<String>, ordinal: usize) -> Self {
        Self {
            table: table.into(),
            value: value.into(),
            ordinal,
        }
    }
}

/// How values for an already present JSON field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    Replace,
    Concatenate,
}

/// PK table → PK values that belong to the current document.
type Scope = HashMap<String, HashSet<String>>;

/// Materialize `mapping` into a list of JSON documents.
pub fn materialize(
    mapping: &Mapping,
    relations: &[Relation],
    tables: &TableData,
    joined: &JoinedData,
    log: &mut RunLog,
) -> MaterializeResult<Vec<JsonObject>> {
    let driver = resolve_driver(mapping, tables, relations)?;
    let iterations = document_count(&driver, mapping, relations, tables);

    log.info(
        "Mapping",
        match &driver.field {
            Some(field) => format!(
                "Generating {} document(s) driven by {}.{}",
                iterations,
                driver.table.as_deref().unwrap_or(""),
                field
            ),
            None => format!("Generating {} document(s)", iterations),
        },
    );

    let mut materializer = Materializer::new(relations, tables, joined);
    materializer.total = fields_per_document(mapping) * iterations;

    let mut documents = Vec::with_capacity(iterations);
    for index in 0..iterations {
        let scope = materializer.scope_for(&driver, index);
        documents.push(materializer.document(mapping, index, scope.as_ref(), log)?);
    }

    log.success("Mapping", format!("Generated {} document(s)", documents.len()));
    Ok(documents)
}

fn document_count(driver: &Driver, mapping: &Mapping, relations: &[Relation], tables: &TableData) -> usize {
    if driver.count > 0 || !mapping.fields.is_empty() {
        return driver.count;
    }
    // No top-level fields: one document as long as there is anything to show.
    let has_rows = required_tables(mapping, relations)
        .iter()
        .any(|t| tables.get(t).is_some_and(|rows| !rows.is_empty()));
    usize::from(has_rows)
}

fn fields_per_document(mapping: &Mapping) -> usize {
    mapping.fields.len()
        + mapping
            .nested_fields
            .iter()
            .map(|n| n.fields.len() + n.nested_fields.len())
            .sum::<usize>()
}

struct Materializer<'a> {
    relations: &'a [Relation],
    tables: &'a TableData,
    joined: &'a JoinedData,
    /// PK table → PK column, first relation wins.
    pk_fields: HashMap<&'a str, &'a str>,
    processed: usize,
    total: usize,
}

impl<'a> Materializer<'a> {
    fn new(relations: &'a [Relation], tables: &'a TableData, joined: &'a JoinedData) -> Self {
        let mut pk_fields = HashMap::new();
        for relation in relations {
            pk_fields
                .entry(relation.primary_key.file.as_str())
                .or_insert(relation.primary_key.field.as_str());
        }
        Self {
            relations,
            tables,
            joined,
            pk_fields,
            processed: 0,
            total: 0,
        }
    }

    fn progress(&mut self, log: &mut RunLog) {
        self.processed += 1;
        log.report_progress(self.processed, self.total);
    }

    fn document(
        &mut self,
        mapping: &Mapping,
        index: usize,
        scope: Option<&Scope>,
        log: &mut RunLog,
    ) -> MaterializeResult<JsonObject> {
        let mut document = JsonObject::new();

        for field in &mapping.fields {
            let json_field = json_field(field)?;
            let value = if field.source().is_none() {
                log.warning(
                    "CSVData - Missing Field",
                    format!("CSV file or field missing in mapping for '{}'", json_field),
                );
                validate(None, field, log)
            } else {
                self.positional_value(field, index, log)?
            };
            document.insert(json_field.to_string(), value);
            self.progress(log);
        }

        for nested in &mapping.nested_fields {
            let value = match nested.kind {
                NestedKind::Object => self.object(nested, index, log)?,
                NestedKind::Array => self.array(nested, scope, log)?,
            };
            document.insert(nested.name.clone(), value);
        }

        Ok(document)
    }

    /// Value of `field` in row `index` of its table.
    fn positional_value(&self, field: &FieldMapping, index: usize, log: &mut RunLog) -> MaterializeResult<Value> {
        let Some((file, column)) = field.source() else {
            return Ok(validate(None, field, log));
        };

        let rows = self
            .tables
            .get(file)
            .ok_or_else(|| MaterializeError::MissingTable(file.to_string()))?;
        let row = rows.get(index).ok_or_else(|| MaterializeError::RowOutOfRange {
            table: file.to_string(),
            index,
        })?;
        let cell = row.get(column).ok_or_else(|| MaterializeError::MissingColumn {
            table: file.to_string(),
            column: column.to_string(),
            index,
        })?;

        Ok(validate(cell.as_deref(), field, log))
    }

    fn object(&mut self, nested: &NestedMapping, index: usize, log: &mut RunLog) -> MaterializeResult<Value> {
        let mut object = JsonObject::new();

        for field in &nested.fields {
            let json_field = json_field(field)?;
            let value = self.positional_value(field, index, log)?;
            object.insert(json_field.to_string(), value);
            self.progress(log);
        }

        for name in self.unsupported_children(nested, log) {
            object.insert(name, Value::Array(Vec::new()));
        }

        Ok(Value::Object(object))
    }

    fn array(&mut self, nested: &NestedMapping, scope: Option<&Scope>, log: &mut RunLog) -> MaterializeResult<Value> {
        let mut elements: IndexMap<IdentityKey, JsonObject> = IndexMap::new();
        let mut constants = Vec::new();

        for field in &nested.fields {
            let json_field = json_field(field)?;
            match field.source() {
                None => constants.push(json_field),
                Some((file, column)) => {
                    if self.relations.iter().any(|r| r.foreign_file() == Some(file)) {
                        self.foreign_side(field, json_field, file, column, scope, &mut elements, log)?;
                    } else if self.relations.iter().any(|r| r.primary_key.file == file) {
                        self.primary_side(field, json_field, file, column, scope, &mut elements, log);
                    } else {
                        self.unrelated(field, json_field, file, column, &mut elements, log);
                    }
                }
            }
            self.progress(log);
        }
        share_parent_fields(&mut elements);

        for name in self.unsupported_children(nested, log) {
            for element in elements.values_mut() {
                element.insert(name.clone(), Value::Array(Vec::new()));
            }
        }
        for name in constants {
            for element in elements.values_mut() {
                element.insert(name.to_string(), Value::String(String::new()));
            }
        }

        Ok(Value::Array(elements.into_values().map(Value::Object).collect()))
    }

    /// Field on the FK side of a relation: read the foreign rows stored
    /// under each enriched record of the PK table.
    #[allow(clippy::too_many_arguments)]
    fn foreign_side(
        &self,
        field: &FieldMapping,
        json_field: &str,
        file: &str,
        column: &str,
        scope: Option<&Scope>,
        elements: &mut IndexMap<IdentityKey, JsonObject>,
        log: &mut RunLog,
    ) -> MaterializeResult<()> {
        let found = self
            .relations
            .iter()
            .filter(|r| r.foreign_file() == Some(file))
            .find_map(|r| {
                let records = self.joined.get(&r.primary_key.file)?;
                let holds_file = records.is_empty() || records.iter().any(|rec| rec.related.contains_key(file));
                holds_file.then_some((r, records))
            });
        let Some((relation, records)) = found else {
            return Err(MaterializeError::MissingJoinedData(file.to_string()));
        };
        let pk = &relation.primary_key;

        for record in in_scope(records, &pk.file, &pk.field, scope) {
            let Some(pk_value) = record.value(&pk.field) else {
                log.warning(
                    "CSVData - Missing Primary Key",
                    format!(
                        "The primary key value for '{}' is missing in a record of '{}'",
                        pk.field, pk.file
                    ),
                );
                continue;
            };

            let children = match record.related.get(file) {
                Some(children) if !children.is_empty() => children,
                _ => {
                    log.warning(
                        format!("CSVData - {} Missing File Data", file),
                        format!(
                            "No data found for file '{}' in the record for primary key '{}' with value '{}'",
                            file, pk.field, pk_value
                        ),
                    );
                    continue;
                }
            };

            for (position, child) in children.iter().enumerate() {
                let Some(cell) = child.columns.get(column) else {
                    log.warning(
                        "CSVData - Missing Field",
                        format!(
                            "The field '{}' was not found in the data for CSV file '{}'",
                            column, file
                        ),
                    );
                    continue;
                };

                let key = match self.pk_fields.get(file).and_then(|f| child.value(f)) {
                    Some(child_pk) => IdentityKey::new(file, child_pk, 0),
                    None => IdentityKey::new(pk.file.as_str(), pk_value, position),
                };
                let value = validate(cell.as_deref(), field, log);
                merge(elements, key, json_field, value, Merge::Replace);
            }
        }

        Ok(())
    }

    /// Field on a table that only appears as a PK side: one element per
    /// enriched record.
    #[allow(clippy::too_many_arguments)]
    fn primary_side(
        &self,
        field: &FieldMapping,
        json_field: &str,
        file: &str,
        column: &str,
        scope: Option<&Scope>,
        elements: &mut IndexMap<IdentityKey, JsonObject>,
        log: &mut RunLog,
    ) {
        let (Some(records), Some(pk_field)) = (self.joined.get(file), self.pk_fields.get(file)) else {
            log.error(
                "CSVData - Missing joined data",
                format!("No joined data found for '{}'", file),
            );
            return;
        };

        for record in in_scope(records, file, pk_field, scope) {
            let Some(pk_value) = record.value(pk_field) else {
                log.warning(
                    "CSVData - Missing Primary Key",
                    format!("No primary key value found for '{}' in file '{}'", pk_field, file),
                );
                continue;
            };
            let Some(cell) = record.columns.get(column) else {
                log.warning(
                    "CSVData - Missing Field",
                    format!("No data found for '{}' in joined record of '{}'", column, file),
                );
                continue;
            };

            let value = validate(cell.as_deref(), field, log);
            merge(elements, IdentityKey::new(file, pk_value, 0), json_field, value, Merge::Concatenate);
        }
    }

    /// Field on a table outside every relation: one element per row.
    fn unrelated(
        &self,
        field: &FieldMapping,
        json_field: &str,
        file: &str,
        column: &str,
        elements: &mut IndexMap<IdentityKey, JsonObject>,
        log: &mut RunLog,
    ) {
        let Some(rows) = self.tables.get(file) else {
            log.error(
                "CSVData - Missing CSV file",
                format!("CSV file '{}' is missing from the supplied data", file),
            );
            return;
        };

        for (index, row) in rows.iter().enumerate() {
            let Some(cell) = row.get(column) else {
                log.error(
                    "CSVData - Missing column",
                    format!("CSV column '{}' not found in '{}'", column, file),
                );
                return;
            };
            let value = validate(cell.as_deref(), field, log);
            merge(
                elements,
                IdentityKey::new(file, index.to_string(), 0),
                json_field,
                value,
                Merge::Concatenate,
            );
        }
    }

    /// Names of second-level nested mappings, which are emitted empty.
    fn unsupported_children(&mut self, nested: &NestedMapping, log: &mut RunLog) -> Vec<String> {
        if nested.nested_fields.is_empty() {
            return Vec::new();
        }
        log.warning(
            "Nested Fields - Unsupported",
            format!(
                "Nested fields in nested fields are not supported. Nested fields of '{}' will be empty",
                nested.name
            ),
        );

        let mut names = Vec::with_capacity(nested.nested_fields.len());
        for child in &nested.nested_fields {
            names.push(child.name.clone());
            self.progress(log);
        }
        names
    }

    /// PK values reachable from driver entity `index`, per PK table.
    ///
    /// Every PK table reachable from the driving table through the relations
    /// gets an entry, so arrays over those tables only show what belongs to
    /// the current document.
    fn scope_for(&self, driver: &Driver, index: usize) -> Option<Scope> {
        let (table, field, value) = (driver.table.as_deref()?, driver.field.as_deref()?, driver.value(index)?);

        let mut scope = Scope::new();
        let mut queue = VecDeque::from([table]);
        while let Some(current) = queue.pop_front() {
            if scope.contains_key(current) {
                continue;
            }
            scope.insert(current.to_string(), HashSet::new());
            for relation in self.relations.iter().filter(|r| r.primary_key.file == current) {
                if let Some(fk_file) = relation.foreign_file() {
                    if self.pk_fields.contains_key(fk_file) {
                        queue.push_back(fk_file);
                    }
                }
            }
        }

        if let Some(values) = scope.get_mut(table) {
            values.insert(value.to_string());
        }
        let driving = self
            .joined
            .get(table)
            .into_iter()
            .flatten()
            .filter(|record| record.value(field) == Some(value));
        for record in driving {
            self.collect_scope(record, &mut scope);
        }

        Some(scope)
    }

    fn collect_scope(&self, record: &EnrichedRecord, scope: &mut Scope) {
        for (table, children) in &record.related {
            let Some(pk_field) = self.pk_fields.get(table.as_str()) else {
                continue;
            };
            for child in children {
                let Some(child_pk) = child.value(pk_field) else {
                    continue;
                };
                let fresh = scope
                    .get_mut(table.as_str())
                    .is_some_and(|values| values.insert(child_pk.to_string()));
                if fresh {
                    self.collect_scope(child, scope);
                }
            }
        }
    }
}

fn json_field(field: &FieldMapping) -> MaterializeResult<&str> {
    field
        .json_field
        .as_deref()
        .ok_or_else(|| MaterializeError::MissingJsonField(field.csv_field.clone().unwrap_or_default()))
}

/// Records of a PK table that belong to the current document.
fn in_scope<'r>(
    records: &'r [EnrichedRecord],
    table: &'r str,
    pk_field: &'r str,
    scope: Option<&'r Scope>,
) -> impl Iterator<Item = &'r EnrichedRecord> + 'r {
    let allowed = scope.and_then(|s| s.get(table));
    records.iter().filter(move |record| match allowed {
        Some(values) => record.value(pk_field).is_some_and(|v| values.contains(v)),
        None => true,
    })
}

fn merge(elements: &mut IndexMap<IdentityKey, JsonObject>, key: IdentityKey, json_field: &str, value: Value, how: Merge) {
    let element = elements.entry(key).or_default();
    let merged = match (how, element.get(json_field)) {
        (Merge::Concatenate, Some(existing)) => {
            Value::String(format!("{} {}", text_of(existing), text_of(&value)))
        }
        _ => value,
    };
    element.insert(json_field.to_string(), merged);
}

/// Elements keyed by position under one parent start from the fields of the
/// parent's first element, so every sibling carries the parent's columns.
fn share_parent_fields(elements: &mut IndexMap<IdentityKey, JsonObject>) {
    let parents: HashMap<(String, String), JsonObject> = elements
        .iter()
        .filter(|(key, _)| key.ordinal == 0)
        .map(|(key, element)| ((key.table.clone(), key.value.clone()), element.clone()))
        .collect();

    for (key, element) in elements.iter_mut().filter(|(key, _)| key.ordinal > 0) {
        let Some(parent) = parents.get(&(key.table.clone(), key.value.clone())) else {
            continue;
        };
        let mut filled = parent.clone();
        for (name, value) in std::mem::take(element) {
            filled.insert(name, value);
        }
        *element = filled;
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Domain models for the csvnest conversion pipeline.
//!
//! This module contains the read-only inputs of one conversion run:
//!
//! - [`Relation`] / [`FieldRef`] - primary/foreign key declarations
//! - [`Mapping`] / [`NestedMapping`] / [`FieldMapping`] - the output tree
//! - [`Validation`] / [`FieldType`] - per-field rules
//! - [`TableData`] / [`Row`] - tabular input, one table per CSV file
//!
//! The serde shapes follow `relations.json` and `mapping.json`
//! (`PascalCase` keys with `CSV`/`JSON` prefixes).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::DefinitionError;

// =============================================================================
// Tabular data
// =============================================================================

/// One CSV row: column name → cell text, `None` when the cell is absent.
pub type Row = IndexMap<String, Option<String>>;

/// Rows of one table in file order.
pub type Table = Vec<Row>;

/// Table name (CSV file name) → rows.
pub type TableData = IndexMap<String, Table>;

/// One output document.
pub type JsonObject = serde_json::Map<String, Value>;

// =============================================================================
// Relations
// =============================================================================

/// Identifies one column in one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldRef {
    /// Table (CSV file) name.
    pub file: String,
    /// Column name.
    pub field: String,
}

impl FieldRef {
    pub fn new(file: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            field: field.into(),
        }
    }

    /// Whether this reference points at `(file, field)`.
    pub fn is(&self, file: &str, field: &str) -> bool {
        self.file == file && self.field == field
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.file, self.field)
    }
}

/// A one-to-many relation between a PK column and an optional FK column.
///
/// Without a foreign key the PK table is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RelationDef")]
pub struct Relation {
    pub primary_key: FieldRef,
    pub foreign_key: Option<FieldRef>,
}

impl Relation {
    /// Relation joining `primary_key` to `foreign_key`.
    pub fn new(primary_key: FieldRef, foreign_key: FieldRef) -> Self {
        Self {
            primary_key,
            foreign_key: Some(foreign_key),
        }
    }

    /// Pass-through relation for a table with no inbound foreign key.
    pub fn standalone(primary_key: FieldRef) -> Self {
        Self {
            primary_key,
            foreign_key: None,
        }
    }

    /// File name of the FK side, if any.
    pub fn foreign_file(&self) -> Option<&str> {
        self.foreign_key.as_ref().map(|fk| fk.file.as_str())
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.foreign_key {
            Some(fk) => write!(f, "{} -> {}", self.primary_key, fk),
            None => write!(f, "{}", self.primary_key),
        }
    }
}

/// Wire shape of one entry in `relations.json`.
#[derive(Debug, Deserialize)]
struct RelationDef {
    #[serde(rename = "PrimaryKey")]
    primary_key: KeyDef,
    #[serde(rename = "ForeignKey", default)]
    foreign_key: Option<KeyDef>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyDef {
    #[serde(rename = "CSVFileName", default)]
    file: Option<String>,
    #[serde(rename = "CSVField", default)]
    field: Option<String>,
}

impl KeyDef {
    fn into_ref(self, side: &str) -> Result<Option<FieldRef>, DefinitionError> {
        let file = self.file.filter(|s| !s.trim().is_empty());
        let field = self.field.filter(|s| !s.trim().is_empty());
        match (file, field) {
            (Some(file), Some(field)) => Ok(Some(FieldRef { file, field })),
            (None, None) => Ok(None),
            (Some(file), None) => Err(DefinitionError::IncompleteKey(format!(
                "{side} in '{file}' has no CSVField"
            ))),
            (None, Some(field)) => Err(DefinitionError::IncompleteKey(format!(
                "{side} column '{field}' has no CSVFileName"
            ))),
        }
    }
}

impl TryFrom<RelationDef> for Relation {
    type Error = DefinitionError;

    fn try_from(def: RelationDef) -> Result<Self, Self::Error> {
        let primary_key = def.primary_key.into_ref("PrimaryKey")?.ok_or_else(|| {
            DefinitionError::IncompleteKey("PrimaryKey has neither CSVFileName nor CSVField".into())
        })?;
        let foreign_key = match def.foreign_key {
            Some(key) => key.into_ref("ForeignKey")?,
            None => None,
        };
        Ok(Self {
            primary_key,
            foreign_key,
        })
    }
}

// =============================================================================
// Mapping tree
// =============================================================================

/// Root of the mapping tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(rename = "Fields", default)]
    pub fields: Vec<FieldMapping>,
    #[serde(rename = "NestedFields", default)]
    pub nested_fields: Vec<NestedMapping>,
}

/// Shape of a nested JSON field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NestedKind {
    /// A single embedded object built from row `i`.
    Object,
    /// An array of objects assembled from related rows.
    Array,
}

/// A nested object or array in the output.
///
/// Only one level of nesting is materialized; `nested_fields` of a nested
/// mapping always become empty arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedMapping {
    #[serde(rename = "JSONNestedFieldName")]
    pub name: String,
    #[serde(rename = "JSONNestedType")]
    pub kind: NestedKind,
    #[serde(rename = "Fields", default)]
    pub fields: Vec<FieldMapping>,
    #[serde(rename = "NestedFields", default)]
    pub nested_fields: Vec<NestedMapping>,
}

/// Maps one CSV column onto one JSON field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "CSVFile", default)]
    pub csv_file: Option<String>,
    #[serde(rename = "CSVField", default)]
    pub csv_field: Option<String>,
    #[serde(rename = "JSONField", default)]
    pub json_field: Option<String>,
    #[serde(rename = "Validations", default)]
    pub validation: Validation,
    /// Raw value → replacement value, applied before defaults and typing.
    #[serde(rename = "ConversionRules", default)]
    pub conversion_rules: Option<IndexMap<String, Value>>,
}

impl FieldMapping {
    /// Field reading `file.field` into `json_field`.
    pub fn new(file: impl Into<String>, field: impl Into<String>, json_field: impl Into<String>) -> Self {
        Self {
            csv_file: Some(file.into()),
            csv_field: Some(field.into()),
            json_field: Some(json_field.into()),
            ..Self::default()
        }
    }

    /// Field with no source column; it always yields the default value.
    pub fn constant(json_field: impl Into<String>) -> Self {
        Self {
            json_field: Some(json_field.into()),
            ..Self::default()
        }
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_rule(mut self, from: impl Into<String>, to: impl Into<Value>) -> Self {
        self.conversion_rules
            .get_or_insert_with(IndexMap::new)
            .insert(from.into(), to.into());
        self
    }

    /// `(file, field)` when both are set and non-empty.
    pub fn source(&self) -> Option<(&str, &str)> {
        match (self.csv_file.as_deref(), self.csv_field.as_deref()) {
            (Some(file), Some(field)) if !file.is_empty() && !field.is_empty() => Some((file, field)),
            _ => None,
        }
    }

    /// Label used in diagnostics: `file - field`.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.csv_file.as_deref().unwrap_or(""),
            self.csv_field.as_deref().unwrap_or("")
        )
    }
}

/// Validation rules for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    #[serde(rename = "Required", default)]
    pub required: bool,
    #[serde(rename = "DefaultValue", default)]
    pub default_value: Option<Value>,
    #[serde(rename = "Type", default)]
    pub field_type: FieldType,
    /// Minimum length for strings, minimum value for numbers.
    #[serde(rename = "Min", default)]
    pub min: Option<f64>,
    /// Maximum length for strings, maximum value for numbers.
    #[serde(rename = "Max", default)]
    pub max: Option<f64>,
    /// Violations are logged as errors instead of warnings.
    #[serde(rename = "ValidationsNeedToPass", default)]
    pub strict: bool,
}

impl Validation {
    pub fn of_type(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }
}

/// Target type of a field. Parsed case-insensitively; unknown names fall
/// back to [`FieldType::String`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Long,
    Double,
    Bool,
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.trim().to_lowercase().as_str() {
            "int" => FieldType::Int,
            "long" => FieldType::Long,
            "double" => FieldType::Double,
            "bool" => FieldType::Bool,
            _ => FieldType::String,
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Long => "Long",
            FieldType::Double => "Double",
            FieldType::Bool => "Bool",
        };
        f.write_str(name)
    }
}

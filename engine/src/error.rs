//! Error types for the csvnest conversion pipeline.
//!
//! Only *fatal* conditions live here. Degraded data (orphan rows, failed
//! validations, unsupported nesting) is reported through
//! [`crate::logs::RunLog`] and never becomes an `Err`.
//!
//! - [`DefinitionError`] - relations/mapping loading errors
//! - [`JoinError`] - relation join engine errors
//! - [`MaterializeError`] - mapping tree materialization errors
//! - [`ConvertError`] - top-level run errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use std::path::PathBuf;

use thiserror::Error;

use crate::parser::CsvError;

// =============================================================================
// Definition Errors
// =============================================================================

/// Errors while loading `relations.json` or `mapping.json`.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// Failed to read the definition file.
    #[error("Failed to read definition file: {0}")]
    Io(#[from] std::io::Error),

    /// Document is not valid JSON or does not match the model.
    #[error("Invalid definition JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Document does not match the embedded JSON schema.
    #[error("{document} does not match its schema: {errors:?}")]
    Schema {
        document: &'static str,
        errors: Vec<String>,
    },

    /// A key reference has only one of file/field set.
    #[error("Incomplete key in relation: {0}")]
    IncompleteKey(String),

    /// Two or more relations point into the same foreign key column.
    #[error("Duplicate relations found for foreign keys: {}", .0.join(", "))]
    DuplicateRelations(Vec<String>),
}

// =============================================================================
// Join Errors
// =============================================================================

/// Errors from the relation join engine.
#[derive(Debug, Error)]
pub enum JoinError {
    /// A table named by a relation is absent from the supplied data.
    #[error("Missing table '{0}' required by relations")]
    MissingTable(String),
}

// =============================================================================
// Materialization Errors
// =============================================================================

/// Errors from the mapping tree materializer.
///
/// These mean the mapping itself does not fit the supplied data.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// A field mapping has no `JSONField`.
    #[error("JSON field missing in mapping for '{0}'")]
    MissingJsonField(String),

    /// A flat field references a table that was not supplied.
    #[error("CSV file '{0}' is missing from the supplied data")]
    MissingTable(String),

    /// A flat field asked for a row index past the end of its table.
    #[error("Record at index {index} not found in CSV file '{table}'")]
    RowOutOfRange { table: String, index: usize },

    /// A flat field references a column absent from the row.
    #[error("Field '{column}' not found in record at index {index} in file '{table}'")]
    MissingColumn {
        table: String,
        column: String,
        index: usize,
    },

    /// The relation graph says joined data exists for a table but it does not.
    #[error("No joined data found for '{0}' but the relations require it")]
    MissingJoinedData(String),
}

// =============================================================================
// Convert Errors (top-level)
// =============================================================================

/// Top-level conversion run errors.
///
/// This is the error type returned by [`crate::transform::pipeline::convert_directory`].
#[derive(Debug, Error)]
pub enum ConvertError {
    /// CSV reading error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Relations/mapping definition error.
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Join error.
    #[error("Join error: {0}")]
    Join(#[from] JoinError),

    /// Materialization error.
    #[error("Mapping error: {0}")]
    Materialize(#[from] MaterializeError),

    /// An input path does not exist.
    #[error("{kind} not found at path: {}", .path.display())]
    NotFound { kind: &'static str, path: PathBuf },

    /// A table required by the definitions is not in the CSV directory.
    #[error("Required CSV file not found: {0}")]
    MissingCsvFile(String),

    /// Output could not be written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for definition loading.
pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Result type for the join engine.
pub type JoinResult<T> = Result<T, JoinError>;

/// Result type for the materializer.
pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Result type for a conversion run.
pub type ConvertResult<T> = Result<T, ConvertError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // JoinError -> ConvertError
        let join_err = JoinError::MissingTable("orders.csv".into());
        let convert_err: ConvertError = join_err.into();
        assert!(convert_err.to_string().contains("orders.csv"));

        // MaterializeError -> ConvertError
        let mat_err = MaterializeError::MissingColumn {
            table: "customers.csv".into(),
            column: "Name".into(),
            index: 2,
        };
        let convert_err: ConvertError = mat_err.into();
        let msg = convert_err.to_string();
        assert!(msg.contains("Name"));
        assert!(msg.contains("index 2"));
    }

    #[test]
    fn test_duplicate_relations_format() {
        let err = DefinitionError::DuplicateRelations(vec![
            "orders.csv.CustomerId".into(),
            "lines.csv.OrderId".into(),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("orders.csv.CustomerId"));
        assert!(msg.contains("lines.csv.OrderId"));
    }

    #[test]
    fn test_not_found_format() {
        let err = ConvertError::NotFound {
            kind: "Mapping file",
            path: PathBuf::from("/tmp/mapping.json"),
        };
        assert_eq!(err.to_string(), "Mapping file not found at path: /tmp/mapping.json");
    }
}

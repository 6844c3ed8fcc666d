//! # csvnest - Mapping-driven CSV to nested JSON conversion
//!
//! csvnest re-nests relational CSV exports (customers, orders, products...)
//! into hierarchical JSON documents, driven by a declarative `mapping.json`
//! and the primary/foreign keys declared in `relations.json`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  CSV files  │────▶│   Parser    │────▶│    Join     │────▶│ Materialize │────▶ JSON
//! │  (ISO/UTF8) │     │  (auto-enc) │     │ (relations) │     │  (mapping)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use csvnest::{convert_directory, ConvertOptions, RunLog};
//!
//! let mut log = RunLog::new();
//! let result = convert_directory(&ConvertOptions::default(), &mut log).unwrap();
//! println!("Generated {} documents", result.documents.len());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Relations, mapping tree and tabular data
//! - [`logs`] - Run-scoped diagnostics and progress
//! - [`parser`] - CSV reading with auto-detection
//! - [`definition`] - Loading and checking `relations.json` / `mapping.json`
//! - [`validation`] - Per-field validation and conversion
//! - [`transform`] - Join, driver resolution, materialization and pipeline

// Core modules
pub mod error;
pub mod models;

// Diagnostics
pub mod logs;

// Parsing
pub mod parser;
pub mod definition;

// Validation
pub mod validation;

// Transformation
pub mod transform;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{ConvertError, DefinitionError, JoinError, MaterializeError};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    FieldMapping,
    FieldRef,
    FieldType,
    JsonObject,
    Mapping,
    NestedKind,
    NestedMapping,
    Relation,
    Row,
    TableData,
    Validation,
};

// =============================================================================
// Re-exports - Logs
// =============================================================================

pub use logs::{ConsoleListener, LogEntry, LogLevel, LogListener, Progress, RunLog};

// =============================================================================
// Re-exports - CSV Parsing & Definitions
// =============================================================================

pub use parser::{parse_file, parse_table, read_tables, CsvError, ParsedTable};
pub use definition::{load_mapping, load_relations, mapping_from_str, relations_from_str, required_tables};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{
    convert,
    convert_directory,
    join,
    materialize,
    resolve_driver,
    write_documents,
    ConversionResult,
    ConvertOptions,
    Driver,
    EnrichedRecord,
    JoinedData,
};

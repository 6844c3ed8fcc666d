//! High-level pipeline API for CSV to nested JSON conversion.
//!
//! Combines all steps of one run: loading the definitions, reading the CSV
//! directory, joining, materializing and writing the documents.
//!
//! # Example
//!
//! ```rust,no_run
//! use csvnest::logs::{ConsoleListener, RunLog};
//! use csvnest::transform::pipeline::{convert_directory, ConvertOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut log = RunLog::new();
//!     log.subscribe(ConsoleListener::default());
//!
//!     let result = convert_directory(&ConvertOptions::from_env(), &mut log)?;
//!     println!("Generated {} documents", result.documents.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::definition::{load_mapping, load_relations, required_tables};
use crate::error::{ConvertError, ConvertResult};
use crate::logs::RunLog;
use crate::models::{JsonObject, Mapping, Relation, TableData};
use crate::parser::read_tables;
use crate::transform::join::join;
use crate::transform::materialize::materialize;

const CATEGORY: &str = "Pipeline";

/// Options for one conversion run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Directory holding the `*.csv` tables
    pub csv_dir: PathBuf,

    /// Path to `mapping.json`
    pub mapping_path: PathBuf,

    /// Path to `relations.json`
    pub relations_path: PathBuf,

    /// Where to write the documents; nothing is written when `None`
    pub output_path: Option<PathBuf>,

    /// Force a delimiter instead of detecting it per file
    pub delimiter: Option<char>,

    /// Indent the written JSON
    pub pretty: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            csv_dir: PathBuf::from("csv"),
            mapping_path: PathBuf::from("mapping.json"),
            relations_path: PathBuf::from("relations.json"),
            output_path: None,
            delimiter: None,
            pretty: true,
        }
    }
}

impl ConvertOptions {
    /// Defaults overridden by `CSVNEST_*` variables (a `.env` file is honored).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let path = |key: &str| dotenvy::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from);

        Self {
            csv_dir: path("CSVNEST_CSV_DIR").unwrap_or(defaults.csv_dir),
            mapping_path: path("CSVNEST_MAPPING").unwrap_or(defaults.mapping_path),
            relations_path: path("CSVNEST_RELATIONS").unwrap_or(defaults.relations_path),
            output_path: path("CSVNEST_OUTPUT").or(defaults.output_path),
            ..defaults
        }
    }
}

/// Result of a complete conversion run
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Run identifier, shared with the run's log
    pub run_id: String,

    /// Generated documents
    pub documents: Vec<JsonObject>,

    /// Number of CSV tables read
    pub table_count: usize,

    /// Diagnostics logged during the run
    pub warning_count: usize,
    pub error_count: usize,

    /// File the documents were written to
    pub output_path: Option<PathBuf>,
}

/// Join `tables` and materialize `mapping` over them.
pub fn convert(
    mapping: &Mapping,
    relations: &[Relation],
    tables: &TableData,
    log: &mut RunLog,
) -> ConvertResult<Vec<JsonObject>> {
    let joined = join(relations, tables, log)?;
    Ok(materialize(mapping, relations, tables, &joined, log)?)
}

/// Run a full conversion from files on disk.
///
/// 1. Checks that the definitions and the CSV directory exist
/// 2. Loads and validates `relations.json` and `mapping.json`
/// 3. Reads every CSV file of the directory
/// 4. Checks that every referenced table is present
/// 5. Converts and writes the documents if an output path is set
pub fn convert_directory(options: &ConvertOptions, log: &mut RunLog) -> ConvertResult<ConversionResult> {
    require_path("Mapping file", &options.mapping_path)?;
    require_path("Relations file", &options.relations_path)?;
    require_path("CSV directory", &options.csv_dir)?;

    log.info(CATEGORY, "Loading relations and mapping...");
    let relations = load_relations(&options.relations_path)?;
    let mapping = load_mapping(&options.mapping_path)?;
    log.success(
        CATEGORY,
        format!("Loaded {} relation(s) and {} top-level field(s)", relations.len(), mapping.fields.len()),
    );

    log.info(CATEGORY, format!("Reading CSV files from {}", options.csv_dir.display()));
    let tables = read_tables(&options.csv_dir, options.delimiter)?;
    for (name, rows) in &tables {
        log.info(CATEGORY, format!("Read {} rows from {}", rows.len(), name));
    }

    for table in required_tables(&mapping, &relations) {
        if !tables.contains_key(&table) {
            return Err(ConvertError::MissingCsvFile(table));
        }
    }

    let documents = convert(&mapping, &relations, &tables, log)?;

    if let Some(path) = &options.output_path {
        write_documents(path, &documents, options.pretty)?;
        log.success(
            CATEGORY,
            format!("Wrote {} document(s) to {}", documents.len(), path.display()),
        );
    }

    Ok(ConversionResult {
        run_id: log.run_id().to_string(),
        documents,
        table_count: tables.len(),
        warning_count: log.warning_count(),
        error_count: log.error_count(),
        output_path: options.output_path.clone(),
    })
}

/// Serialize the documents as one top-level JSON array.
pub fn write_documents(path: &Path, documents: &[JsonObject], pretty: bool) -> ConvertResult<()> {
    let json = if pretty {
        serde_json::to_string_pretty(documents)?
    } else {
        serde_json::to_string(documents)?
    };
    std::fs::write(path, json)?;
    Ok(())
}

fn require_path(kind: &'static str, path: &Path) -> ConvertResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConvertError::NotFound {
            kind,
            path: path.to_path_buf(),
        })
    }
}

/// Human readable form of a delimiter.
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "TAB".to_string(),
        other => other.to_string(),
    }
}

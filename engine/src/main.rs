//! csvnest CLI - Convert related CSV tables into nested JSON documents
//!
//! # Main Commands
//!
//! ```bash
//! csvnest convert --csv-dir data --mapping mapping.json --relations relations.json -o out.json
//! csvnest check --mapping mapping.json --relations relations.json
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! csvnest parse data/orders.csv     # Just parse one CSV to JSON rows
//! csvnest join --csv-dir data       # Show the joined data
//! ```
//!
//! Paths not given on the command line fall back to `CSVNEST_*` variables
//! (a `.env` file is loaded at startup), then to the defaults.

use clap::{Parser, Subcommand};
use csvnest::definition::{load_mapping, load_relations, required_tables};
use csvnest::logs::{ConsoleListener, LogLevel, RunLog};
use csvnest::parser::{parse_file, read_tables};
use csvnest::transform::{convert_directory, format_delimiter, join, ConvertOptions};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "csvnest")]
#[command(about = "Convert related CSV tables into nested JSON documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full conversion: CSV directory + mapping + relations → JSON documents
    Convert {
        /// Directory holding the CSV files
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Mapping definition (mapping.json)
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        /// Relation definitions (relations.json)
        #[arg(short, long)]
        relations: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// CSV delimiter (auto-detect per file if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Write JSON without indentation
        #[arg(long)]
        compact: bool,

        /// Only print the final summary
        #[arg(short, long)]
        quiet: bool,

        /// Also print info-level log lines
        #[arg(short, long)]
        verbose: bool,
    },

    /// Load and validate the definitions, list the CSV files they need
    Check {
        /// Mapping definition (mapping.json)
        #[arg(short, long)]
        mapping: Option<PathBuf>,

        /// Relation definitions (relations.json)
        #[arg(short, long)]
        relations: Option<PathBuf>,
    },

    /// Parse a CSV file and output JSON rows
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// CSV delimiter (auto-detect if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Join the CSV files along the relations and output the result
    Join {
        /// Directory holding the CSV files
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Relation definitions (relations.json)
        #[arg(short, long)]
        relations: Option<PathBuf>,

        /// CSV delimiter (auto-detect per file if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let defaults = ConvertOptions::from_env();

    let result = match cli.command {
        Commands::Convert {
            csv_dir,
            mapping,
            relations,
            output,
            delimiter,
            compact,
            quiet,
            verbose,
        } => {
            let options = ConvertOptions {
                csv_dir: csv_dir.unwrap_or(defaults.csv_dir),
                mapping_path: mapping.unwrap_or(defaults.mapping_path),
                relations_path: relations.unwrap_or(defaults.relations_path),
                output_path: output.or(defaults.output_path),
                delimiter,
                pretty: !compact,
            };
            cmd_convert(&options, quiet, verbose)
        }

        Commands::Check { mapping, relations } => cmd_check(
            &mapping.unwrap_or(defaults.mapping_path),
            &relations.unwrap_or(defaults.relations_path),
        ),

        Commands::Parse {
            input,
            delimiter,
            output,
        } => cmd_parse(&input, delimiter, output.as_deref()),

        Commands::Join {
            csv_dir,
            relations,
            delimiter,
            output,
        } => cmd_join(
            &csv_dir.unwrap_or(defaults.csv_dir),
            &relations.unwrap_or(defaults.relations_path),
            delimiter,
            output.as_deref(),
        ),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_convert(options: &ConvertOptions, quiet: bool, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut log = RunLog::new();
    if !quiet {
        log.subscribe(ConsoleListener { verbose });
        eprintln!("📄 Converting CSV files in: {}", options.csv_dir.display());
    }

    let result = convert_directory(options, &mut log)?;

    if result.output_path.is_none() {
        let json = if options.pretty {
            serde_json::to_string_pretty(&result.documents)?
        } else {
            serde_json::to_string(&result.documents)?
        };
        println!("{}", json);
    }

    eprintln!("\n📊 Run {}", result.run_id);
    eprintln!("   Tables: {}", result.table_count);
    eprintln!("   Documents: {}", result.documents.len());
    eprintln!("   Warnings: {}", result.warning_count);
    eprintln!("   Errors: {}", result.error_count);

    if result.warning_count + result.error_count > 0 {
        eprintln!("\n   Diagnostics by category:");
        for (category, messages) in log.by_category() {
            let level = log
                .entries()
                .iter()
                .find(|e| e.category == category)
                .map(|e| e.level);
            if matches!(level, Some(LogLevel::Warning | LogLevel::Error)) {
                eprintln!("   - {} ({})", category, messages.len());
            }
        }
    }

    if let Some(path) = &result.output_path {
        eprintln!("💾 Output written to: {}", path.display());
    }
    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_check(mapping_path: &Path, relations_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("✔️  Checking definitions");

    let relations = load_relations(relations_path)?;
    eprintln!("   ✓ {}: {} relation(s)", relations_path.display(), relations.len());
    for relation in &relations {
        eprintln!("     - {}", relation);
    }

    let mapping = load_mapping(mapping_path)?;
    eprintln!(
        "   ✓ {}: {} field(s), {} nested field(s)",
        mapping_path.display(),
        mapping.fields.len(),
        mapping.nested_fields.len()
    );

    eprintln!("\n📋 Required CSV files:");
    for table in required_tables(&mapping, &relations) {
        println!("{}", table);
    }
    Ok(())
}

fn cmd_parse(input: &Path, delimiter: Option<char>, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let result = parse_file(input, delimiter)?;

    eprintln!("   Encoding: {}", result.encoding);
    eprintln!(
        "   Delimiter: '{}'{}",
        format_delimiter(result.delimiter),
        if delimiter.is_none() { " (auto-detected)" } else { "" }
    );
    eprintln!("   Columns: {}", result.headers.join(", "));
    eprintln!("✅ Parsed {} records", result.rows.len());

    let json = serde_json::to_string_pretty(&result.rows)?;
    write_output(&json, output)
}

fn cmd_join(
    csv_dir: &Path,
    relations_path: &Path,
    delimiter: Option<char>,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("🔗 Joining CSV files in: {}", csv_dir.display());

    let relations = load_relations(relations_path)?;
    let tables = read_tables(csv_dir, delimiter)?;

    let mut log = RunLog::new();
    log.subscribe(ConsoleListener::default());
    let joined = join(&relations, &tables, &mut log)?;

    let view: serde_json::Map<String, Value> = joined
        .iter()
        .map(|(table, records)| {
            (
                table.clone(),
                Value::Array(records.iter().map(|r| r.to_json()).collect()),
            )
        })
        .collect();

    let json = serde_json::to_string_pretty(&view)?;
    write_output(&json, output)
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

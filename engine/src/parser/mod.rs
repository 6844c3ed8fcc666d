//! CSV directory reader with encoding and delimiter auto-detection.
//!
//! Turns every `*.csv` file of a directory into one [`Table`], keyed by the
//! file name (extension included) so relations and mappings can name it
//! directly. No mapping logic here.

use std::path::Path;

use crate::models::{Row, Table, TableData};

/// CSV parsing error with context
#[derive(Debug, Clone)]
pub struct CsvError {
    pub file: Option<String>,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for CsvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}, line {}: {}", file, self.line, self.message),
            None => write!(f, "Line {}: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for CsvError {}

impl CsvError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line,
            message: message.into(),
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// One parsed CSV file with the settings that were used
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub rows: Table,
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        // UTF-8, ASCII and anything unknown
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the header line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text into rows keyed by header.
///
/// Cells missing from a short row are `None`; extra cells are dropped.
///
/// # Example
/// ```
/// use csvnest::parser::parse_table;
///
/// let rows = parse_table("id,name\n1,Alice\n2", ',').unwrap();
/// assert_eq!(rows[0]["name"].as_deref(), Some("Alice"));
/// assert_eq!(rows[1]["name"], None);
/// ```
pub fn parse_table(content: &str, delimiter: char) -> Result<Table, CsvError> {
    Ok(parse_with_headers(content, delimiter)?.1)
}

fn parse_with_headers(content: &str, delimiter: char) -> Result<(Vec<String>, Table), CsvError> {
    if content.trim().is_empty() {
        return Err(CsvError::new(1, "Empty CSV file"));
    }
    if !delimiter.is_ascii() {
        return Err(CsvError::new(0, format!("Delimiter '{}' is not ASCII", delimiter)));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.trim_start_matches('\u{feff}').as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvError::new(1, format!("Cannot read header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(CsvError::new(1, "No headers found"));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line() as usize).unwrap_or(idx + 2);
            CsvError::new(line, e.to_string())
        })?;

        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let row: Row = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).map(str::to_string)))
            .collect();
        rows.push(row);
    }

    Ok((headers, rows))
}

/// Parse raw bytes, detecting encoding and (unless given) the delimiter.
pub fn parse_bytes(bytes: &[u8], delimiter: Option<char>) -> Result<ParsedTable, CsvError> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(&content));
    let (headers, rows) = parse_with_headers(&content, delimiter)?;

    Ok(ParsedTable {
        rows,
        encoding,
        delimiter,
        headers,
    })
}

/// Parse one CSV file.
pub fn parse_file(path: &Path, delimiter: Option<char>) -> Result<ParsedTable, CsvError> {
    let name = path.display().to_string();
    let bytes = std::fs::read(path)
        .map_err(|e| CsvError::new(0, format!("Cannot read file: {}", e)).in_file(&name))?;
    parse_bytes(&bytes, delimiter).map_err(|e| e.in_file(name))
}

/// Read every `*.csv` file in `dir` into a table named after the file.
///
/// Files are visited in name order so the resulting map is stable.
pub fn read_tables(dir: &Path, delimiter: Option<char>) -> Result<TableData, CsvError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        CsvError::new(0, format!("Cannot read directory: {}", e)).in_file(dir.display().to_string())
    })?;

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();

    let mut tables = TableData::new();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let parsed = parse_file(&path, delimiter)?;
        tables.insert(name.to_string(), parsed.rows);
    }

    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_simple_csv() {
        let rows = parse_table("name;age\nAlice;30\nBob;25", ';').unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"].as_deref(), Some("Alice"));
        assert_eq!(rows[0]["age"].as_deref(), Some("30"));
        assert_eq!(rows[1]["name"].as_deref(), Some("Bob"));
    }

    #[test]
    fn test_quoted_values() {
        let rows = parse_table("name,value\n\"Doe, Jane\",\"Hello World\"", ',').unwrap();

        assert_eq!(rows[0]["name"].as_deref(), Some("Doe, Jane"));
        assert_eq!(rows[0]["value"].as_deref(), Some("Hello World"));
    }

    #[test]
    fn test_empty_lines_skipped() {
        let rows = parse_table("a;b\n1;2\n\n3;4\n", ';').unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_short_rows_yield_none() {
        let rows = parse_table("a;b;c\n1;;3\n4", ';').unwrap();

        assert_eq!(rows[0]["b"].as_deref(), Some(""));
        assert_eq!(rows[1]["a"].as_deref(), Some("4"));
        assert_eq!(rows[1]["b"], None);
        assert_eq!(rows[1]["c"], None);
    }

    #[test]
    fn test_headers_trimmed_and_ordered() {
        let parsed = parse_bytes(b" id , name \n1,Ann", None).unwrap();
        assert_eq!(parsed.headers, vec!["id", "name"]);
        let keys: Vec<_> = parsed.rows[0].keys().cloned().collect();
        assert_eq!(keys, vec!["id", "name"]);
    }

    #[test]
    fn test_empty_csv_error() {
        let err = parse_table("", ';').unwrap_err();
        assert!(err.message.contains("Empty"));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_read_tables_keys_by_file_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("customers.csv"), "CustomerId,Name\n1,Ann\n2,Bob\n").unwrap();
        fs::write(dir.path().join("orders.csv"), "OrderId;CustomerId\n100;1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tables = read_tables(dir.path(), None).unwrap();

        let names: Vec<_> = tables.keys().cloned().collect();
        assert_eq!(names, vec!["customers.csv", "orders.csv"]);
        assert_eq!(tables["customers.csv"].len(), 2);
        assert_eq!(tables["orders.csv"][0]["CustomerId"].as_deref(), Some("1"));
    }

    #[test]
    fn test_error_names_file() {
        let err = CsvError::new(5, "bad quote").in_file("orders.csv");
        assert_eq!(err.to_string(), "orders.csv, line 5: bad quote");
    }
}

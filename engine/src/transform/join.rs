//! Relation join engine.
//!
//! Enriches every primary-key table with the foreign rows that point at it.
//!
//! ```text
//! customers.csv                 orders.csv                    JoinedData["customers.csv"]
//! ┌────────────┐                ┌─────────┬────────────┐      ┌──────────────────────────────┐
//! │ CustomerId │                │ OrderId │ CustomerId │      │ CustomerId: 1                │
//! │ 1          │   ──────▶      │ 100     │ 1          │ ──▶  │ orders.csv: [{OrderId: 100}] │
//! │ 2          │                │ 200     │ 2          │      ├──────────────────────────────┤
//! └────────────┘                └─────────┴────────────┘      │ CustomerId: 2 ...            │
//!                                                             └──────────────────────────────┘
//! ```
//!
//! Relations are applied in input order. A PK value gets one enriched record
//! per table; later relations into the same PK table add their foreign rows
//! to that record. After all relations ran, foreign rows whose table is
//! itself a PK table are swapped for that table's enriched records, so
//! `customers → orders → products` can be walked in two hops.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::error::{JoinError, JoinResult};
use crate::logs::RunLog;
use crate::models::{FieldRef, Relation, Row, Table, TableData};

const CATEGORY: &str = "Join";

/// A row plus the foreign rows related to it, keyed by foreign table name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub columns: Row,
    pub related: IndexMap<String, Vec<EnrichedRecord>>,
}

impl EnrichedRecord {
    /// Record with no related rows.
    pub fn from_row(row: &Row) -> Self {
        Self {
            columns: row.clone(),
            related: IndexMap::new(),
        }
    }

    /// Non-null value of `column`.
    pub fn value(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(|v| v.as_deref())
    }

    /// Columns and related collections as one JSON object.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (column, value) in &self.columns {
            obj.insert(column.clone(), value.clone().map_or(Value::Null, Value::String));
        }
        for (table, records) in &self.related {
            obj.insert(
                table.clone(),
                Value::Array(records.iter().map(EnrichedRecord::to_json).collect()),
            );
        }
        Value::Object(obj)
    }
}

/// Primary table name → enriched records.
pub type JoinedData = IndexMap<String, Vec<EnrichedRecord>>;

/// Join `tables` along `relations`.
///
/// Fails only when a table named by a relation is missing entirely.
pub fn join(relations: &[Relation], tables: &TableData, log: &mut RunLog) -> JoinResult<JoinedData> {
    let mut buckets = Buckets::default();

    for relation in relations {
        log.info(CATEGORY, format!("Processing relation: {}", relation));

        match &relation.foreign_key {
            None => pass_through(&relation.primary_key, tables, &mut buckets, log)?,
            Some(fk) => join_relation(&relation.primary_key, fk, tables, &mut buckets, log)?,
        }
    }

    let joined = link_chained(&buckets.joined, relations);
    log.success(
        CATEGORY,
        format!("Joined {} primary table(s)", joined.len()),
    );
    Ok(joined)
}

/// Enriched records under construction, with the lookups shared by all
/// relations into the same PK table.
#[derive(Default)]
struct Buckets {
    joined: JoinedData,
    /// (table, PK column) → PK value → index into `joined[table]`
    positions: HashMap<(String, String), HashMap<String, usize>>,
    /// Source rows with a null PK already stored, by table
    bare_rows: HashMap<String, HashSet<usize>>,
}

impl Buckets {
    fn ensure(&mut self, table: &str) {
        self.joined.entry(table.to_string()).or_default();
    }

    /// Index of the record holding `value` in `column`, first one wins.
    fn position(&mut self, table: &str, column: &str, value: &str) -> Option<usize> {
        let records = self.joined.entry(table.to_string()).or_default();
        let positions = self
            .positions
            .entry((table.to_string(), column.to_string()))
            .or_insert_with(|| {
                let mut positions = HashMap::new();
                for (i, record) in records.iter().enumerate() {
                    if let Some(value) = record.value(column) {
                        positions.entry(value.to_string()).or_insert(i);
                    }
                }
                positions
            });
        positions.get(value).copied()
    }

    fn record_mut(&mut self, table: &str, index: usize) -> Option<&mut EnrichedRecord> {
        self.joined.get_mut(table).and_then(|records| records.get_mut(index))
    }

    fn push(&mut self, table: &str, record: EnrichedRecord) {
        let records = self.joined.entry(table.to_string()).or_default();
        let at = records.len();
        for ((indexed, column), positions) in self.positions.iter_mut() {
            if indexed.as_str() != table {
                continue;
            }
            if let Some(value) = record.value(column) {
                positions.entry(value.to_string()).or_insert(at);
            }
        }
        records.push(record);
    }

    /// Whether source row `row_index` of `table` is stored for the first time.
    fn first_bare(&mut self, table: &str, row_index: usize) -> bool {
        self.bare_rows.entry(table.to_string()).or_default().insert(row_index)
    }
}

fn table<'a>(tables: &'a TableData, name: &str) -> JoinResult<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| JoinError::MissingTable(name.to_string()))
}

/// Copy every row of a table with no inbound relation.
fn pass_through(
    pk: &FieldRef,
    tables: &TableData,
    buckets: &mut Buckets,
    log: &mut RunLog,
) -> JoinResult<()> {
    let rows = table(tables, &pk.file)?;
    log.info(CATEGORY, format!("Processing {} records from {}", rows.len(), pk.file));

    buckets.ensure(&pk.file);
    for (row_index, row) in rows.iter().enumerate() {
        if row.get(&pk.field).and_then(|v| v.as_deref()).is_none() {
            buckets.first_bare(&pk.file, row_index);
        }
        buckets.push(&pk.file, EnrichedRecord::from_row(row));
    }
    Ok(())
}

fn join_relation(
    pk: &FieldRef,
    fk: &FieldRef,
    tables: &TableData,
    buckets: &mut Buckets,
    log: &mut RunLog,
) -> JoinResult<()> {
    let pk_rows = table(tables, &pk.file)?;
    let fk_rows = table(tables, &fk.file)?;
    log.info(CATEGORY, format!("Processing {} records from {}", pk_rows.len(), pk.file));

    let lookup = foreign_lookup(fk, fk_rows, log);
    let warning_category = format!("Relation Warning {} <=> {}", pk.file, fk.file);
    buckets.ensure(&pk.file);
    // PK values already served by this relation; a repeated PK row must not
    // attach the same foreign rows twice.
    let mut served: HashSet<&str> = HashSet::new();

    for (row_index, row) in pk_rows.iter().enumerate() {
        let Some(pk_value) = row.get(&pk.field).and_then(|v| v.as_deref()) else {
            log.warning(
                warning_category.as_str(),
                format!(
                    "Missing primary key '{}' in a row of {}; related rows from {} are not attached",
                    pk.field, pk.file, fk.file
                ),
            );
            // An earlier relation into this table may already hold it.
            if buckets.first_bare(&pk.file, row_index) {
                buckets.push(&pk.file, EnrichedRecord::from_row(row));
            }
            continue;
        };

        let found = lookup.get(pk_value);
        if found.is_none() {
            log.warning(
                warning_category.as_str(),
                format!(
                    "No related records found for {} ({} = {}) in {}",
                    pk.file, pk.field, pk_value, fk.file
                ),
            );
        }
        let related = found
            .map(|rows| rows.iter().map(|r| EnrichedRecord::from_row(r)).collect())
            .unwrap_or_default();

        let existing = buckets
            .position(&pk.file, &pk.field, pk_value)
            .and_then(|i| buckets.record_mut(&pk.file, i));

        match existing {
            Some(record) if served.contains(pk_value) => {
                // Duplicate PK row within this relation, already enriched.
                record.related.entry(fk.file.clone()).or_default();
            }
            Some(record) => {
                record.related.entry(fk.file.clone()).or_default().extend(related);
            }
            None => {
                let mut record = EnrichedRecord::from_row(row);
                record.related.insert(fk.file.clone(), related);
                buckets.push(&pk.file, record);
            }
        }
        served.insert(pk_value);
    }

    Ok(())
}

/// FK value → FK rows, in row order.
fn foreign_lookup<'a>(fk: &FieldRef, rows: &'a Table, log: &mut RunLog) -> HashMap<&'a str, Vec<&'a Row>> {
    let mut lookup: HashMap<&str, Vec<&Row>> = HashMap::new();
    let mut skipped = 0;

    for row in rows {
        match row.get(&fk.field).and_then(|v| v.as_deref()) {
            Some(value) => lookup.entry(value).or_default().push(row),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log.warning(
            format!("Relation Warning {}", fk.file),
            format!(
                "{} row(s) of {} have no value for foreign key '{}' and were left out of the join",
                skipped, fk.file, fk.field
            ),
        );
    }
    lookup
}

/// Replace foreign rows by the enriched records of their own table.
fn link_chained(flat: &JoinedData, relations: &[Relation]) -> JoinedData {
    let linker = Linker::new(flat, relations);
    flat.iter()
        .map(|(table, records)| {
            let mut path = vec![table.as_str()];
            let linked = records.iter().map(|r| linker.link(r, &mut path)).collect();
            (table.clone(), linked)
        })
        .collect()
}

struct Linker<'a> {
    flat: &'a JoinedData,
    /// Table → (PK column, PK value → index into `flat[table]`)
    index: HashMap<&'a str, (&'a str, HashMap<&'a str, usize>)>,
}

impl<'a> Linker<'a> {
    fn new(flat: &'a JoinedData, relations: &'a [Relation]) -> Self {
        let mut index = HashMap::new();
        for relation in relations {
            let pk = &relation.primary_key;
            if index.contains_key(pk.file.as_str()) {
                continue;
            }
            let Some(records) = flat.get(&pk.file) else {
                continue;
            };
            let mut positions = HashMap::new();
            for (i, record) in records.iter().enumerate() {
                if let Some(value) = record.value(&pk.field) {
                    positions.entry(value).or_insert(i);
                }
            }
            index.insert(pk.file.as_str(), (pk.field.as_str(), positions));
        }
        Self { flat, index }
    }

    fn link(&self, record: &'a EnrichedRecord, path: &mut Vec<&'a str>) -> EnrichedRecord {
        let flat: &'a JoinedData = self.flat;
        let mut linked = EnrichedRecord::from_row(&record.columns);

        for (table, children) in &record.related {
            let target = self
                .index
                .get(table.as_str())
                .filter(|_| !path.contains(&table.as_str()));

            let children = match target {
                Some((pk_field, positions)) => {
                    path.push(table.as_str());
                    let resolved = children
                        .iter()
                        .map(|child| {
                            child
                                .value(pk_field)
                                .and_then(|v| positions.get(v))
                                .map(|&i| self.link(&flat[table.as_str()][i], path))
                                .unwrap_or_else(|| child.clone())
                        })
                        .collect();
                    path.pop();
                    resolved
                }
                None => children.clone(),
            };
            linked.related.insert(table.clone(), children);
        }

        linked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogLevel;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    fn rel(pk: (&str, &str), fk: (&str, &str)) -> Relation {
        Relation::new(FieldRef::new(pk.0, pk.1), FieldRef::new(fk.0, fk.1))
    }

    fn shop() -> TableData {
        let mut tables = TableData::new();
        tables.insert(
            "customers.csv".into(),
            vec![
                row(&[("CustomerId", "1"), ("Name", "Ann")]),
                row(&[("CustomerId", "2"), ("Name", "Bob")]),
                row(&[("CustomerId", "3"), ("Name", "Cid")]),
            ],
        );
        tables.insert(
            "orders.csv".into(),
            vec![
                row(&[("OrderId", "100"), ("CustomerId", "1")]),
                row(&[("OrderId", "101"), ("CustomerId", "1")]),
                row(&[("OrderId", "200"), ("CustomerId", "2")]),
            ],
        );
        tables.insert(
            "products.csv".into(),
            vec![
                row(&[("OrderId", "100"), ("Name", "Tomatoes")]),
                row(&[("OrderId", "200"), ("Name", "Cucumbers")]),
            ],
        );
        tables
    }

    #[test]
    fn test_pass_through_copies_rows() {
        let tables = shop();
        let mut log = RunLog::new();
        let relations = vec![Relation::standalone(FieldRef::new("customers.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();

        let records = &joined["customers.csv"];
        assert_eq!(records.len(), 3);
        for (record, source) in records.iter().zip(&tables["customers.csv"]) {
            assert_eq!(&record.columns, source);
            assert!(record.related.is_empty());
        }
    }

    #[test]
    fn test_foreign_rows_attached_by_value() {
        let tables = shop();
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let customers = &joined["customers.csv"];

        let counts: Vec<_> = customers.iter().map(|c| c.related["orders.csv"].len()).collect();
        assert_eq!(counts, vec![2, 1, 0]);
        assert_eq!(customers[0].related["orders.csv"][1].value("OrderId"), Some("101"));

        // customer 3 has no orders
        let warnings: Vec<_> = log
            .entries()
            .iter()
            .filter(|e| e.level == LogLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("CustomerId = 3"));
    }

    #[test]
    fn test_duplicate_pk_rows_appear_once() {
        let mut tables = shop();
        tables["customers.csv"].push(row(&[("CustomerId", "1"), ("Name", "Ann again")]));
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let customers = &joined["customers.csv"];

        assert_eq!(customers.len(), 3);
        assert_eq!(customers[0].value("Name"), Some("Ann"));
        assert_eq!(customers[0].related["orders.csv"].len(), 2);
    }

    #[test]
    fn test_two_relations_merge_into_one_record() {
        let mut tables = shop();
        tables.insert(
            "addresses.csv".into(),
            vec![row(&[("CustomerId", "1"), ("City", "Ghent")])],
        );
        let mut log = RunLog::new();
        let relations = vec![
            rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId")),
            rel(("customers.csv", "CustomerId"), ("addresses.csv", "CustomerId")),
        ];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let customers = &joined["customers.csv"];

        assert_eq!(customers.len(), 3);
        assert_eq!(customers[0].related["orders.csv"].len(), 2);
        assert_eq!(customers[0].related["addresses.csv"][0].value("City"), Some("Ghent"));
        assert!(customers[1].related.get("addresses.csv").unwrap().is_empty());
    }

    #[test]
    fn test_chained_relations_nest_enriched_records() {
        let tables = shop();
        let mut log = RunLog::new();
        let relations = vec![
            rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId")),
            rel(("orders.csv", "OrderId"), ("products.csv", "OrderId")),
        ];

        let joined = join(&relations, &tables, &mut log).unwrap();

        let ann_orders = &joined["customers.csv"][0].related["orders.csv"];
        assert_eq!(ann_orders[0].related["products.csv"][0].value("Name"), Some("Tomatoes"));
        assert!(ann_orders[1].related["products.csv"].is_empty());

        let bob_orders = &joined["customers.csv"][1].related["orders.csv"];
        assert_eq!(bob_orders[0].related["products.csv"][0].value("Name"), Some("Cucumbers"));
    }

    #[test]
    fn test_self_relation_does_not_loop() {
        let mut tables = TableData::new();
        tables.insert(
            "staff.csv".into(),
            vec![
                row(&[("Id", "1"), ("Manager", "")]),
                row(&[("Id", "2"), ("Manager", "1")]),
            ],
        );
        let mut log = RunLog::new();
        let relations = vec![rel(("staff.csv", "Id"), ("staff.csv", "Manager"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let reports = &joined["staff.csv"][0].related["staff.csv"];
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].value("Id"), Some("2"));
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let tables = shop();
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("invoices.csv", "CustomerId"))];

        match join(&relations, &tables, &mut log) {
            Err(JoinError::MissingTable(name)) => assert_eq!(name, "invoices.csv"),
            other => panic!("expected missing table, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_tables_give_empty_bucket() {
        let mut tables = TableData::new();
        tables.insert("customers.csv".into(), Vec::new());
        tables.insert("orders.csv".into(), Vec::new());
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        assert!(joined["customers.csv"].is_empty());
    }

    #[test]
    fn test_null_pk_keeps_row_without_collection() {
        let mut tables = shop();
        let mut orphan = row(&[("Name", "Nobody")]);
        orphan.insert("CustomerId".into(), None);
        tables["customers.csv"].push(orphan);
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let last = joined["customers.csv"].last().unwrap();
        assert_eq!(last.value("Name"), Some("Nobody"));
        assert!(last.related.is_empty());
    }

    #[test]
    fn test_identical_null_pk_rows_all_kept() {
        let mut tables = shop();
        tables.insert(
            "addresses.csv".into(),
            vec![row(&[("CustomerId", "1"), ("City", "Ghent")])],
        );
        let mut orphan = row(&[("Name", "Nobody")]);
        orphan.insert("CustomerId".into(), None);
        tables["customers.csv"].push(orphan.clone());
        tables["customers.csv"].push(orphan);
        let mut log = RunLog::new();
        let relations = vec![
            rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId")),
            rel(("customers.csv", "CustomerId"), ("addresses.csv", "CustomerId")),
        ];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let customers = &joined["customers.csv"];

        assert_eq!(customers.len(), 5);
        let nobodies = customers.iter().filter(|c| c.value("Name") == Some("Nobody")).count();
        assert_eq!(nobodies, 2);
    }

    #[test]
    fn test_relation_after_pass_through_enriches_copied_rows() {
        let tables = shop();
        let mut log = RunLog::new();
        let relations = vec![
            Relation::standalone(FieldRef::new("customers.csv", "CustomerId")),
            rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId")),
        ];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let customers = &joined["customers.csv"];

        assert_eq!(customers.len(), 3);
        assert_eq!(customers[0].related["orders.csv"].len(), 2);
        assert_eq!(customers[1].related["orders.csv"][0].value("OrderId"), Some("200"));
    }

    #[test]
    fn test_many_pk_rows_keep_first_seen_order() {
        let mut tables = TableData::new();
        let customers: Vec<Row> = (0..2000)
            .map(|i| row(&[("CustomerId", (i % 1000).to_string().as_str())]))
            .collect();
        let orders: Vec<Row> = (0..1000)
            .map(|i| {
                let id = i.to_string();
                row(&[("OrderId", id.as_str()), ("CustomerId", id.as_str())])
            })
            .collect();
        tables.insert("customers.csv".into(), customers);
        tables.insert("orders.csv".into(), orders);
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let records = &joined["customers.csv"];

        assert_eq!(records.len(), 1000);
        assert_eq!(records[999].value("CustomerId"), Some("999"));
        assert!(records.iter().all(|r| r.related["orders.csv"].len() == 1));
    }

    #[test]
    fn test_rows_without_fk_value_skipped_with_warning() {
        let mut tables = shop();
        let mut loose = row(&[("OrderId", "999")]);
        loose.insert("CustomerId".into(), None);
        tables["orders.csv"].push(loose);
        let mut log = RunLog::new();
        let relations = vec![rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId"))];

        let joined = join(&relations, &tables, &mut log).unwrap();
        let total: usize = joined["customers.csv"]
            .iter()
            .map(|c| c.related["orders.csv"].len())
            .sum();
        assert_eq!(total, 3);
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message.contains("1 row(s) of orders.csv")));
    }

    #[test]
    fn test_join_is_deterministic() {
        let tables = shop();
        let relations = vec![
            rel(("customers.csv", "CustomerId"), ("orders.csv", "CustomerId")),
            rel(("orders.csv", "OrderId"), ("products.csv", "OrderId")),
        ];

        let first = join(&relations, &tables, &mut RunLog::new()).unwrap();
        let second = join(&relations, &tables, &mut RunLog::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_to_json_shape() {
        let tables = shop();
        let relations = vec![rel(("orders.csv", "OrderId"), ("products.csv", "OrderId"))];
        let joined = join(&relations, &tables, &mut RunLog::new()).unwrap();

        let json = joined["orders.csv"][0].to_json();
        assert_eq!(json["OrderId"], "100");
        assert_eq!(json["products.csv"][0]["Name"], "Tomatoes");
    }
}

//! Record-count / driver resolution.
//!
//! Top-level mapping fields are not tied to a loop variable, so the number of
//! output documents (and which entity document `i` stands for) is derived
//! from the mapping and the relations.

use indexmap::IndexSet;

use crate::error::{MaterializeError, MaterializeResult};
use crate::models::{Mapping, Relation, TableData};

/// How many documents to emit and what identifies each of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Driver {
    pub count: usize,
    /// Table whose distinct PK values drive the output, if any.
    pub table: Option<String>,
    /// PK column of `table`.
    pub field: Option<String>,
    /// Distinct non-blank PK values in first-seen order, one per document.
    pub values: Vec<String>,
}

impl Driver {
    /// PK value identifying document `index`.
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn is_keyed(&self) -> bool {
        self.field.is_some()
    }
}

/// Resolve the driver for `mapping`.
///
/// The first top-level field that is a relation's primary key drives the
/// output with one document per distinct value. Without one, documents
/// follow the rows of the first sourced field's table.
pub fn resolve_driver(
    mapping: &Mapping,
    tables: &TableData,
    relations: &[Relation],
) -> MaterializeResult<Driver> {
    let keyed = mapping.fields.iter().filter_map(|f| f.source()).find(|(file, field)| {
        relations.iter().any(|r| r.primary_key.is(file, field))
    });

    if let Some((file, field)) = keyed {
        let rows = tables
            .get(file)
            .ok_or_else(|| MaterializeError::MissingTable(file.to_string()))?;

        let values: IndexSet<&str> = rows
            .iter()
            .filter_map(|row| row.get(field).and_then(|v| v.as_deref()))
            .filter(|v| !v.trim().is_empty())
            .collect();

        return Ok(Driver {
            count: values.len(),
            table: Some(file.to_string()),
            field: Some(field.to_string()),
            values: values.into_iter().map(str::to_string).collect(),
        });
    }

    if mapping.fields.is_empty() {
        return Ok(Driver::default());
    }

    match mapping.fields.iter().find_map(|f| f.source()) {
        Some((file, _)) => {
            let rows = tables
                .get(file)
                .ok_or_else(|| MaterializeError::MissingTable(file.to_string()))?;
            Ok(Driver {
                count: rows.len(),
                ..Driver::default()
            })
        }
        // Only constant fields: a single document.
        None => Ok(Driver {
            count: 1,
            ..Driver::default()
        }),
    }
}

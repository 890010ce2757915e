//! Run inventory: the raw, per-archive listing of every available run.
//!
//! An inventory is produced by an external collaborator (one record per
//! acquisition run, usually several archives joined vertically) and is
//! consumed read-only to seed a [`DatasetTable`](crate::table::DatasetTable).
//!
//! Records are kept as loosely-typed JSON objects on purpose: columns may be
//! missing, timestamps may use mixed textual encodings, and ids may be
//! numbers. Normalization into typed rows happens in `table::schema`.

use std::path::Path;

use serde_json::{Map, Value};
use snafu::prelude::*;

/// One inventory record (column name -> cell).
pub type InventoryRecord = Map<String, Value>;

/// Errors raised while loading or shaping a run inventory.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InventoryError {
    /// The input is not a table (a JSON array of records).
    #[snafu(display("Run inventory must be an array of records, found {found}"))]
    NotATable {
        /// JSON kind that was supplied instead.
        found: &'static str,
    },

    /// One element of the input array is not a record.
    #[snafu(display("Run inventory element {index} must be a record, found {found}"))]
    NotARecord {
        /// Position of the offending element.
        index: usize,
        /// JSON kind that was supplied instead.
        found: &'static str,
    },

    /// The input text is not valid JSON.
    #[snafu(display("Run inventory is not valid JSON: {source}"))]
    Json {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Reading the inventory file failed.
    #[snafu(display("Failed to read run inventory at {path}: {source}"))]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Result alias for inventory operations.
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Ordered collection of raw run records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunInventory {
    records: Vec<InventoryRecord>,
}

impl RunInventory {
    /// Build an inventory from already-shaped records.
    pub fn from_records(records: Vec<InventoryRecord>) -> Self {
        Self { records }
    }

    /// Build an inventory from a JSON value.
    ///
    /// The value must be an array whose elements are all objects.
    pub fn from_json(value: Value) -> InventoryResult<Self> {
        let Value::Array(items) = value else {
            return NotATableSnafu {
                found: json_kind(&value),
            }
            .fail();
        };

        let records = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(record) => Ok(record),
                other => NotARecordSnafu {
                    index,
                    found: json_kind(&other),
                }
                .fail(),
            })
            .collect::<InventoryResult<Vec<_>>>()?;

        Ok(Self { records })
    }

    /// Parse an inventory from JSON text.
    pub fn from_json_str(text: &str) -> InventoryResult<Self> {
        let value: Value = serde_json::from_str(text).context(JsonSnafu)?;
        Self::from_json(value)
    }

    /// Read and parse an inventory from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> InventoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Borrow the records in order.
    pub fn records(&self) -> &[InventoryRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the inventory has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record.
    pub fn push(&mut self, record: InventoryRecord) {
        self.records.push(record);
    }

    /// Distinct station ids in first-seen order.
    ///
    /// These are the candidates for the local station.
    pub fn stations(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for station in self.records.iter().filter_map(|r| cell_as_string(r, "station")) {
            if !out.contains(&station) {
                out.push(station);
            }
        }
        out
    }

    /// Keep only records whose station is one of `station_ids`.
    pub fn restrict_to_stations<S: AsRef<str>>(&self, station_ids: &[S]) -> Self {
        let records = self
            .records
            .iter()
            .filter(|r| {
                cell_as_string(r, "station")
                    .is_some_and(|s| station_ids.iter().any(|id| id.as_ref() == s))
            })
            .cloned()
            .collect();
        Self { records }
    }

    /// Keep only records sampled at `sample_rate`.
    pub fn with_sample_rate(&self, sample_rate: f64) -> Self {
        let records = self
            .records
            .iter()
            .filter(|r| {
                r.get("sample_rate")
                    .and_then(value_as_f64)
                    .is_some_and(|sr| same_rate(sr, sample_rate))
            })
            .cloned()
            .collect();
        Self { records }
    }
}

impl From<Vec<InventoryRecord>> for RunInventory {
    fn from(records: Vec<InventoryRecord>) -> Self {
        Self::from_records(records)
    }
}

/// Two sample rates are the same if they agree to within float noise.
pub(crate) fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Coerce a scalar cell into a string id.
///
/// Numbers and booleans are rendered; null and nested values are rejected.
pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cell_as_string(record: &InventoryRecord, column: &str) -> Option<String> {
    record.get(column).and_then(value_as_string)
}

//! Column schema of the dataset table and normalization of inventory records
//! into typed rows.
//!
//! Rules applied on every assignment:
//! - `survey`, `station`, `run`, `start`, `end` must be present and filled;
//! - every other known column falls back to a typed default when absent;
//! - `start`/`end` accept mixed textual encodings and epoch seconds;
//! - `remote` and `duration` are derived and any inventory value is ignored.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::info;
use serde_json::Value;
use snafu::prelude::*;

use crate::inventory::{InventoryRecord, RunInventory, json_kind, value_as_f64, value_as_string};
use crate::table::{
    error::{
        DatasetResult, InvalidColumnTypeSnafu, InvalidTimestampSnafu, InvertedIntervalSnafu,
        MissingColumnSnafu,
    },
    row::RunRow,
};

/// Columns every record must fill.
pub const MANDATORY_COLUMNS: [&str; 5] = ["survey", "station", "run", "start", "end"];

/// Columns that are defaulted when absent, with their default.
pub const OPTIONAL_COLUMNS: [(&str, &str); 6] = [
    ("sample_rate", "0.0"),
    ("archive_path", "none"),
    ("fc", "false"),
    ("input_channels", "[]"),
    ("output_channels", "[]"),
    ("channel_scale_factors", "{}"),
];

/// Columns shown by the compact summary view.
pub const MINI_SUMMARY_COLUMNS: [&str; 6] = ["survey", "station", "run", "start", "end", "duration"];

/// Offset-bearing layouts tried after RFC 3339.
const ZONED_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Zone-less layouts, read as UTC.
const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
];

/// Parse a timestamp written in any of the accepted encodings.
///
/// Mixed layouts are tried first; if none match, a strict RFC 3339 parse is
/// the last resort.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let s = text.trim();
    parse_mixed(s).or_else(|| s.parse::<DateTime<Utc>>().ok())
}

fn parse_mixed(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    s.parse::<f64>().ok().and_then(from_epoch_secs)
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}

/// Normalize every inventory record into a typed row.
///
/// Optional columns absent from the whole inventory are reported once at
/// `info` level.
pub(crate) fn rows_from_inventory(inventory: &RunInventory) -> DatasetResult<Vec<RunRow>> {
    let present: BTreeSet<&str> = inventory
        .records()
        .iter()
        .flat_map(|r| r.keys().map(String::as_str))
        .collect();
    for (column, default) in OPTIONAL_COLUMNS {
        if !inventory.is_empty() && !present.contains(column) {
            info!("Dataset table needs column {column}, adding with default {default}");
        }
    }

    inventory
        .records()
        .iter()
        .enumerate()
        .map(|(index, record)| row_from_record(index, record))
        .collect()
}

fn row_from_record(index: usize, record: &InventoryRecord) -> DatasetResult<RunRow> {
    let survey = mandatory_string(record, index, "survey")?;
    let station = mandatory_string(record, index, "station")?;
    let run = mandatory_string(record, index, "run")?;
    let start = mandatory_timestamp(record, index, "start")?;
    let end = mandatory_timestamp(record, index, "end")?;

    ensure!(
        start <= end,
        InvertedIntervalSnafu {
            station: station.clone(),
            run: run.clone(),
            start,
            end,
        }
    );

    let mut row = RunRow::new(survey, station, run, start, end);
    row.sample_rate = optional_f64(record, index, "sample_rate")?.unwrap_or(0.0);
    row.archive_path = optional_string(record, index, "archive_path")?.map(PathBuf::from);
    row.fc = optional_bool(record, index, "fc")?.unwrap_or(false);
    row.input_channels = optional_string_list(record, index, "input_channels")?;
    row.output_channels = optional_string_list(record, index, "output_channels")?;
    row.channel_scale_factors = optional_f64_map(record, index, "channel_scale_factors")?;
    Ok(row)
}

fn filled<'a>(record: &'a InventoryRecord, column: &str) -> Option<&'a Value> {
    record.get(column).filter(|v| !v.is_null())
}

fn mandatory_string(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<String> {
    let value = filled(record, column).context(MissingColumnSnafu { column, index })?;
    value_as_string(value).context(InvalidColumnTypeSnafu {
        column,
        index,
        expected: "a string",
        found: json_kind(value),
    })
}

fn mandatory_timestamp(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<DateTime<Utc>> {
    let value = filled(record, column).context(MissingColumnSnafu { column, index })?;
    match value {
        Value::String(s) => parse_timestamp(s).context(InvalidTimestampSnafu {
            column,
            index,
            value: s.clone(),
        }),
        Value::Number(n) => n
            .as_f64()
            .and_then(from_epoch_secs)
            .context(InvalidTimestampSnafu {
                column,
                index,
                value: n.to_string(),
            }),
        other => InvalidColumnTypeSnafu {
            column,
            index,
            expected: "a timestamp",
            found: json_kind(other),
        }
        .fail(),
    }
}

fn optional_f64(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<Option<f64>> {
    filled(record, column)
        .map(|value| {
            value_as_f64(value).context(InvalidColumnTypeSnafu {
                column,
                index,
                expected: "a number",
                found: json_kind(value),
            })
        })
        .transpose()
}

fn optional_string(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<Option<String>> {
    filled(record, column)
        .map(|value| match value {
            Value::String(s) => Ok(s.clone()),
            other => InvalidColumnTypeSnafu {
                column,
                index,
                expected: "a string",
                found: json_kind(other),
            }
            .fail(),
        })
        .transpose()
}

fn optional_bool(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<Option<bool>> {
    filled(record, column)
        .map(|value| match value {
            Value::Bool(b) => Ok(*b),
            other => InvalidColumnTypeSnafu {
                column,
                index,
                expected: "a boolean",
                found: json_kind(other),
            }
            .fail(),
        })
        .transpose()
}

fn optional_string_list(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<Vec<String>> {
    let Some(value) = filled(record, column) else {
        return Ok(Vec::new());
    };
    let invalid = || {
        InvalidColumnTypeSnafu {
            column,
            index,
            expected: "a list of strings",
            found: json_kind(value),
        }
        .build()
    };
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        Value::String(s) => Ok(vec![s.clone()]),
        _ => Err(invalid()),
    }
}

fn optional_f64_map(
    record: &InventoryRecord,
    index: usize,
    column: &'static str,
) -> DatasetResult<BTreeMap<String, f64>> {
    let Some(value) = filled(record, column) else {
        return Ok(BTreeMap::new());
    };
    let invalid = || {
        InvalidColumnTypeSnafu {
            column,
            index,
            expected: "a map of channel to number",
            found: json_kind(value),
        }
        .build()
    };
    let Value::Object(map) = value else {
        return Err(invalid());
    };
    map.iter()
        .map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)).ok_or_else(invalid))
        .collect()
}

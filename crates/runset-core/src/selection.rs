//! Selection operations.
//!
//! Each operation is a pure function from a table to a new table, plus a
//! mutating method on [`DatasetTable`] that swaps the result in only when the
//! operation succeeds. When a remote station is configured, the result is
//! passed through the simultaneity resolver again, so local and remote rows
//! stay paired after every edit.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    str::FromStr,
};

use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    interval::Interval,
    simultaneity,
    table::{
        DatasetResult, DatasetTable, RowId,
        error::{InvertedIntervalSnafu, UnsupportedDurationUnitSnafu},
    },
};

/// Errors produced when parsing a duration unit (e.g. `"s"`, `"minutes"`).
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseDurationUnitError {
    /// The unit string was empty or only whitespace.
    #[snafu(display("duration unit is empty"))]
    Empty,

    /// The unit is not one of the recognized spellings.
    #[snafu(display("unknown duration unit '{unit}' (expected s|m|h|d)"))]
    UnknownUnit {
        /// The unrecognized unit.
        unit: String,
    },
}

/// Unit a minimum run duration is expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    /// Seconds; the only unit durations are compared in.
    #[default]
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
            DurationUnit::Days => "days",
        };
        f.write_str(s)
    }
}

impl FromStr for DurationUnit {
    type Err = ParseDurationUnitError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let unit = input.trim();
        if unit.is_empty() {
            return Err(ParseDurationUnitError::Empty);
        }

        match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(DurationUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(DurationUnit::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Ok(DurationUnit::Hours),
            "d" | "day" | "days" => Ok(DurationUnit::Days),
            _ => Err(ParseDurationUnitError::UnknownUnit {
                unit: unit.to_string(),
            }),
        }
    }
}

/// Whether the runs named in a selection are kept or dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Keep only the named runs of each named station.
    Keep,
    /// Drop the named runs of each named station.
    Drop,
}

/// Station id → run ids to keep or drop.
///
/// Stations that do not appear are never touched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationRunSelection(BTreeMap<String, BTreeSet<String>>);

impl StationRunSelection {
    /// Empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection naming a single run of a single station.
    pub fn single(station: impl Into<String>, run: impl Into<String>) -> Self {
        let mut selection = Self::new();
        selection.insert(station, run);
        selection
    }

    /// Add `runs` for `station`.
    pub fn with_runs<I, S>(mut self, station: impl Into<String>, runs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0
            .entry(station.into())
            .or_default()
            .extend(runs.into_iter().map(Into::into));
        self
    }

    /// Add one run for `station`.
    pub fn insert(&mut self, station: impl Into<String>, run: impl Into<String>) {
        self.0.entry(station.into()).or_default().insert(run.into());
    }

    /// Named stations and their runs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.0.iter().map(|(s, runs)| (s.as_str(), runs))
    }

    /// Returns `true` if no station is named.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>, R: Into<String>> FromIterator<(S, R)> for StationRunSelection {
    fn from_iter<T: IntoIterator<Item = (S, R)>>(iter: T) -> Self {
        let mut selection = Self::new();
        for (station, run) in iter {
            selection.insert(station, run);
        }
        selection
    }
}

/// Requested start/end for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTimes {
    /// New start.
    pub start: DateTime<Utc>,
    /// New end.
    pub end: DateTime<Utc>,
}

/// Run id → requested start/end.
pub type RunTimeOverrides = BTreeMap<String, RunTimes>;

fn reresolve(table: DatasetTable) -> DatasetResult<DatasetTable> {
    if table.remote_station_id().is_some() {
        simultaneity::resolve(&table)
    } else {
        Ok(table)
    }
}

/// Drop rows shorter than `min_duration`.
///
/// Only [`DurationUnit::Seconds`] is supported. With a remote station the
/// table is resolved first, so the threshold applies to simultaneous
/// fragments.
pub fn drop_runs_shorter_than(
    table: &DatasetTable,
    min_duration: f64,
    unit: DurationUnit,
) -> DatasetResult<DatasetTable> {
    if unit != DurationUnit::Seconds {
        let err = UnsupportedDurationUnitSnafu { unit }.build();
        error!("{err}");
        return Err(err);
    }

    let base = reresolve(table.clone())?;
    let kept: Vec<_> = base
        .iter()
        .filter(|r| r.duration >= min_duration)
        .cloned()
        .collect();
    debug!(
        "Dropped {} rows shorter than {min_duration}s",
        base.len() - kept.len()
    );
    base.derive(kept)
}

/// Keep or drop the named runs of each named station.
///
/// Removals are computed per station and their union is dropped; stations
/// absent from `selection` are untouched.
pub fn select_station_runs(
    table: &DatasetTable,
    selection: &StationRunSelection,
    mode: SelectionMode,
) -> DatasetResult<DatasetTable> {
    let mut removals: HashSet<RowId> = HashSet::new();
    for (station, runs) in selection.iter() {
        for row in table.station_rows(station) {
            let named = runs.contains(&row.run);
            let remove = match mode {
                SelectionMode::Keep => !named,
                SelectionMode::Drop => named,
            };
            if remove {
                removals.insert(row.row_id);
            }
        }
    }

    let kept: Vec<_> = table
        .iter()
        .filter(|r| !removals.contains(&r.row_id))
        .cloned()
        .collect();
    debug!("Selection removed {} rows ({mode:?})", removals.len());
    reresolve(table.derive(kept)?)
}

/// Clamp runs to the requested start/end.
///
/// A row is clamped only when its interval contains the requested one; an
/// override that would widen a row is ignored for that row.
pub fn set_run_times(
    table: &DatasetTable,
    overrides: &RunTimeOverrides,
) -> DatasetResult<DatasetTable> {
    let mut rows = table.rows().to_vec();
    for row in &mut rows {
        let Some(times) = overrides.get(&row.run) else {
            continue;
        };
        let requested = Interval::new(times.start, times.end).context(InvertedIntervalSnafu {
            station: row.station.clone(),
            run: row.run.clone(),
            start: times.start,
            end: times.end,
        })?;

        if row.interval().contains(&requested) {
            row.clip_to(requested.start, requested.end);
        } else {
            debug!(
                "Run {} of station {} spans {}; not widening to {requested}",
                row.run,
                row.station,
                row.interval()
            );
        }
    }
    reresolve(table.derive(rows)?)
}

impl DatasetTable {
    /// In-place [`drop_runs_shorter_than`].
    pub fn drop_runs_shorter_than(
        &mut self,
        min_duration: f64,
        unit: DurationUnit,
    ) -> DatasetResult<()> {
        *self = drop_runs_shorter_than(self, min_duration, unit)?;
        Ok(())
    }

    /// In-place [`select_station_runs`].
    pub fn select_station_runs(
        &mut self,
        selection: &StationRunSelection,
        mode: SelectionMode,
    ) -> DatasetResult<()> {
        *self = select_station_runs(self, selection, mode)?;
        Ok(())
    }

    /// In-place [`set_run_times`].
    pub fn set_run_times(&mut self, overrides: &RunTimeOverrides) -> DatasetResult<()> {
        *self = set_run_times(self, overrides)?;
        Ok(())
    }
}

//! Typed station-run rows.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::Interval;

/// Identifier for a row, stable across clones of the table.
///
/// Fragments emitted by the simultaneity resolver get fresh ids, so a
/// processing context keyed by `RowId` never confuses a fragment with the
/// run it was cut from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which of the two configured stations an id refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StationRole {
    /// The station whose response is estimated.
    Local,
    /// The remote reference station.
    Remote,
}

impl fmt::Display for StationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationRole::Local => f.write_str("local"),
            StationRole::Remote => f.write_str("remote"),
        }
    }
}

/// One station-run record, or an overlap fragment of one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    /// Row identifier assigned by the table.
    #[serde(default)]
    pub row_id: RowId,
    /// Survey id.
    pub survey: String,
    /// Station id.
    pub station: String,
    /// Run id; not unique after overlap splitting.
    pub run: String,
    /// First instant of the row.
    pub start: DateTime<Utc>,
    /// Last instant of the row.
    pub end: DateTime<Utc>,
    /// Samples per second.
    #[serde(default)]
    pub sample_rate: f64,
    /// Archive holding the station's runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    /// `true` iff the station is the table's remote station.
    #[serde(default)]
    pub remote: bool,
    /// `true` if the run is already backed by a precomputed spectral product.
    #[serde(default)]
    pub fc: bool,
    /// Input (source) channels.
    #[serde(default)]
    pub input_channels: Vec<String>,
    /// Output channels.
    #[serde(default)]
    pub output_channels: Vec<String>,
    /// Per-channel scale factors.
    #[serde(default)]
    pub channel_scale_factors: BTreeMap<String, f64>,
    /// `end - start` in seconds.
    #[serde(default)]
    pub duration: f64,
}

impl RunRow {
    /// Row with the mandatory fields set and every optional field defaulted.
    pub fn new(
        survey: impl Into<String>,
        station: impl Into<String>,
        run: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        let mut row = Self {
            row_id: RowId::default(),
            survey: survey.into(),
            station: station.into(),
            run: run.into(),
            start,
            end,
            sample_rate: 0.0,
            archive_path: None,
            remote: false,
            fc: false,
            input_channels: Vec::new(),
            output_channels: Vec::new(),
            channel_scale_factors: BTreeMap::new(),
            duration: 0.0,
        };
        row.refresh_duration();
        row
    }

    /// Set the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the archive path.
    pub fn with_archive_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive_path = Some(path.into());
        self
    }

    /// Mark the row as backed by precomputed spectral products.
    pub fn with_fc(mut self, fc: bool) -> Self {
        self.fc = fc;
        self
    }

    /// The row's time interval.
    pub fn interval(&self) -> Interval<DateTime<Utc>> {
        Interval {
            start: self.start,
            end: self.end,
        }
    }

    /// Replace start/end and recompute the duration.
    pub fn clip_to(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) {
        self.start = start;
        self.end = end;
        self.refresh_duration();
    }

    /// Recompute `duration` from `start`/`end`.
    pub fn refresh_duration(&mut self) {
        self.duration = seconds_between(self.start, self.end);
    }
}

/// `end - start` in (fractional) seconds.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1e9,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_follows_clipping() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut row = RunRow::new("s", "mt01", "a", t0, t0 + chrono::Duration::hours(1));
        assert_eq!(row.duration, 3600.0);

        row.clip_to(t0, t0 + chrono::Duration::milliseconds(1500));
        assert_eq!(row.duration, 1.5);
    }

    #[test]
    fn seconds_between_handles_spans_beyond_nanosecond_range() {
        let t0 = Utc.with_ymd_and_hms(1800, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
        let secs = seconds_between(t0, t1);
        assert!(secs > 1.2e10, "{secs}");
    }
}

//! Dataset table layer.
//!
//! [`DatasetTable`] owns the ordered rows selected for processing together
//! with the local (and optional remote) station id. It keeps the derived
//! columns (`duration`, `remote`) consistent and enforces that configured
//! station ids are actually present in the rows.
//!
//! Every mutation builds a complete new row vector and swaps it in only once
//! it has been validated, so a failing operation leaves the table untouched.

pub mod error;
pub mod row;
pub mod schema;

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

use log::{error, info};
use snafu::prelude::*;

use crate::{
    config::DatasetConfig,
    inventory::{RunInventory, same_rate},
    simultaneity,
};

pub use error::{DatasetError, DatasetResult};
pub use row::{RowId, RunRow, StationRole};

use error::{
    AmbiguousArchivePathSnafu, ArchivePathMissingSnafu, ConfigSnafu, EmptySelectionSnafu,
    EmptyTableSnafu, InvertedIntervalSnafu, LocalStationUnsetSnafu, MixedSampleRatesSnafu,
    RemoteIsLocalSnafu, RemoteStationUnsetSnafu, StationNotFoundSnafu,
};
use schema::{MINI_SUMMARY_COLUMNS, rows_from_inventory};

/// Survey id some archives use when no survey was recorded.
const UNNAMED_SURVEY: &str = "none";
/// Survey key used in place of [`UNNAMED_SURVEY`].
pub const DEFAULT_SURVEY_ID: &str = "0";

/// The working table of station-runs selected for processing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetTable {
    rows: Vec<RunRow>,
    local_station_id: Option<String>,
    remote_station_id: Option<String>,
    next_row_id: u64,
}

impl DatasetTable {
    /// Empty table with no station ids.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with station ids set.
    ///
    /// Fails if `remote` names the local station.
    pub fn with_stations(
        local: impl Into<String>,
        remote: Option<String>,
    ) -> DatasetResult<Self> {
        Self {
            local_station_id: Some(local.into()),
            remote_station_id: remote,
            ..Self::default()
        }
        .validated()
    }

    /// Build a table from typed rows.
    ///
    /// The rows are taken as they are; the simultaneity resolver is not run.
    pub fn from_rows(
        rows: Vec<RunRow>,
        local: impl Into<String>,
        remote: Option<String>,
    ) -> DatasetResult<Self> {
        let mut table = Self::with_stations(local, remote)?;
        table.set_rows(rows)?;
        Ok(table)
    }

    /// Build a table from a run inventory.
    ///
    /// Records are restricted to the configured stations (and sample rate,
    /// if set), normalized, given configured archive paths where the
    /// inventory has none, and, when a remote station is configured,
    /// restricted to simultaneous intervals.
    pub fn from_run_inventory(
        inventory: &RunInventory,
        config: &DatasetConfig,
    ) -> DatasetResult<Self> {
        config.validate().context(ConfigSnafu)?;

        let station_ids = config.station_ids();
        let mut selected = inventory.restrict_to_stations(&station_ids);
        if let Some(sample_rate) = config.sample_rate {
            selected = selected.with_sample_rate(sample_rate);
        }

        if selected.is_empty() {
            let err = EmptySelectionSnafu {
                station_ids: station_ids.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            }
            .build();
            error!("{err}");
            return Err(err);
        }

        let mut rows = rows_from_inventory(&selected)?;
        for row in rows.iter_mut().filter(|r| r.archive_path.is_none()) {
            let fallback = if row.station == config.local_station_id {
                config.local_archive_path.as_ref()
            } else {
                config.remote_archive_path.as_ref()
            };
            row.archive_path = fallback.cloned();
        }

        let table = Self::from_rows(
            rows,
            config.local_station_id.clone(),
            config.remote_station_id.clone(),
        )?;
        let table = if table.is_single_station() {
            table
        } else {
            simultaneity::resolve(&table)?
        };

        info!(
            "Dataset table {} built with {} rows",
            table.processing_id().unwrap_or_else(|_| table.describe_stations()),
            table.len()
        );
        Ok(table)
    }

    /// Replace the rows from a run inventory, normalizing every record.
    pub fn set_table(&mut self, inventory: &RunInventory) -> DatasetResult<()> {
        let rows = rows_from_inventory(inventory)?;
        self.set_rows(rows)
    }

    /// Replace the rows, assigning fresh row ids and refreshing derived
    /// columns.
    pub fn set_rows(&mut self, rows: Vec<RunRow>) -> DatasetResult<()> {
        let replacement = self.derive_fresh(rows)?;
        *self = replacement;
        Ok(())
    }

    /// A copy of this table holding `rows` (row ids kept as given).
    pub(crate) fn derive(&self, rows: Vec<RunRow>) -> DatasetResult<Self> {
        let next_row_id = rows
            .iter()
            .map(|r| r.row_id.0 + 1)
            .max()
            .unwrap_or(0)
            .max(self.next_row_id);
        let table = Self {
            rows,
            local_station_id: self.local_station_id.clone(),
            remote_station_id: self.remote_station_id.clone(),
            next_row_id,
        };
        table.validated()
    }

    /// A copy of this table holding `rows` with newly allocated row ids.
    pub(crate) fn derive_fresh(&self, mut rows: Vec<RunRow>) -> DatasetResult<Self> {
        let mut next = self.next_row_id;
        for row in &mut rows {
            row.row_id = RowId(next);
            next += 1;
        }
        let table = Self {
            rows,
            local_station_id: self.local_station_id.clone(),
            remote_station_id: self.remote_station_id.clone(),
            next_row_id: next,
        };
        table.validated()
    }

    fn validated(mut self) -> DatasetResult<Self> {
        for row in &self.rows {
            ensure!(
                row.start <= row.end,
                InvertedIntervalSnafu {
                    station: row.station.clone(),
                    run: row.run.clone(),
                    start: row.start,
                    end: row.end,
                }
            );
        }
        if let (Some(local), Some(remote)) = (&self.local_station_id, &self.remote_station_id) {
            ensure!(local != remote, RemoteIsLocalSnafu { station_id: local });
        }
        self.refresh_derived();
        if let Some(local) = &self.local_station_id {
            self.ensure_station_present(StationRole::Local, local)?;
        }
        if let Some(remote) = &self.remote_station_id {
            self.ensure_station_present(StationRole::Remote, remote)?;
        }
        Ok(self)
    }

    fn refresh_derived(&mut self) {
        let remote = self.remote_station_id.clone();
        for row in &mut self.rows {
            row.refresh_duration();
            row.remote = remote.as_deref() == Some(row.station.as_str());
        }
    }

    fn ensure_station_present(&self, role: StationRole, station_id: &str) -> DatasetResult<()> {
        ensure!(
            self.rows.is_empty() || self.rows.iter().any(|r| r.station == station_id),
            StationNotFoundSnafu { role, station_id }
        );
        Ok(())
    }

    /// Set the local station id.
    ///
    /// Fails, leaving the table unchanged, if `id` is the remote station or
    /// if the table has rows and none belong to `id`.
    pub fn set_local_station_id(&mut self, id: impl Into<String>) -> DatasetResult<()> {
        let id = id.into();
        ensure!(
            self.remote_station_id.as_deref() != Some(id.as_str()),
            RemoteIsLocalSnafu { station_id: id }
        );
        self.ensure_station_present(StationRole::Local, &id)?;
        self.local_station_id = Some(id);
        Ok(())
    }

    /// Set or clear the remote station id.
    ///
    /// `None` switches the table to single-station mode. Fails, leaving the
    /// table unchanged, if `id` is the local station or if the table has rows
    /// and none belong to `id`.
    pub fn set_remote_station_id<S: Into<String>>(&mut self, id: Option<S>) -> DatasetResult<()> {
        let id = id.map(Into::into);
        if let Some(id) = &id {
            ensure!(
                self.local_station_id.as_ref() != Some(id),
                RemoteIsLocalSnafu { station_id: id }
            );
            self.ensure_station_present(StationRole::Remote, id)?;
        }
        self.remote_station_id = id;
        self.refresh_derived();
        Ok(())
    }

    /// Switch to single-station mode.
    pub fn clear_remote_station_id(&mut self) {
        self.remote_station_id = None;
        self.refresh_derived();
    }

    /// Local station id, if set.
    pub fn local_station_id(&self) -> Option<&str> {
        self.local_station_id.as_deref()
    }

    /// Remote station id, if set.
    pub fn remote_station_id(&self) -> Option<&str> {
        self.remote_station_id.as_deref()
    }

    /// Local station id, or an error if unset.
    pub(crate) fn require_local(&self) -> DatasetResult<&str> {
        self.local_station_id
            .as_deref()
            .context(LocalStationUnsetSnafu)
    }

    /// Local and remote station ids, or an error if either is unset.
    pub(crate) fn require_pair(&self) -> DatasetResult<(&str, &str)> {
        let local = self.require_local()?;
        let remote = self
            .remote_station_id
            .as_deref()
            .context(RemoteStationUnsetSnafu { local })?;
        Ok((local, remote))
    }

    /// `true` iff a local station is set and no remote station is.
    pub fn is_single_station(&self) -> bool {
        self.local_station_id.is_some() && self.remote_station_id.is_none()
    }

    /// All rows in table order.
    pub fn rows(&self) -> &[RunRow] {
        &self.rows
    }

    /// Iterate rows in table order.
    pub fn iter(&self) -> std::slice::Iter<'_, RunRow> {
        self.rows.iter()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up a row by id.
    pub fn row(&self, id: RowId) -> Option<&RunRow> {
        self.rows.iter().find(|r| r.row_id == id)
    }

    /// Rows of `station` in table order.
    pub fn station_rows<'a>(&'a self, station: &'a str) -> impl Iterator<Item = &'a RunRow> + 'a {
        self.rows.iter().filter(move |r| r.station == station)
    }

    /// Rows of the local station.
    pub fn local_rows(&self) -> Vec<&RunRow> {
        match self.local_station_id.as_deref() {
            Some(local) => self.station_rows(local).collect(),
            None => Vec::new(),
        }
    }

    /// Rows of the remote station (empty in single-station mode).
    pub fn remote_rows(&self) -> Vec<&RunRow> {
        match self.remote_station_id.as_deref() {
            Some(remote) => self.station_rows(remote).collect(),
            None => Vec::new(),
        }
    }

    /// Distinct station ids in first-seen order.
    pub fn stations(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for row in &self.rows {
            if !out.contains(&row.station.as_str()) {
                out.push(&row.station);
            }
        }
        out
    }

    /// Archive path shared by every local row.
    pub fn local_archive_path(&self) -> DatasetResult<PathBuf> {
        let local = self.require_local()?;
        self.archive_path_for(StationRole::Local, local)
    }

    /// Archive path shared by every remote row.
    pub fn remote_archive_path(&self) -> DatasetResult<PathBuf> {
        let (_, remote) = self.require_pair()?;
        self.archive_path_for(StationRole::Remote, remote)
    }

    fn archive_path_for(&self, role: StationRole, station_id: &str) -> DatasetResult<PathBuf> {
        let paths: BTreeSet<&Path> = self
            .station_rows(station_id)
            .filter_map(|r| r.archive_path.as_deref())
            .collect();

        let mut iter = paths.iter();
        match (iter.next(), iter.next()) {
            (Some(path), None) => Ok(path.to_path_buf()),
            (None, _) => ArchivePathMissingSnafu { role, station_id }.fail(),
            (Some(_), Some(_)) => AmbiguousArchivePathSnafu {
                role,
                station_id,
                paths: paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>(),
            }
            .fail(),
        }
    }

    /// Number of distinct sample rates across all rows.
    pub fn num_sample_rates(&self) -> usize {
        self.distinct_sample_rates().len()
    }

    fn distinct_sample_rates(&self) -> Vec<f64> {
        let mut rates: Vec<f64> = Vec::new();
        for row in &self.rows {
            if !rates.iter().any(|r| same_rate(*r, row.sample_rate)) {
                rates.push(row.sample_rate);
            }
        }
        rates
    }

    /// The single sample rate of the table.
    ///
    /// Mixed-rate tables are rejected rather than resolved to one of their
    /// rates.
    pub fn sample_rate(&self) -> DatasetResult<f64> {
        let rates = self.distinct_sample_rates();
        match rates.as_slice() {
            [] => EmptyTableSnafu.fail(),
            [rate] => Ok(*rate),
            _ => {
                let err = MixedSampleRatesSnafu { rates }.build();
                error!("{err}");
                Err(err)
            }
        }
    }

    /// Generic label for this local/remote/sample-rate combination.
    ///
    /// `"{local}-rr_{remote}_sr{rate}"`, or `"{local}_sr{rate}"` without a
    /// remote.
    pub fn processing_id(&self) -> DatasetResult<String> {
        let local = self.require_local()?;
        let rate = self.sample_rate()? as i64;
        Ok(match self.remote_station_id.as_deref() {
            Some(remote) => format!("{local}-rr_{remote}_sr{rate}"),
            None => format!("{local}_sr{rate}"),
        })
    }

    fn describe_stations(&self) -> String {
        match (self.local_station_id(), self.remote_station_id()) {
            (Some(l), Some(r)) => format!("{l}-rr_{r}"),
            (Some(l), None) => l.to_string(),
            _ => "<unset>".to_string(),
        }
    }

    /// Survey id of the first local station row.
    ///
    /// Archives that never named their survey report `"none"`; that maps to
    /// [`DEFAULT_SURVEY_ID`].
    pub fn local_survey_id(&self) -> DatasetResult<String> {
        self.require_local()?;
        let row = self.first_local_row().context(EmptyTableSnafu)?;
        Ok(if row.survey == UNNAMED_SURVEY {
            DEFAULT_SURVEY_ID.to_string()
        } else {
            row.survey.clone()
        })
    }

    fn first_local_row(&self) -> Option<&RunRow> {
        let local = self.local_station_id.as_deref()?;
        self.rows.iter().find(|r| r.station == local)
    }

    /// Input channels of the first local row.
    pub fn input_channels(&self) -> Option<&[String]> {
        self.first_local_row().map(|r| r.input_channels.as_slice())
    }

    /// Output channels of the first local row.
    pub fn output_channels(&self) -> Option<&[String]> {
        self.first_local_row().map(|r| r.output_channels.as_slice())
    }

    /// Compact text rendering of survey/station/run/start/end/duration.
    pub fn mini_summary(&self) -> String {
        let cells: Vec<[String; 6]> = self
            .rows
            .iter()
            .map(|r| {
                [
                    r.survey.clone(),
                    r.station.clone(),
                    r.run.clone(),
                    r.start.to_rfc3339(),
                    r.end.to_rfc3339(),
                    format!("{:.1}", r.duration),
                ]
            })
            .collect();

        let mut widths = MINI_SUMMARY_COLUMNS.map(str::len);
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.len());
            }
        }

        let mut out = String::new();
        let render = |out: &mut String, cols: &[&str]| {
            let line: Vec<String> = cols
                .iter()
                .zip(widths)
                .map(|(c, w)| format!("{c:<w$}"))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        };
        render(&mut out, &MINI_SUMMARY_COLUMNS);
        for row in &cells {
            let cols: Vec<&str> = row.iter().map(String::as_str).collect();
            render(&mut out, &cols);
        }
        out
    }
}

impl fmt::Display for DatasetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mini_summary())
    }
}

impl<'a> IntoIterator for &'a DatasetTable {
    type Item = &'a RunRow;
    type IntoIter = std::slice::Iter<'a, RunRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

//! Error types and SNAFU context selectors for dataset operations.
//!
//! `DatasetError` is the single error surfaced by the table, the resolver,
//! the selection operations, and the materializer. Variants fall into four
//! classes, none of which is retried internally:
//!
//! - schema: the input has the wrong shape or a mandatory column is missing;
//! - lookup: a referenced station or archive is absent;
//! - domain: the operation would produce an empty or ill-defined dataset;
//! - unsupported: a parameter the crate deliberately does not handle.
//!
//! Messages name the offending station/run/survey/column so a mistake can be
//! located without inspecting the table.

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    archive::ArchiveError, config::ConfigError, inventory::InventoryError,
    selection::DurationUnit, table::row::StationRole,
};

/// Errors from dataset table operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatasetError {
    /// A mandatory column is absent from an inventory record.
    #[snafu(display("{column} must be a filled column (missing in record {index})"))]
    MissingColumn {
        /// Column name.
        column: &'static str,
        /// Record position in the inventory.
        index: usize,
    },

    /// A column holds a value of the wrong type.
    #[snafu(display("Column {column} in record {index} must be {expected}, found {found}"))]
    InvalidColumnType {
        /// Column name.
        column: &'static str,
        /// Record position in the inventory.
        index: usize,
        /// Expected type description.
        expected: &'static str,
        /// JSON kind found.
        found: &'static str,
    },

    /// A start/end cell could not be parsed as a timestamp.
    #[snafu(display("Cannot parse {column} '{value}' in record {index} as a timestamp"))]
    InvalidTimestamp {
        /// `start` or `end`.
        column: &'static str,
        /// Record position in the inventory.
        index: usize,
        /// The unparseable text.
        value: String,
    },

    /// A row ends before it starts.
    #[snafu(display("Run {run} of station {station} ends ({end}) before it starts ({start})"))]
    InvertedInterval {
        /// Station id.
        station: String,
        /// Run id.
        run: String,
        /// Row start.
        start: DateTime<Utc>,
        /// Row end.
        end: DateTime<Utc>,
    },

    /// A station id is not present in the table.
    #[snafu(display("Could not find {role} station {station_id} in the dataset table"))]
    StationNotFound {
        /// Which id was being set or used.
        role: StationRole,
        /// The missing station id.
        station_id: String,
    },

    /// The local station id has not been set.
    #[snafu(display("local_station_id is not set"))]
    LocalStationUnset,

    /// The remote reference station is the local station itself.
    #[snafu(display("Remote station {station_id} is also the local station"))]
    RemoteIsLocal {
        /// The station id used for both roles.
        station_id: String,
    },

    /// An operation needs a remote station but none is configured.
    #[snafu(display("Station {local} has no remote reference station configured"))]
    RemoteStationUnset {
        /// Local station id.
        local: String,
    },

    /// No row of the station carries an archive path.
    #[snafu(display("No archive path recorded for {role} station {station_id}"))]
    ArchivePathMissing {
        /// Local or remote.
        role: StationRole,
        /// Station id.
        station_id: String,
    },

    /// Rows of one station point at different archives.
    #[snafu(display(
        "{role} station {station_id} rows reference more than one archive: {paths:?}"
    ))]
    AmbiguousArchivePath {
        /// Local or remote.
        role: StationRole,
        /// Station id.
        station_id: String,
        /// Distinct paths found.
        paths: Vec<String>,
    },

    /// Restricting the inventory to the requested stations left nothing.
    #[snafu(display("Restricting run inventory to {station_ids:?} yields an empty set"))]
    EmptySelection {
        /// Requested station ids.
        station_ids: Vec<String>,
    },

    /// Local and remote runs never recorded at the same time.
    #[snafu(display(
        "Local: {local} and remote: {remote} do not overlap, remote reference processing is not a valid option"
    ))]
    NoSimultaneousData {
        /// Local station id.
        local: String,
        /// Remote station id.
        remote: String,
    },

    /// More than one sample rate is present.
    #[snafu(display("Processing data from mixed sample rates is not supported (found {rates:?})"))]
    MixedSampleRates {
        /// Distinct rates found, in first-seen order.
        rates: Vec<f64>,
    },

    /// The operation needs at least one row.
    #[snafu(display("Dataset table has no rows"))]
    EmptyTable,

    /// Rows belong to more than one survey.
    #[snafu(display(
        "Only one survey per dataset is supported: found survey {found} after survey {existing}"
    ))]
    MultipleSurveys {
        /// Survey already aggregated.
        existing: String,
        /// The second survey id encountered.
        found: String,
    },

    /// Durations can only be compared in seconds.
    #[snafu(display("Expected duration units in seconds, got {unit}"))]
    UnsupportedDurationUnit {
        /// The rejected unit.
        unit: DurationUnit,
    },

    /// No open archive handle serves the row's station.
    #[snafu(display("No open archive handle for station {station_id}"))]
    HandleMissing {
        /// Station id.
        station_id: String,
    },

    /// An archive operation failed for a specific run.
    #[snafu(display("Archive error for run {run} of station {station}: {source}"))]
    Archive {
        /// Station id.
        station: String,
        /// Run id.
        run: String,
        /// Underlying archive error.
        #[snafu(source(from(ArchiveError, Box::new)))]
        source: Box<ArchiveError>,
    },

    /// Opening or closing an archive failed.
    #[snafu(display("Archive error at {path}: {source}"))]
    ArchiveHandle {
        /// Archive path.
        path: String,
        /// Underlying archive error.
        #[snafu(source(from(ArchiveError, Box::new)))]
        source: Box<ArchiveError>,
    },

    /// The dataset configuration is invalid.
    #[snafu(display("Dataset configuration error: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },

    /// The run inventory could not be loaded.
    #[snafu(display("Run inventory error: {source}"))]
    Inventory {
        /// Underlying inventory error.
        source: InventoryError,
    },
}

/// Result alias for dataset operations.
#[allow(clippy::result_large_err)]
pub type DatasetResult<T> = Result<T, DatasetError>;

//! Core engine for curating station-run datasets.
//!
//! This crate decides which recording runs of a local station, optionally
//! paired with a remote reference station, go into a single processing
//! dataset:
//!
//! - Closed-interval overlap tests and intersections (`interval` module).
//! - Ingest of a run inventory produced by an archive scan (`inventory`).
//! - The dataset table with its derived `duration` / `remote` columns and
//!   station bookkeeping (`table`).
//! - Restriction of a two-station table to the intervals both stations
//!   recorded simultaneously (`simultaneity`).
//! - Iterative run selection: minimum duration, keep/drop by run id, and
//!   start/end clamping (`selection`).
//! - Processing-time materialization of sample windows and survey metadata
//!   through an abstract archive capability (`archive`, `materialize`,
//!   `metadata`).
//!
//! Configuration is a plain serde struct (`config`). The crate logs through
//! the `log` facade and never installs a logger itself.
#![deny(missing_docs)]
pub mod archive;
pub mod config;
pub mod interval;
pub mod inventory;
pub mod materialize;
pub mod metadata;
pub mod selection;
pub mod simultaneity;
pub mod table;

#[cfg(test)]
pub(crate) mod test_util;

pub use archive::{ArchiveError, ArchiveHandle, ArchiveOpener, OpenMode, RunReference};
pub use config::{ConfigError, DatasetConfig};
pub use inventory::{InventoryError, RunInventory};
pub use materialize::{ProcessingContext, ProcessingSession, RowContext};
pub use metadata::{RunLineage, SurveyAggregate};
pub use selection::{
    DurationUnit, ParseDurationUnitError, RunTimeOverrides, RunTimes, SelectionMode,
    StationRunSelection,
};
pub use table::{DatasetError, DatasetResult, DatasetTable, RowId, RunRow, StationRole};

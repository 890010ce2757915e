//! # runset
//!
//! Curate the recording runs of a local station, optionally paired with a
//! remote reference station, into a single processing dataset.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,ignore
//! use runset::prelude::*;
//!
//! let config = DatasetConfig::from_path("dataset.json")?;
//! let inventory = RunInventory::from_path("inventory.json")?;
//! let mut table = DatasetTable::from_run_inventory(&inventory, &config)?;
//! table.drop_runs_shorter_than(600.0, DurationUnit::Seconds)?;
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Archive capability namespace (wrapper-only).
pub mod archive {
    pub use runset_core::archive::memory::{MemoryArchive, MemoryArchiveOpener, MemoryStore};
    pub use runset_core::archive::{
        ArchiveError, ArchiveHandle, ArchiveOpener, OpenMode, RunReference,
    };
}

/// Closed-interval helpers (wrapper-only).
pub mod interval {
    pub use runset_core::interval::{Interval, intersect, overlaps};
}

/// Selection operations as pure functions (wrapper-only).
pub mod selection {
    pub use runset_core::selection::{drop_runs_shorter_than, select_station_runs, set_run_times};
}

pub use runset_core::config::{ConfigError, DatasetConfig};
pub use runset_core::inventory::{InventoryError, RunInventory};
pub use runset_core::materialize::{ProcessingContext, ProcessingSession, RowContext};
pub use runset_core::metadata::{
    RunLineage, RunMetadata, StationMetadata, SurveyAggregate, SurveyMetadata,
};
pub use runset_core::selection::{
    DurationUnit, ParseDurationUnitError, RunTimeOverrides, RunTimes, SelectionMode,
    StationRunSelection,
};
pub use runset_core::simultaneity::resolve;
pub use runset_core::table::{
    DatasetError, DatasetResult, DatasetTable, RowId, RunRow, StationRole,
};

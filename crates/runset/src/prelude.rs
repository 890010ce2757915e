//! Wrapper prelude.
//!
//! The `runset` crate is the supported public entry point. Downstream code
//! should prefer importing from this prelude instead of depending on
//! internal core module paths.

pub use crate::archive::{ArchiveHandle, ArchiveOpener, OpenMode};
pub use crate::{
    DatasetConfig, DatasetError, DatasetTable, DurationUnit, ProcessingContext, ProcessingSession,
    RunInventory, RunRow, RunTimeOverrides, RunTimes, SelectionMode, StationRunSelection,
};

//! Archive capability: the seam between the dataset and the store that holds
//! raw samples and metadata for a station's runs.
//!
//! The dataset never reads archives directly. It asks an [`ArchiveOpener`] for
//! one [`ArchiveHandle`] per archive file, resolves each row to an opaque
//! [`RunReference`], and uses that token to read a `[start, end)` sample
//! window and the run's [`RunLineage`].
//!
//! [`memory`] provides an in-process implementation backed by Arrow record
//! batches.

pub mod memory;

use std::{fmt, path::Path};

use arrow::{array::RecordBatch, datatypes::DataType, error::ArrowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::metadata::RunLineage;

/// How an archive is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read-only access.
    #[default]
    #[serde(alias = "r")]
    Read,
    /// Read and append/write access (needed when spectral products are
    /// written back next to the local station's runs).
    #[serde(alias = "a")]
    ReadWrite,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => f.write_str("read"),
            OpenMode::ReadWrite => f.write_str("read_write"),
        }
    }
}

/// Opaque token identifying one run inside an archive.
///
/// Only meaningful to the handle that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunReference(pub String);

impl fmt::Display for RunReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Errors raised by archive implementations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ArchiveError {
    /// No archive exists at the requested path.
    #[snafu(display("Archive not found: {path}"))]
    NotFound {
        /// Requested path.
        path: String,
    },

    /// The handle was used after it was closed.
    #[snafu(display("Archive {path} is not open"))]
    NotOpen {
        /// Archive path.
        path: String,
    },

    /// `close` was called twice on the same handle.
    #[snafu(display("Archive {path} was already closed"))]
    AlreadyClosed {
        /// Archive path.
        path: String,
    },

    /// The archive has no run with this survey/station/run id.
    #[snafu(display("Run {run} of station {station} (survey {survey}) not found in {path}"))]
    RunNotFound {
        /// Archive path.
        path: String,
        /// Survey id.
        survey: String,
        /// Station id.
        station: String,
        /// Run id.
        run: String,
    },

    /// A reference token was not issued by this archive.
    #[snafu(display("Unknown run reference {reference} for {path}"))]
    UnknownReference {
        /// Archive path.
        path: String,
        /// The unrecognized token.
        reference: RunReference,
    },

    /// The run's sample table has no time column.
    #[snafu(display("Missing time column {column} in run {reference}"))]
    MissingTimeColumn {
        /// Expected time column name.
        column: String,
        /// Run whose samples were read.
        reference: RunReference,
    },

    /// The time column is not an Arrow timestamp.
    #[snafu(display("Unsupported time column {column} with type {datatype:?}"))]
    UnsupportedTimeType {
        /// Time column name.
        column: String,
        /// Arrow data type found.
        datatype: DataType,
    },

    /// A window bound does not fit the column's timestamp unit.
    #[snafu(display("Timestamp conversion overflow for column {column} (value: {timestamp})"))]
    TimeConversionOverflow {
        /// Time column name.
        column: String,
        /// Offending bound.
        timestamp: DateTime<Utc>,
    },

    /// Arrow compute failure while windowing samples.
    #[snafu(display("Arrow error while windowing samples: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Any other backend failure.
    #[snafu(display("Archive backend error at {path}: {message}"))]
    Backend {
        /// Archive path.
        path: String,
        /// Backend-provided description.
        message: String,
    },
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// An open archive.
pub trait ArchiveHandle {
    /// Path the handle was opened from.
    fn path(&self) -> &Path;

    /// Mode the handle was opened with.
    fn mode(&self) -> OpenMode;

    /// Resolve a run to a reference token.
    fn run_reference(&self, survey: &str, station: &str, run: &str)
    -> ArchiveResult<RunReference>;

    /// Read the samples of a run restricted to the half-open window
    /// `[start, end)`.
    fn read_window(
        &self,
        reference: &RunReference,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<RecordBatch>;

    /// Survey, station, and run metadata for a run.
    fn run_lineage(&self, reference: &RunReference) -> ArchiveResult<RunLineage>;

    /// Release the handle. Calling this twice is an error.
    fn close(&mut self) -> ArchiveResult<()>;
}

/// Opens archives by path.
pub trait ArchiveOpener {
    /// Handle type produced by this opener.
    type Handle: ArchiveHandle;

    /// Open the archive at `path`.
    fn open(&self, path: &Path, mode: OpenMode) -> ArchiveResult<Self::Handle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_accepts_short_aliases() {
        let read: OpenMode = serde_json::from_str("\"r\"").unwrap();
        let write: OpenMode = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(read, OpenMode::Read);
        assert_eq!(write, OpenMode::ReadWrite);
        assert_eq!(serde_json::to_string(&OpenMode::ReadWrite).unwrap(), "\"read_write\"");
        assert_eq!(OpenMode::default(), OpenMode::Read);
    }
}

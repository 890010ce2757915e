//! Processing-time materialization.
//!
//! A [`ProcessingSession`] holds one open archive handle per distinct archive
//! path referenced by a dataset table. [`ProcessingSession::materialize`] walks
//! the rows in table order, resolves each row to a run reference, reads its
//! `[start, end)` sample window, and folds the run's lineage into a
//! [`SurveyAggregate`]. The result is a [`ProcessingContext`] keyed by
//! [`RowId`], kept apart from the table rows themselves.
//!
//! Handles are closed explicitly with [`ProcessingSession::close`], which
//! visits every handle exactly once.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use arrow::array::RecordBatch;
use log::{debug, info, warn};
use snafu::{IntoError, prelude::*};

use crate::{
    archive::{ArchiveError, ArchiveHandle, ArchiveOpener, OpenMode, RunReference},
    metadata::{SurveyAggregate, SurveyMetadata},
    table::{
        DEFAULT_SURVEY_ID, DatasetError, DatasetResult, DatasetTable, RowId, RunRow,
        error::{ArchiveHandleSnafu, ArchiveSnafu, HandleMissingSnafu},
    },
};

/// Per-row processing state.
#[derive(Clone, Debug, PartialEq)]
pub struct RowContext {
    /// Station the row belongs to.
    pub station: String,
    /// Run the row was cut from.
    pub run: String,
    /// Archive the row was read from.
    pub archive_path: PathBuf,
    /// Reference to the run inside the archive.
    pub reference: RunReference,
    /// Samples in `[start, end)`; `None` when the row is backed by
    /// precomputed spectral products.
    pub samples: Option<RecordBatch>,
}

/// Everything materialized for a dataset table.
#[derive(Clone, Debug, Default)]
pub struct ProcessingContext {
    order: Vec<RowId>,
    rows: BTreeMap<RowId, RowContext>,
    surveys: SurveyAggregate,
    local_survey_id: Option<String>,
}

impl ProcessingContext {
    /// Context for `id`, if the row was materialized.
    pub fn get(&self, id: RowId) -> Option<&RowContext> {
        self.rows.get(&id)
    }

    /// Row contexts in table order.
    pub fn iter(&self) -> impl Iterator<Item = (RowId, &RowContext)> {
        self.order
            .iter()
            .filter_map(|id| self.rows.get(id).map(|ctx| (*id, ctx)))
    }

    /// Number of rows materialized.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if no row was materialized.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Aggregated survey/station/run metadata.
    pub fn surveys(&self) -> &SurveyAggregate {
        &self.surveys
    }

    /// Metadata of the local station's survey.
    ///
    /// Falls back to the [`DEFAULT_SURVEY_ID`] survey when the local survey
    /// id is not among the aggregated surveys.
    pub fn local_survey_metadata(&self) -> Option<&SurveyMetadata> {
        if let Some(survey) = self
            .local_survey_id
            .as_deref()
            .and_then(|id| self.surveys.get(id))
        {
            return Some(survey);
        }
        warn!(
            "Survey {} not found in processed metadata, falling back to survey {DEFAULT_SURVEY_ID}",
            self.local_survey_id.as_deref().unwrap_or("<unknown>")
        );
        self.surveys.get(DEFAULT_SURVEY_ID)
    }

    /// Total number of samples across every materialized window.
    pub fn total_samples(&self) -> usize {
        self.rows
            .values()
            .filter_map(|ctx| ctx.samples.as_ref())
            .map(RecordBatch::num_rows)
            .sum()
    }
}

/// Open archive handles for one dataset table.
pub struct ProcessingSession<H: ArchiveHandle> {
    handles: BTreeMap<PathBuf, H>,
    station_paths: BTreeMap<String, PathBuf>,
}

impl<H: ArchiveHandle> ProcessingSession<H> {
    /// Open one handle per distinct archive path of the table's stations.
    ///
    /// The local archive is opened with `local_mode` and the remote one
    /// read-only; when both stations share an archive it is opened once,
    /// with `local_mode`. If an open fails, handles already opened are
    /// closed before the error is returned.
    pub fn open<O>(table: &DatasetTable, opener: &O, local_mode: OpenMode) -> DatasetResult<Self>
    where
        O: ArchiveOpener<Handle = H>,
    {
        let local = table.require_local()?;
        let mut wanted: Vec<(String, PathBuf, OpenMode)> =
            vec![(local.to_string(), table.local_archive_path()?, local_mode)];
        if let Some(remote) = table.remote_station_id() {
            wanted.push((remote.to_string(), table.remote_archive_path()?, OpenMode::Read));
        }

        let mut session = Self {
            handles: BTreeMap::new(),
            station_paths: BTreeMap::new(),
        };
        for (station, path, mode) in wanted {
            if !session.handles.contains_key(&path) {
                match opener.open(&path, mode) {
                    Ok(handle) => {
                        debug!("Opened archive {} ({mode}) for station {station}", path.display());
                        session.handles.insert(path.clone(), handle);
                    }
                    Err(source) => {
                        if let Err(close_err) = session.close() {
                            warn!("Failed to close archives after open error: {close_err}");
                        }
                        return Err(ArchiveHandleSnafu {
                            path: path.display().to_string(),
                        }
                        .into_error(source));
                    }
                }
            }
            session.station_paths.insert(station, path);
        }
        Ok(session)
    }

    /// Number of open handles.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Archive path serving `station`.
    pub fn archive_path(&self, station: &str) -> Option<&Path> {
        self.station_paths.get(station).map(PathBuf::as_path)
    }

    fn handle_for(&self, row: &RunRow) -> DatasetResult<(&Path, &H)> {
        let path = self
            .station_paths
            .get(&row.station)
            .context(HandleMissingSnafu {
                station_id: row.station.clone(),
            })?;
        let handle = self.handles.get(path).context(HandleMissingSnafu {
            station_id: row.station.clone(),
        })?;
        Ok((path.as_path(), handle))
    }

    /// Materialize every row of `table`.
    ///
    /// Rows flagged `fc` are not read, but their lineage is still folded so
    /// the metadata is complete either way.
    pub fn materialize(&self, table: &DatasetTable) -> DatasetResult<ProcessingContext> {
        let mut ctx = ProcessingContext {
            local_survey_id: table.local_survey_id().ok(),
            ..ProcessingContext::default()
        };

        for row in table {
            let (path, handle) = self.handle_for(row)?;
            let archive_err = || ArchiveSnafu {
                station: row.station.clone(),
                run: row.run.clone(),
            };

            let reference = handle
                .run_reference(&row.survey, &row.station, &row.run)
                .context(archive_err())?;

            let samples = if row.fc {
                info!(
                    "Run {} of station {} already has spectral products, skipping time series",
                    row.run, row.station
                );
                None
            } else {
                Some(
                    handle
                        .read_window(&reference, row.start, row.end)
                        .context(archive_err())?,
                )
            };

            let lineage = handle.run_lineage(&reference).context(archive_err())?;
            ctx.surveys.fold(&lineage)?;

            ctx.order.push(row.row_id);
            ctx.rows.insert(
                row.row_id,
                RowContext {
                    station: row.station.clone(),
                    run: row.run.clone(),
                    archive_path: path.to_path_buf(),
                    reference,
                    samples,
                },
            );
        }

        info!(
            "Materialized {} rows ({} samples)",
            ctx.len(),
            ctx.total_samples()
        );
        Ok(ctx)
    }

    /// Close every handle exactly once and return how many were closed.
    ///
    /// All handles are attempted; the first failure is returned.
    pub fn close(self) -> DatasetResult<usize> {
        let mut closed = 0;
        let mut first_err: Option<DatasetError> = None;
        for (path, mut handle) in self.handles {
            match handle.close() {
                Ok(()) => closed += 1,
                Err(source) => {
                    warn!("Failed to close archive {}: {source}", path.display());
                    first_err.get_or_insert_with(|| close_error(&path, source));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(closed),
        }
    }
}

fn close_error(path: &Path, source: ArchiveError) -> DatasetError {
    ArchiveHandleSnafu {
        path: path.display().to_string(),
    }
    .into_error(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::memory::{HandleEvent, MemoryArchive};
    use crate::test_util::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn opens_one_handle_per_archive_with_the_right_modes() -> TestResult {
        let table = two_station_table(&[("a", 0, 10)], &[("x", 0, 10)]);
        let opener = opener_for(&table)?;

        let session = ProcessingSession::open(&table, &opener, OpenMode::ReadWrite)?;
        assert_eq!(session.handle_count(), 2);
        assert_eq!(
            session.archive_path(REMOTE),
            Some(Path::new(REMOTE_ARCHIVE))
        );
        assert_eq!(session.close()?, 2);

        let events = opener.events();
        assert!(events.contains(&HandleEvent::Opened {
            path: LOCAL_ARCHIVE.into(),
            mode: OpenMode::ReadWrite,
        }));
        assert!(events.contains(&HandleEvent::Opened {
            path: REMOTE_ARCHIVE.into(),
            mode: OpenMode::Read,
        }));
        for path in [LOCAL_ARCHIVE, REMOTE_ARCHIVE] {
            assert_eq!(opener.open_count(Path::new(path)), 1);
            assert_eq!(opener.close_count(Path::new(path)), 1);
        }
        Ok(())
    }

    #[test]
    fn shared_archive_is_opened_and_closed_once() -> TestResult {
        let rows = vec![
            local_row("a", 0, 10).with_archive_path(LOCAL_ARCHIVE),
            remote_row("x", 0, 10).with_archive_path(LOCAL_ARCHIVE),
        ];
        let table = DatasetTable::from_rows(rows, LOCAL, Some(REMOTE.to_string()))?;
        let opener = opener_for(&table)?;

        let session = ProcessingSession::open(&table, &opener, OpenMode::ReadWrite)?;
        assert_eq!(session.handle_count(), 1);
        let ctx = session.materialize(&table)?;
        assert_eq!(ctx.len(), 2);
        assert_eq!(session.close()?, 1);

        assert_eq!(
            opener.events(),
            vec![
                HandleEvent::Opened {
                    path: LOCAL_ARCHIVE.into(),
                    mode: OpenMode::ReadWrite,
                },
                HandleEvent::Closed {
                    path: LOCAL_ARCHIVE.into(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn materializes_half_open_windows_in_table_order() -> TestResult {
        let table = simultaneity_resolved(&[("a", 0, 10), ("b", 20, 30)], &[("x", 5, 25)]);
        let opener = opener_for(&table)?;
        let session = ProcessingSession::open(&table, &opener, OpenMode::Read)?;
        let ctx = session.materialize(&table)?;
        session.close()?;

        let ids: Vec<RowId> = ctx.iter().map(|(id, _)| id).collect();
        let expected: Vec<RowId> = table.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, expected);

        for (id, row_ctx) in ctx.iter() {
            let row = table.row(id).ok_or("row missing")?;
            let samples = row_ctx.samples.as_ref().ok_or("samples missing")?;
            assert_eq!(samples.num_rows() as f64, row.duration);
            assert_eq!(row_ctx.station, row.station);
        }
        assert_eq!(ctx.total_samples(), 20);
        Ok(())
    }

    #[test]
    fn fc_rows_skip_samples_but_still_fold_metadata() -> TestResult {
        let rows = vec![local_row("a", 0, 10).with_fc(true), local_row("b", 20, 30)];
        let table = DatasetTable::from_rows(rows, LOCAL, None)?;
        let opener = opener_for(&table)?;
        let session = ProcessingSession::open(&table, &opener, OpenMode::Read)?;
        let ctx = session.materialize(&table)?;
        session.close()?;

        let first = ctx.get(table.rows()[0].row_id).ok_or("row missing")?;
        assert!(first.samples.is_none());
        assert_eq!(first.reference.0, format!("/{SURVEY}/{LOCAL}/a"));

        let survey = ctx.local_survey_metadata().ok_or("survey missing")?;
        let station = survey.station(LOCAL).ok_or("station missing")?;
        assert_eq!(station.run_ids(), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn second_survey_is_fatal() -> TestResult {
        let mut other = local_row("b", 20, 30);
        other.survey = "other".into();
        let table = DatasetTable::from_rows(vec![local_row("a", 0, 10), other], LOCAL, None)?;
        let opener = opener_for(&table)?;
        let session = ProcessingSession::open(&table, &opener, OpenMode::Read)?;
        let err = session.materialize(&table).unwrap_err();
        assert!(matches!(err, DatasetError::MultipleSurveys { .. }));
        session.close()?;
        Ok(())
    }

    #[test]
    fn missing_archive_reports_path_and_closes_opened_handles() -> TestResult {
        let table = two_station_table(&[("a", 0, 10)], &[("x", 0, 10)]);
        let local_only = opener_for(&single_station_table(&[("a", 0, 10)]))?;

        let err = ProcessingSession::<MemoryArchive>::open(&table, &local_only, OpenMode::Read)
            .err()
            .ok_or("open should fail")?;
        assert!(matches!(err, DatasetError::ArchiveHandle { .. }));
        assert!(err.to_string().contains(REMOTE_ARCHIVE));
        assert_eq!(local_only.close_count(Path::new(LOCAL_ARCHIVE)), 1);
        Ok(())
    }

    #[test]
    fn missing_run_names_station_and_run() -> TestResult {
        let table = single_station_table(&[("a", 0, 10)]);
        let opener = opener_for(&table)?;
        let session = ProcessingSession::open(&table, &opener, OpenMode::Read)?;

        let mut renamed = table.clone();
        renamed.set_rows(vec![local_row("zz", 0, 10)])?;
        let err = session.materialize(&renamed).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("zz") && msg.contains(LOCAL), "{msg}");
        session.close()?;
        Ok(())
    }

    #[test]
    fn unnamed_survey_falls_back_to_default_key() -> TestResult {
        let mut row = local_row("a", 0, 10);
        row.survey = DEFAULT_SURVEY_ID.into();
        let table = DatasetTable::from_rows(vec![row], LOCAL, None)?;
        let opener = opener_for(&table)?;
        let session = ProcessingSession::open(&table, &opener, OpenMode::Read)?;
        let mut ctx = session.materialize(&table)?;
        session.close()?;

        ctx.local_survey_id = Some("unknown".into());
        let survey = ctx.local_survey_metadata().ok_or("fallback missing")?;
        assert_eq!(survey.id, DEFAULT_SURVEY_ID);
        Ok(())
    }
}

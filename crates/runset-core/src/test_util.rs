use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};

use crate::archive::ArchiveError;
use crate::archive::memory::{MemoryArchiveOpener, MemoryStore, synthetic_run_batch};
use crate::metadata::{RunLineage, RunMetadata, StationMetadata, SurveyMetadata};
use crate::simultaneity;
use crate::table::{DatasetTable, RunRow};

pub(crate) const SURVEY: &str = "CONUS";
pub(crate) const LOCAL: &str = "mt01";
pub(crate) const REMOTE: &str = "rr01";
pub(crate) const LOCAL_ARCHIVE: &str = "/archives/mt01.h5";
pub(crate) const REMOTE_ARCHIVE: &str = "/archives/rr01.h5";

/// 2024-01-01T00:00:00Z; test offsets are seconds after this.
pub(crate) const T0: i64 = 1_704_067_200;

pub(crate) fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(T0 + offset_secs, 0)
        .single()
        .expect("valid test timestamp")
}

fn archive_for(station: &str) -> PathBuf {
    match station {
        LOCAL => PathBuf::from(LOCAL_ARCHIVE),
        REMOTE => PathBuf::from(REMOTE_ARCHIVE),
        other => PathBuf::from(format!("/archives/{other}.h5")),
    }
}

/// 1 Hz row of `station` with its default archive path.
pub(crate) fn row(station: &str, run: &str, start: i64, end: i64) -> RunRow {
    RunRow::new(SURVEY, station, run, ts(start), ts(end))
        .with_sample_rate(1.0)
        .with_archive_path(archive_for(station))
}

pub(crate) fn local_row(run: &str, start: i64, end: i64) -> RunRow {
    row(LOCAL, run, start, end)
}

pub(crate) fn remote_row(run: &str, start: i64, end: i64) -> RunRow {
    row(REMOTE, run, start, end)
}

pub(crate) fn single_station_table(local: &[(&str, i64, i64)]) -> DatasetTable {
    let rows = local.iter().map(|(r, s, e)| local_row(r, *s, *e)).collect();
    DatasetTable::from_rows(rows, LOCAL, None).expect("valid single-station table")
}

/// Two-station table with the rows as given (not resolved).
pub(crate) fn two_station_table(
    local: &[(&str, i64, i64)],
    remote: &[(&str, i64, i64)],
) -> DatasetTable {
    let rows = local
        .iter()
        .map(|(r, s, e)| local_row(r, *s, *e))
        .chain(remote.iter().map(|(r, s, e)| remote_row(r, *s, *e)))
        .collect();
    DatasetTable::from_rows(rows, LOCAL, Some(REMOTE.to_string()))
        .expect("valid two-station table")
}

pub(crate) fn simultaneity_resolved(
    local: &[(&str, i64, i64)],
    remote: &[(&str, i64, i64)],
) -> DatasetTable {
    simultaneity::resolve(&two_station_table(local, remote)).expect("stations overlap")
}

/// In-memory archives holding a 1 Hz batch for every run in `table`,
/// spanning all of that run's rows.
pub(crate) fn opener_for(table: &DatasetTable) -> Result<MemoryArchiveOpener, ArchiveError> {
    let mut spans: BTreeMap<(PathBuf, String, String, String), (DateTime<Utc>, DateTime<Utc>)> =
        BTreeMap::new();
    for row in table {
        let path = row
            .archive_path
            .clone()
            .unwrap_or_else(|| archive_for(&row.station));
        let key = (path, row.survey.clone(), row.station.clone(), row.run.clone());
        let span = spans.entry(key).or_insert((row.start, row.end));
        span.0 = span.0.min(row.start);
        span.1 = span.1.max(row.end);
    }

    let mut stores: BTreeMap<PathBuf, MemoryStore> = BTreeMap::new();
    for ((path, survey, station, run), (start, end)) in spans {
        let n_samples = (end - start).num_seconds() as usize + 1;
        let batch = synthetic_run_batch(start, 1.0, n_samples, &["ex", "hy"])?;
        let lineage = RunLineage {
            survey: SurveyMetadata::new(survey),
            station: StationMetadata::new(station),
            run: RunMetadata::new(run),
        };
        let store = stores.remove(&path).unwrap_or_default();
        stores.insert(path, store.with_run(lineage, batch));
    }

    Ok(stores
        .into_iter()
        .fold(MemoryArchiveOpener::new(), |opener, (path, store)| {
            opener.with_archive(path, store)
        }))
}

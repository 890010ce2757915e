//! In-process archive backed by Arrow record batches.
//!
//! Each archive path maps to a [`MemoryStore`] holding one sample batch per
//! run. Windowed reads filter the batch by its timestamp column with
//! half-open semantics `[start, end)`. Every open and close is recorded as a
//! [`HandleEvent`] so callers can check that each handle is closed exactly
//! once.

use std::{
    cell::RefCell,
    collections::BTreeMap,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};

use arrow::array::{
    Array, ArrayRef, AsArray, Float64Array, PrimitiveArray, RecordBatch, Scalar,
    TimestampNanosecondArray,
};
use arrow::compute::filter_record_batch;
use arrow::compute::kernels::{boolean::and, cmp};
use arrow::datatypes::{
    ArrowTimestampType, DataType, Field, Schema, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use chrono::{DateTime, Utc};
use snafu::prelude::*;

use super::{
    AlreadyClosedSnafu, ArchiveError, ArchiveHandle, ArchiveOpener, ArchiveResult, ArrowSnafu,
    MissingTimeColumnSnafu, NotFoundSnafu, NotOpenSnafu, OpenMode, RunNotFoundSnafu,
    RunReference, UnknownReferenceSnafu, UnsupportedTimeTypeSnafu,
};
use crate::metadata::RunLineage;

/// Default name of the timestamp column in sample batches.
pub const DEFAULT_TIME_COLUMN: &str = "time";

/// One run stored in a [`MemoryStore`].
#[derive(Clone, Debug)]
pub struct MemoryRun {
    /// Survey/station/run metadata for the run.
    pub lineage: RunLineage,
    /// All samples of the run, including the time column.
    pub samples: RecordBatch,
}

/// Contents of one in-memory archive.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    time_column: String,
    runs: Vec<MemoryRun>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_COLUMN)
    }
}

impl MemoryStore {
    /// Empty store whose batches use `time_column` as the timestamp column.
    pub fn new(time_column: impl Into<String>) -> Self {
        Self {
            time_column: time_column.into(),
            runs: Vec::new(),
        }
    }

    /// Add a run.
    pub fn with_run(mut self, lineage: RunLineage, samples: RecordBatch) -> Self {
        self.runs.push(MemoryRun { lineage, samples });
        self
    }

    /// Runs in insertion order.
    pub fn runs(&self) -> &[MemoryRun] {
        &self.runs
    }

    fn find_by_reference(&self, reference: &RunReference) -> Option<&MemoryRun> {
        self.runs
            .iter()
            .find(|r| &reference_for(&r.lineage) == reference)
    }
}

/// Open/close bookkeeping shared between an opener and its handles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandleEvent {
    /// A handle was opened.
    Opened {
        /// Archive path.
        path: PathBuf,
        /// Mode requested.
        mode: OpenMode,
    },
    /// A handle was closed.
    Closed {
        /// Archive path.
        path: PathBuf,
    },
}

type EventLog = Rc<RefCell<Vec<HandleEvent>>>;

/// Opener for [`MemoryArchive`] handles.
#[derive(Clone, Debug, Default)]
pub struct MemoryArchiveOpener {
    stores: BTreeMap<PathBuf, Rc<MemoryStore>>,
    events: EventLog,
}

impl MemoryArchiveOpener {
    /// Opener with no archives registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `path`.
    pub fn with_archive(mut self, path: impl Into<PathBuf>, store: MemoryStore) -> Self {
        self.stores.insert(path.into(), Rc::new(store));
        self
    }

    /// Every open/close recorded so far, in order.
    pub fn events(&self) -> Vec<HandleEvent> {
        self.events.borrow().clone()
    }

    /// Number of times `path` was opened.
    pub fn open_count(&self, path: &Path) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, HandleEvent::Opened { path: p, .. } if p == path))
            .count()
    }

    /// Number of times `path` was closed.
    pub fn close_count(&self, path: &Path) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| matches!(e, HandleEvent::Closed { path: p } if p == path))
            .count()
    }
}

impl ArchiveOpener for MemoryArchiveOpener {
    type Handle = MemoryArchive;

    fn open(&self, path: &Path, mode: OpenMode) -> ArchiveResult<MemoryArchive> {
        let store = self.stores.get(path).cloned().context(NotFoundSnafu {
            path: path.display().to_string(),
        })?;

        self.events.borrow_mut().push(HandleEvent::Opened {
            path: path.to_path_buf(),
            mode,
        });

        Ok(MemoryArchive {
            path: path.to_path_buf(),
            mode,
            store,
            open: true,
            events: Rc::clone(&self.events),
        })
    }
}

/// Handle onto a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryArchive {
    path: PathBuf,
    mode: OpenMode,
    store: Rc<MemoryStore>,
    open: bool,
    events: EventLog,
}

impl MemoryArchive {
    fn ensure_open(&self) -> ArchiveResult<()> {
        ensure!(
            self.open,
            NotOpenSnafu {
                path: self.path.display().to_string(),
            }
        );
        Ok(())
    }

    fn run(&self, reference: &RunReference) -> ArchiveResult<&MemoryRun> {
        self.store
            .find_by_reference(reference)
            .context(UnknownReferenceSnafu {
                path: self.path.display().to_string(),
                reference: reference.clone(),
            })
    }
}

impl ArchiveHandle for MemoryArchive {
    fn path(&self) -> &Path {
        &self.path
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn run_reference(
        &self,
        survey: &str,
        station: &str,
        run: &str,
    ) -> ArchiveResult<RunReference> {
        self.ensure_open()?;
        self.store
            .runs
            .iter()
            .find(|r| {
                r.lineage.survey.id == survey
                    && r.lineage.station.id == station
                    && r.lineage.run.id == run
            })
            .map(|r| reference_for(&r.lineage))
            .context(RunNotFoundSnafu {
                path: self.path.display().to_string(),
                survey,
                station,
                run,
            })
    }

    fn read_window(
        &self,
        reference: &RunReference,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ArchiveResult<RecordBatch> {
        self.ensure_open()?;
        let run = self.run(reference)?;
        window_batch(&run.samples, &self.store.time_column, reference, start, end)
    }

    fn run_lineage(&self, reference: &RunReference) -> ArchiveResult<RunLineage> {
        self.ensure_open()?;
        Ok(self.run(reference)?.lineage.clone())
    }

    fn close(&mut self) -> ArchiveResult<()> {
        ensure!(
            self.open,
            AlreadyClosedSnafu {
                path: self.path.display().to_string(),
            }
        );
        self.open = false;
        self.events.borrow_mut().push(HandleEvent::Closed {
            path: self.path.clone(),
        });
        Ok(())
    }
}

fn reference_for(lineage: &RunLineage) -> RunReference {
    RunReference(format!(
        "/{}/{}/{}",
        lineage.survey.id, lineage.station.id, lineage.run.id
    ))
}

fn to_bounds_i64(
    field: &Field,
    column: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ArchiveResult<(i64, i64)> {
    let to_ns = |dt: DateTime<Utc>| {
        dt.timestamp()
            .checked_mul(1_000_000_000)
            .and_then(|secs| secs.checked_add(dt.timestamp_subsec_nanos() as i64))
            .ok_or_else(|| ArchiveError::TimeConversionOverflow {
                column: column.to_string(),
                timestamp: dt,
            })
    };

    match field.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => Ok((start.timestamp(), end.timestamp())),
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            Ok((start.timestamp_millis(), end.timestamp_millis()))
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            Ok((start.timestamp_micros(), end.timestamp_micros()))
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => Ok((to_ns(start)?, to_ns(end)?)),
        other => Err(ArchiveError::UnsupportedTimeType {
            column: column.to_string(),
            datatype: other.clone(),
        }),
    }
}

fn window_batch(
    batch: &RecordBatch,
    time_column: &str,
    reference: &RunReference,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ArchiveResult<RecordBatch> {
    let schema = batch.schema();
    let ts_idx = schema
        .index_of(time_column)
        .ok()
        .context(MissingTimeColumnSnafu {
            column: time_column,
            reference: reference.clone(),
        })?;
    let ts_field = schema.field(ts_idx);
    let (lower, upper) = to_bounds_i64(ts_field, time_column, start, end)?;

    match ts_field.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            retain_window::<TimestampSecondType>(batch, ts_idx, time_column, lower, upper)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            retain_window::<TimestampMillisecondType>(batch, ts_idx, time_column, lower, upper)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            retain_window::<TimestampMicrosecondType>(batch, ts_idx, time_column, lower, upper)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            retain_window::<TimestampNanosecondType>(batch, ts_idx, time_column, lower, upper)
        }
        other => UnsupportedTimeTypeSnafu {
            column: time_column,
            datatype: other.clone(),
        }
        .fail(),
    }
}

/// Rows of `batch` whose timestamp at column `ts_idx` lies in `[lower, upper)`,
/// with both bounds in the column's unit `T`.
///
/// Bounds are single-value scalars in the column's timezone so the kernels
/// broadcast them. Null timestamps give null mask slots and are dropped.
fn retain_window<T: ArrowTimestampType>(
    batch: &RecordBatch,
    ts_idx: usize,
    time_column: &str,
    lower: i64,
    upper: i64,
) -> ArchiveResult<RecordBatch>
where
    PrimitiveArray<T>: From<Vec<i64>>,
{
    let array = batch.column(ts_idx);
    let times = array
        .as_primitive_opt::<T>()
        .context(UnsupportedTimeTypeSnafu {
            column: time_column,
            datatype: array.data_type().clone(),
        })?;
    let tz = match times.data_type() {
        DataType::Timestamp(_, tz) => tz.clone(),
        _ => None,
    };
    let bound =
        |value: i64| Scalar::new(PrimitiveArray::<T>::from(vec![value]).with_timezone_opt(tz.clone()));

    let from_lower = cmp::gt_eq(times, &bound(lower)).context(ArrowSnafu)?;
    let before_upper = cmp::lt(times, &bound(upper)).context(ArrowSnafu)?;
    let mask = and(&from_lower, &before_upper).context(ArrowSnafu)?;
    filter_record_batch(batch, &mask).context(ArrowSnafu)
}

/// Build a regularly sampled batch: a UTC nanosecond time column named
/// [`DEFAULT_TIME_COLUMN`] plus one `Float64` column per channel holding the
/// sample index.
pub fn synthetic_run_batch(
    start: DateTime<Utc>,
    sample_rate: f64,
    n_samples: usize,
    channels: &[&str],
) -> ArchiveResult<RecordBatch> {
    let start_ns = start
        .timestamp_nanos_opt()
        .context(super::TimeConversionOverflowSnafu {
            column: DEFAULT_TIME_COLUMN,
            timestamp: start,
        })?;
    let period_ns = (1e9 / sample_rate).round() as i64;

    let times: Vec<i64> = (0..n_samples as i64)
        .map(|i| start_ns + i * period_ns)
        .collect();
    let values: Vec<f64> = (0..n_samples).map(|i| i as f64).collect();

    let mut fields = vec![Field::new(
        DEFAULT_TIME_COLUMN,
        DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
        false,
    )];
    let mut columns: Vec<ArrayRef> =
        vec![Arc::new(TimestampNanosecondArray::from(times).with_timezone("UTC"))];
    for channel in channels {
        fields.push(Field::new(*channel, DataType::Float64, false));
        columns.push(Arc::new(Float64Array::from(values.clone())));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).context(ArrowSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{RunMetadata, StationMetadata, SurveyMetadata};
    use chrono::TimeZone;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn lineage(station: &str, run: &str) -> RunLineage {
        RunLineage {
            survey: SurveyMetadata::new("s"),
            station: StationMetadata::new(station),
            run: RunMetadata::new(run),
        }
    }

    fn opener() -> Result<MemoryArchiveOpener, ArchiveError> {
        let batch = synthetic_run_batch(ts(0), 1.0, 100, &["ex", "hy"])?;
        let store = MemoryStore::default().with_run(lineage("mt01", "a"), batch);
        Ok(MemoryArchiveOpener::new().with_archive("/data/mt01.h5", store))
    }

    #[test]
    fn window_is_half_open() -> TestResult {
        let opener = opener()?;
        let handle = opener.open(Path::new("/data/mt01.h5"), OpenMode::Read)?;
        let reference = handle.run_reference("s", "mt01", "a")?;

        let batch = handle.read_window(&reference, ts(10), ts(20))?;
        assert_eq!(batch.num_rows(), 10);
        assert_eq!(batch.num_columns(), 3);

        let empty = handle.read_window(&reference, ts(200), ts(300))?;
        assert_eq!(empty.num_rows(), 0);
        Ok(())
    }

    #[test]
    fn millisecond_columns_window_without_timezone_and_drop_nulls() -> TestResult {
        use arrow::array::TimestampMillisecondArray;

        let times: Vec<Option<i64>> = (0..10)
            .map(|i| if i == 3 { None } else { Some(i * 500) })
            .collect();
        let schema = Schema::new(vec![
            Field::new("t", DataType::Timestamp(TimeUnit::Millisecond, None), true),
            Field::new("ex", DataType::Float64, false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampMillisecondArray::from(times)),
            Arc::new(Float64Array::from((0..10).map(f64::from).collect::<Vec<_>>())),
        ];
        let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
        let reference = RunReference("/s/mt01/a".into());

        let window = window_batch(&batch, "t", &reference, ts(1), ts(3))?;
        let ex = window.column(1).as_primitive::<arrow::datatypes::Float64Type>();
        assert_eq!(ex.values().to_vec(), vec![2.0, 4.0, 5.0]);

        let err = window_batch(&batch, "time", &reference, ts(1), ts(3)).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingTimeColumn { .. }));
        Ok(())
    }

    #[test]
    fn unknown_run_and_path_are_reported() -> TestResult {
        let opener = opener()?;
        let err = opener
            .open(Path::new("/data/nope.h5"), OpenMode::Read)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound { .. }));

        let handle = opener.open(Path::new("/data/mt01.h5"), OpenMode::Read)?;
        let err = handle.run_reference("s", "mt01", "zzz").unwrap_err();
        assert!(matches!(err, ArchiveError::RunNotFound { .. }));
        assert!(err.to_string().contains("zzz"));

        let err = handle
            .run_lineage(&RunReference("/s/mt01/zzz".into()))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnknownReference { .. }));
        Ok(())
    }

    #[test]
    fn close_twice_is_rejected_and_events_are_recorded() -> TestResult {
        let opener = opener()?;
        let path = Path::new("/data/mt01.h5");
        let mut handle = opener.open(path, OpenMode::ReadWrite)?;
        handle.close()?;
        assert!(matches!(
            handle.close().unwrap_err(),
            ArchiveError::AlreadyClosed { .. }
        ));
        assert!(matches!(
            handle.run_reference("s", "mt01", "a").unwrap_err(),
            ArchiveError::NotOpen { .. }
        ));
        assert_eq!(opener.open_count(path), 1);
        assert_eq!(opener.close_count(path), 1);
        assert_eq!(
            opener.events()[0],
            HandleEvent::Opened {
                path: path.to_path_buf(),
                mode: OpenMode::ReadWrite
            }
        );
        Ok(())
    }

    #[test]
    fn missing_time_column_is_reported() -> TestResult {
        let batch = synthetic_run_batch(ts(0), 1.0, 5, &["ex"])?;
        let store = MemoryStore::new("ts").with_run(lineage("mt01", "a"), batch);
        let opener = MemoryArchiveOpener::new().with_archive("/x.h5", store);
        let handle = opener.open(Path::new("/x.h5"), OpenMode::Read)?;
        let reference = handle.run_reference("s", "mt01", "a")?;
        let err = handle.read_window(&reference, ts(0), ts(5)).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingTimeColumn { .. }));
        Ok(())
    }
}

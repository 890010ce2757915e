//! Simultaneity resolver.
//!
//! Restricts a two-station table to the intervals both stations recorded at
//! the same time. Every local row is paired with every remote row; each
//! overlapping pair contributes a local and a remote fragment clipped to the
//! intersection, and rows without any counterpart are dropped.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, error};

use crate::{
    interval,
    table::{DatasetResult, DatasetTable, RunRow, error::NoSimultaneousDataSnafu},
};

type FragmentKey = (String, String, DateTime<Utc>, DateTime<Utc>);

/// Intersection of one local and one remote row, by index.
struct Overlap {
    local: usize,
    remote: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Overlap {
    /// True if this intersection has positive length and contains `t`.
    fn spans_instant(&self, t: DateTime<Utc>) -> bool {
        self.start < self.end && self.start <= t && t <= self.end
    }
}

/// Replace a two-station table with its simultaneous fragments.
///
/// Fragments come out in local-row-major order, local before remote for each
/// overlapping pair, and get fresh row ids. A fragment identical to one
/// already emitted (same station, run, start, end) is skipped, so resolving
/// an already-resolved table returns the same intervals.
///
/// Two runs that only touch at an instant yield a zero-length fragment pair,
/// unless either run already has a positive-length fragment containing that
/// instant.
pub fn resolve(table: &DatasetTable) -> DatasetResult<DatasetTable> {
    let (local, remote) = table.require_pair()?;

    let local_rows: Vec<&RunRow> = table.station_rows(local).collect();
    let remote_rows: Vec<&RunRow> = table.station_rows(remote).collect();

    let mut seen: HashSet<FragmentKey> = HashSet::new();
    let mut fragments: Vec<RunRow> = Vec::new();
    let mut emit = |row: &RunRow, start: DateTime<Utc>, end: DateTime<Utc>| {
        let key = (row.station.clone(), row.run.clone(), start, end);
        if seen.insert(key) {
            let mut fragment = row.clone();
            fragment.clip_to(start, end);
            fragments.push(fragment);
        }
    };

    let mut overlaps: Vec<Overlap> = Vec::new();
    for (li, l) in local_rows.iter().enumerate() {
        for (ri, r) in remote_rows.iter().enumerate() {
            if !interval::overlaps(&l.start, &l.end, &r.start, &r.end) {
                continue;
            }
            if let Some((start, end)) = interval::intersect(&l.start, &l.end, &r.start, &r.end) {
                overlaps.push(Overlap {
                    local: li,
                    remote: ri,
                    start,
                    end,
                });
            }
        }
    }

    for o in &overlaps {
        let (l, r) = (local_rows[o.local], remote_rows[o.remote]);
        if o.start == o.end {
            let shadowed = overlaps.iter().any(|p| {
                (p.local == o.local || p.remote == o.remote) && p.spans_instant(o.start)
            });
            if shadowed {
                debug!(
                    "Runs {} ({local}) and {} ({remote}) only touch at {}, already covered; skipping",
                    l.run, r.run, o.start
                );
                continue;
            }
            debug!(
                "Runs {} ({local}) and {} ({remote}) only touch at {}; keeping zero-length fragment",
                l.run, r.run, o.start
            );
        }
        emit(l, o.start, o.end);
        emit(r, o.start, o.end);
    }

    if fragments.is_empty() {
        let err = NoSimultaneousDataSnafu { local, remote }.build();
        error!("{err}");
        return Err(err);
    }

    debug!(
        "Resolved {} local and {} remote rows into {} simultaneous fragments",
        local_rows.len(),
        remote_rows.len(),
        fragments.len()
    );
    table.derive_fresh(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::DatasetError;
    use crate::test_util::*;

    fn spans(table: &DatasetTable, station: &str) -> Vec<(i64, i64)> {
        table
            .station_rows(station)
            .map(|r| (r.start.timestamp() - T0, r.end.timestamp() - T0))
            .collect()
    }

    #[test]
    fn splits_local_runs_around_a_single_remote_run() {
        let table = two_station_table(&[("a", 0, 10), ("b", 20, 30)], &[("x", 5, 25)]);
        let resolved = resolve(&table).unwrap();

        assert_eq!(resolved.len(), 4);
        assert_eq!(spans(&resolved, LOCAL), vec![(5, 10), (20, 25)]);
        assert_eq!(spans(&resolved, REMOTE), vec![(5, 10), (20, 25)]);

        let order: Vec<(&str, &str)> = resolved
            .iter()
            .map(|r| (r.station.as_str(), r.run.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(LOCAL, "a"), (REMOTE, "x"), (LOCAL, "b"), (REMOTE, "x")]
        );
        assert!(resolved.iter().all(|r| r.duration == 5.0));
        assert!(resolved.iter().all(|r| r.remote == (r.station == REMOTE)));
    }

    #[test]
    fn fragments_stay_inside_some_original_row_of_each_station() {
        let table = two_station_table(
            &[("a", 0, 100), ("b", 150, 400), ("c", 500, 520)],
            &[("x", 50, 170), ("y", 180, 300), ("z", 350, 600)],
        );
        let resolved = resolve(&table).unwrap();

        let within = |row: &RunRow, station: &str| {
            table
                .station_rows(station)
                .any(|o| o.interval().contains(&row.interval()))
        };
        for row in resolved.station_rows(LOCAL) {
            assert!(within(row, LOCAL), "{row:?}");
            assert!(within(row, REMOTE), "{row:?}");
        }
    }

    #[test]
    fn new_fragments_get_fresh_row_ids() {
        let table = two_station_table(&[("a", 0, 10)], &[("x", 0, 10)]);
        let resolved = resolve(&table).unwrap();
        for row in resolved.iter() {
            assert!(table.row(row.row_id).is_none());
        }
    }

    #[test]
    fn disjoint_stations_fail_and_name_both() {
        let table = two_station_table(&[("a", 0, 10)], &[("x", 20, 30)]);
        let err = resolve(&table).unwrap_err();
        assert!(matches!(err, DatasetError::NoSimultaneousData { .. }));
        let msg = err.to_string();
        assert!(msg.contains(LOCAL) && msg.contains(REMOTE), "{msg}");
    }

    #[test]
    fn rows_of_other_stations_are_dropped() {
        let mut stray = local_row("q", 0, 10);
        stray.station = "zz99".into();
        let rows = vec![local_row("a", 0, 10), remote_row("x", 0, 10), stray];
        let table = DatasetTable::from_rows(rows, LOCAL, Some(REMOTE.to_string())).unwrap();
        let resolved = resolve(&table).unwrap();
        assert_eq!(resolved.stations(), vec![LOCAL, REMOTE]);
    }

    #[test]
    fn touching_endpoints_keep_a_zero_length_fragment() {
        let table = two_station_table(&[("a", 0, 10)], &[("x", 10, 20)]);
        let resolved = resolve(&table).unwrap();
        assert_eq!(spans(&resolved, LOCAL), vec![(10, 10)]);
        assert_eq!(resolved.rows()[0].duration, 0.0);
    }

    #[test]
    fn resolving_twice_is_stable() {
        let table = two_station_table(&[("a", 0, 10), ("b", 20, 30)], &[("x", 5, 25)]);
        let once = resolve(&table).unwrap();
        let twice = resolve(&once).unwrap();
        assert_eq!(spans(&once, LOCAL), spans(&twice, LOCAL));
        assert_eq!(spans(&once, REMOTE), spans(&twice, REMOTE));
    }

    #[test]
    fn touching_endpoints_inside_a_covered_span_add_nothing() {
        let table = two_station_table(&[("a", 0, 60)], &[("x", 0, 30), ("y", 30, 60)]);
        let once = resolve(&table).unwrap();
        assert_eq!(spans(&once, LOCAL), vec![(0, 30), (30, 60)]);
        assert_eq!(spans(&once, REMOTE), vec![(0, 30), (30, 60)]);

        let twice = resolve(&once).unwrap();
        assert_eq!(twice.len(), 4);
        assert_eq!(spans(&twice, LOCAL), spans(&once, LOCAL));
        assert_eq!(spans(&twice, REMOTE), spans(&once, REMOTE));
        assert!(twice.iter().all(|r| r.start < r.end));

        let table = two_station_table(&[("a", 0, 10), ("b", 10, 20)], &[("x", 10, 20)]);
        let resolved = resolve(&table).unwrap();
        assert_eq!(spans(&resolved, LOCAL), vec![(10, 20)]);
        assert_eq!(spans(&resolved, REMOTE), vec![(10, 20)]);
    }

    #[test]
    fn single_station_table_is_rejected() {
        let table = single_station_table(&[("a", 0, 10)]);
        assert!(matches!(
            resolve(&table).unwrap_err(),
            DatasetError::RemoteStationUnset { .. }
        ));
    }
}

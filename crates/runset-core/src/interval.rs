//! Closed-interval overlap and intersection.
//!
//! These helpers are independent of rows, stations, and timestamps. They work
//! for any totally ordered value and define the one overlap rule the rest of
//! the crate builds on:
//!
//! - Intervals are closed: `[start, end]`.
//! - Two intervals that only share a boundary instant **do** overlap, and
//!   their intersection is the zero-length interval `[t, t]`.
//! - [`overlaps`] and [`intersect`] agree by construction:
//!   `overlaps(a, b) == intersect(a, b).is_some()` for every pair of valid
//!   intervals (`start <= end`).
//!
//! The simultaneity resolver relies on the inclusive boundary rule when it
//! splits runs, so changing it here changes which fragments are emitted.

use std::fmt;

/// Returns `true` if `[a_start, a_end]` and `[b_start, b_end]` share at least
/// one instant.
///
/// Touching endpoints count as overlap.
pub fn overlaps<T: Ord>(a_start: &T, a_end: &T, b_start: &T, b_end: &T) -> bool {
    (a_start <= b_start && b_start <= a_end) || (b_start <= a_start && a_start <= b_end)
}

/// Returns the maximal common sub-interval of `[a_start, a_end]` and
/// `[b_start, b_end]`, or `None` when they do not overlap.
///
/// Cases are tested in order:
///
/// 1. B nested in A.
/// 2. B starts inside A (and ends after it).
/// 3. B ends inside A (and starts before it).
/// 4. A nested in B.
pub fn intersect<T: Ord + Clone>(a_start: &T, a_end: &T, b_start: &T, b_end: &T) -> Option<(T, T)> {
    if a_start <= b_start && b_start <= b_end && b_end <= a_end {
        Some((b_start.clone(), b_end.clone()))
    } else if a_start <= b_start && b_start <= a_end {
        Some((b_start.clone(), a_end.clone()))
    } else if a_start <= b_end && b_end <= a_end {
        Some((a_start.clone(), b_end.clone()))
    } else if b_start <= a_start && a_start <= a_end && a_end <= b_end {
        Some((a_start.clone(), a_end.clone()))
    } else {
        None
    }
}

/// A closed interval `[start, end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interval<T> {
    /// Inclusive lower bound.
    pub start: T,
    /// Inclusive upper bound.
    pub end: T,
}

impl<T: Ord + Clone> Interval<T> {
    /// Build an interval, returning `None` if `start > end`.
    pub fn new(start: T, end: T) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// See [`overlaps`].
    pub fn overlaps(&self, other: &Self) -> bool {
        overlaps(&self.start, &self.end, &other.start, &other.end)
    }

    /// See [`intersect`].
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        intersect(&self.start, &self.end, &other.start, &other.end)
            .map(|(start, end)| Self { start, end })
    }

    /// Returns `true` if `other` lies entirely within `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns `true` if the interval is a single instant.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }
}

impl<T: fmt::Display> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_intervals(max: i32) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        for s in 0..=max {
            for e in s..=max {
                out.push((s, e));
            }
        }
        out
    }

    #[test]
    fn nested_interval_is_returned_whole() {
        assert_eq!(intersect(&0, &10, &2, &5), Some((2, 5)));
        assert_eq!(intersect(&2, &5, &0, &10), Some((2, 5)));
    }

    #[test]
    fn partial_overlap_is_clipped_on_both_sides() {
        assert_eq!(intersect(&0, &10, &5, &25), Some((5, 10)));
        assert_eq!(intersect(&20, &30, &5, &25), Some((20, 25)));
    }

    #[test]
    fn touching_endpoints_overlap_at_a_single_instant() {
        assert!(overlaps(&0, &10, &10, &20));
        assert_eq!(intersect(&0, &10, &10, &20), Some((10, 10)));
        assert_eq!(intersect(&10, &20, &0, &10), Some((10, 10)));
    }

    #[test]
    fn disjoint_intervals_do_not_overlap() {
        assert!(!overlaps(&0, &10, &11, &20));
        assert_eq!(intersect(&0, &10, &11, &20), None);
        assert_eq!(intersect(&11, &20, &0, &10), None);
    }

    #[test]
    fn overlaps_agrees_with_intersect_for_every_valid_pair() {
        let intervals = all_intervals(6);
        for (a0, a1) in &intervals {
            for (b0, b1) in &intervals {
                let o = overlaps(a0, a1, b0, b1);
                let i = intersect(a0, a1, b0, b1);
                assert_eq!(o, i.is_some(), "a=[{a0},{a1}] b=[{b0},{b1}]");
            }
        }
    }

    #[test]
    fn intersect_is_symmetric_and_maximal() {
        let intervals = all_intervals(6);
        for (a0, a1) in &intervals {
            for (b0, b1) in &intervals {
                let ab = intersect(a0, a1, b0, b1);
                let ba = intersect(b0, b1, a0, a1);
                assert_eq!(ab, ba, "a=[{a0},{a1}] b=[{b0},{b1}]");
                if let Some((s, e)) = ab {
                    assert_eq!(s, *a0.max(b0));
                    assert_eq!(e, *a1.min(b1));
                }
            }
        }
    }

    #[test]
    fn interval_type_delegates() {
        let a = Interval::new(0, 10).unwrap();
        let b = Interval::new(5, 25).unwrap();
        assert!(a.overlaps(&b));
        assert_eq!(a.intersect(&b), Interval::new(5, 10));
        assert!(b.contains(&Interval::new(5, 10).unwrap()));
        assert!(!a.contains(&b));
        assert!(Interval::new(3, 3).unwrap().is_degenerate());
        assert!(Interval::new(4, 3).is_none());
        assert_eq!(a.to_string(), "[0, 10]");
    }
}

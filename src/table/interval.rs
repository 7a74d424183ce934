use std::collections::BTreeMap;

use crate::error::{PoolError, Result};
use crate::types::Labels;

use super::addr;

/// Inclusive interval owned by one claim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    /// First id.
    pub start: u64,
    /// Last id.
    pub end: u64,
    /// Labels of the owning claim.
    pub labels: Labels,
}

impl Interval {
    /// Builds an interval.
    pub fn new(start: u64, end: u64, labels: Labels) -> Self {
        Self { start, end, labels }
    }

    /// `id` or `start-end` rendering.
    pub fn render(&self) -> String {
        if self.start == self.end {
            self.start.to_string()
        } else {
            format!("{}-{}", self.start, self.end)
        }
    }
}

/// Non-overlapping intervals over `[0, max]`, keyed by start.
#[derive(Clone, Debug)]
pub struct IntervalTable {
    max: u64,
    intervals: BTreeMap<u64, Interval>,
}

impl IntervalTable {
    /// Empty table over `[0, max]`.
    pub fn new(max: u64) -> Self {
        Self {
            max,
            intervals: BTreeMap::new(),
        }
    }

    /// Largest id of the table.
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Number of intervals.
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    /// Whether the table holds no interval.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Intervals intersecting `[start, end]`, ascending.
    pub fn overlapping(&self, start: u64, end: u64) -> Vec<&Interval> {
        let mut out: Vec<&Interval> = self
            .intervals
            .range(..=end)
            .rev()
            .map(|(_, interval)| interval)
            .take_while(|interval| interval.end >= start)
            .collect();
        out.reverse();
        out
    }

    /// Inserts an interval that must not intersect any existing one.
    pub fn insert(&mut self, interval: Interval) -> Result<()> {
        if interval.start > interval.end || interval.end > self.max {
            return Err(PoolError::OutOfBounds {
                value: interval.render(),
                bounds: format!("0-{}", self.max),
            });
        }
        if let Some(existing) = self.overlapping(interval.start, interval.end).first() {
            return Err(PoolError::Overlap {
                value: interval.render(),
                existing: existing.render(),
            });
        }
        self.intervals.insert(interval.start, interval);
        Ok(())
    }

    /// Removes every interval matching `pred`, returning them.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<Interval>
    where
        F: FnMut(&Interval) -> bool,
    {
        let keys: Vec<u64> = self
            .intervals
            .values()
            .filter(|interval| pred(interval))
            .map(|interval| interval.start)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.intervals.remove(&key))
            .collect()
    }

    /// Free sub-ranges of `[lo, hi]`, ascending.
    pub fn free_gaps(&self, lo: u64, hi: u64) -> Vec<(u64, u64)> {
        let mut gaps = Vec::new();
        if lo > hi {
            return gaps;
        }
        let mut cursor = lo;
        for interval in self.overlapping(lo, hi) {
            if interval.start > cursor {
                gaps.push((cursor, interval.start - 1));
            }
            match interval.end.checked_add(1) {
                Some(next) if interval.end < hi => cursor = cursor.max(next),
                _ => return gaps,
            }
        }
        gaps.push((cursor, hi));
        gaps
    }

    /// Lowest free id in `[lo, hi]`.
    pub fn first_free(&self, lo: u64, hi: u64) -> Option<u64> {
        let taken = self
            .overlapping(lo, hi)
            .into_iter()
            .map(|interval| (u128::from(interval.start), u128::from(interval.end)));
        addr::first_fit(u128::from(lo), u128::from(hi), 1, taken).map(|id| id as u64)
    }

    /// All intervals, ascending.
    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.values()
    }
}

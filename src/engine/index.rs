use ulid::Ulid;

use crate::model::{BlockingInterval, DateRange};

/// Blocking intervals of one (item, branch), sorted by `range.start`.
#[derive(Debug, Clone, Default)]
pub struct BlockingIndex {
    intervals: Vec<BlockingInterval>,
}

impl BlockingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockingInterval> {
        self.intervals.iter()
    }

    /// Insert interval maintaining sort order by start date.
    pub fn insert(&mut self, interval: BlockingInterval) {
        let pos = self
            .intervals
            .partition_point(|i| i.range.start <= interval.range.start);
        self.intervals.insert(pos, interval);
    }

    /// Remove the interval owned by `reference_id`.
    pub fn remove(&mut self, reference_id: Ulid) -> Option<BlockingInterval> {
        let pos = self
            .intervals
            .iter()
            .position(|i| i.reference_id == reference_id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn get(&self, reference_id: Ulid) -> Option<&BlockingInterval> {
        self.intervals.iter().find(|i| i.reference_id == reference_id)
    }

    /// Intervals sharing at least one calendar day with `query`.
    /// Uses binary search to skip intervals starting after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &BlockingInterval> {
        let right_bound = self.intervals.partition_point(|i| i.range.start <= query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.range.end >= query.start)
    }

    /// Sum of `quantity_held` over every interval intersecting `query`.
    ///
    /// Booking intervals additionally count when they fall within `turnaround_days` of the
    /// query on either side, so consecutive bookings need that many free days between them.
    pub fn overlap_count(&self, query: &DateRange, turnaround_days: u32) -> u32 {
        let widened = query.widen(turnaround_days);
        self.overlapping(&widened)
            .filter(|i| i.kind.is_booking() || i.range.overlaps(query))
            .map(|i| i.quantity_held)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockKind;
    use chrono::NaiveDate;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    fn iv(start: u32, end: u32, qty: u32, kind: BlockKind) -> BlockingInterval {
        BlockingInterval {
            reference_id: Ulid::new(),
            range: DateRange::new(d(start), d(end)),
            quantity_held: qty,
            kind,
        }
    }

    fn booking(start: u32, end: u32, qty: u32) -> BlockingInterval {
        iv(start, end, qty, BlockKind::Booking)
    }

    #[test]
    fn insert_keeps_start_order() {
        let mut idx = BlockingIndex::new();
        idx.insert(booking(20, 22, 1));
        idx.insert(booking(5, 7, 1));
        idx.insert(booking(10, 11, 1));
        idx.insert(booking(10, 30, 1));
        let starts: Vec<_> = idx.iter().map(|i| i.range.start).collect();
        assert_eq!(starts, vec![d(5), d(10), d(10), d(20)]);
    }

    #[test]
    fn remove_by_reference() {
        let mut idx = BlockingIndex::new();
        let a = booking(1, 2, 1);
        let b = booking(3, 4, 1);
        let a_id = a.reference_id;
        idx.insert(a);
        idx.insert(b.clone());
        assert_eq!(idx.remove(a_id).map(|i| i.reference_id), Some(a_id));
        assert!(idx.remove(a_id).is_none());
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.get(b.reference_id), Some(&b));
    }

    #[test]
    fn touching_boundary_overlaps() {
        let mut idx = BlockingIndex::new();
        idx.insert(booking(10, 15, 1));
        assert_eq!(idx.overlap_count(&DateRange::new(d(15), d(20)), 0), 1);
        assert_eq!(idx.overlap_count(&DateRange::new(d(5), d(10)), 0), 1);
        assert_eq!(idx.overlap_count(&DateRange::new(d(16), d(20)), 0), 0);
    }

    #[test]
    fn overlap_count_sums_quantities() {
        let mut idx = BlockingIndex::new();
        idx.insert(booking(1, 2, 1));
        idx.insert(booking(5, 6, 2));
        idx.insert(iv(9, 10, 1, BlockKind::Maintenance));
        idx.insert(booking(20, 25, 4));
        assert_eq!(idx.overlap_count(&DateRange::new(d(1), d(10)), 0), 4);
        assert_eq!(idx.overlap_count(&DateRange::new(d(6), d(6)), 0), 2);
        assert_eq!(idx.overlap_count(&DateRange::new(d(11), d(19)), 0), 0);
    }

    #[test]
    fn long_interval_spanning_query_is_found() {
        let mut idx = BlockingIndex::new();
        idx.insert(booking(1, 31, 1));
        idx.insert(booking(25, 26, 1));
        let hits: Vec<_> = idx.overlapping(&DateRange::new(d(10), d(12))).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range.start, d(1));
    }

    #[test]
    fn turnaround_applies_to_bookings_only() {
        let mut idx = BlockingIndex::new();
        idx.insert(booking(10, 15, 1));
        idx.insert(iv(20, 21, 1, BlockKind::Hygiene));
        // 16..18 is one day after the booking ends
        let q = DateRange::new(d(16), d(18));
        assert_eq!(idx.overlap_count(&q, 0), 0);
        assert_eq!(idx.overlap_count(&q, 1), 1);
        // Hygiene hold at 20 is two days away, never widened
        assert_eq!(idx.overlap_count(&q, 2), 1);
    }

    #[test]
    fn empty_index() {
        let idx = BlockingIndex::new();
        assert!(idx.is_empty());
        assert_eq!(idx.overlap_count(&DateRange::new(d(1), d(31)), 3), 0);
    }
}

//! Min-priority queue used as the Dijkstra frontier
//!
//! A `BinaryHeap` of reversed entries. Storage grows by doubling; an optional hard cap turns
//! growth past the cap into [`Error::QueueFull`] instead.

use log::debug;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::{Distance, Error, GridPoint, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
    pub priority: Distance,
    pub point: GridPoint,
}

impl QueueEntry {
    pub const fn new(priority: Distance, point: GridPoint) -> Self {
        Self { priority, point }
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap; ties broken on the point so pops are deterministic
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.point.cmp(&self.point))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueueStats {
    pub inserts: u64,
    pub extracts: u64,
    pub peak_len: usize,
    pub grow_events: u32,
}

pub struct PriorityQueue {
    heap: BinaryHeap<QueueEntry>,
    max_entries: Option<usize>,
    stats: QueueStats,
}

impl PriorityQueue {
    pub fn new(initial_capacity: usize, max_entries: Option<usize>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(initial_capacity.max(1)),
            max_entries,
            stats: QueueStats::default(),
        }
    }

    pub fn unbounded(initial_capacity: usize) -> Self {
        Self::new(initial_capacity, None)
    }

    pub fn insert(&mut self, priority: Distance, point: GridPoint) -> Result<()> {
        let len = self.heap.len();
        if let Some(cap) = self.max_entries {
            if len >= cap {
                return Err(Error::QueueFull { capacity: cap });
            }
        }
        if len == self.heap.capacity() {
            let mut grow = len.max(1);
            if let Some(cap) = self.max_entries {
                grow = grow.min(cap - len);
            }
            self.heap.reserve_exact(grow);
            self.stats.grow_events += 1;
            debug!("priority queue grown to {} entries", self.heap.capacity());
        }
        self.heap.push(QueueEntry::new(priority, point));
        self.stats.inserts += 1;
        self.stats.peak_len = self.stats.peak_len.max(self.heap.len());
        Ok(())
    }

    pub fn extract_min(&mut self) -> Option<QueueEntry> {
        let entry = self.heap.pop();
        if entry.is_some() {
            self.stats.extracts += 1;
        }
        entry
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry but keep the allocation for the next search
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_extracts_in_priority_order() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut pq = PriorityQueue::unbounded(4);
        let mut expected = Vec::new();
        for i in 0..500u32 {
            let p: f32 = rng.random_range(0.0..1000.0);
            pq.insert(p, GridPoint::new(i, 0)).unwrap();
            expected.push(p);
        }
        expected.sort_by(|a, b| a.total_cmp(b));
        let got: Vec<f32> = std::iter::from_fn(|| pq.extract_min().map(|e| e.priority)).collect();
        assert_eq!(got, expected);
        assert!(pq.stats().grow_events > 0);
        assert_eq!(pq.stats().peak_len, 500);
    }

    #[test]
    fn test_equal_priorities_pop_row_major() {
        let mut pq = PriorityQueue::unbounded(8);
        pq.insert(1.0, GridPoint::new(2, 0)).unwrap();
        pq.insert(1.0, GridPoint::new(0, 3)).unwrap();
        pq.insert(0.5, GridPoint::new(9, 9)).unwrap();
        assert_eq!(pq.extract_min().unwrap().point, GridPoint::new(9, 9));
        assert_eq!(pq.extract_min().unwrap().point, GridPoint::new(0, 3));
        assert_eq!(pq.extract_min().unwrap().point, GridPoint::new(2, 0));
        assert!(pq.extract_min().is_none());
    }

    #[test]
    fn test_hard_cap() {
        let mut pq = PriorityQueue::new(1, Some(3));
        for i in 0..3 {
            pq.insert(i as f32, GridPoint::new(0, i)).unwrap();
        }
        let err = pq.insert(9.0, GridPoint::new(1, 1)).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 3 }));
        pq.extract_min();
        assert!(pq.insert(9.0, GridPoint::new(1, 1)).is_ok());
    }

    #[test]
    fn test_clear_keeps_stats() {
        let mut pq = PriorityQueue::unbounded(2);
        pq.insert(1.0, GridPoint::new(0, 0)).unwrap();
        pq.clear();
        assert!(pq.is_empty());
        assert_eq!(pq.stats().inserts, 1);
    }
}

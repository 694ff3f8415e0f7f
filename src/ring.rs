//! Free-lane pool
//!
//! Lanes are handed out smallest-first so the rendered graph stays as narrow
//! as possible. Lanes at or above the high-water mark are implicitly free.
//! Below it, released lanes sit in an ordered set until they are reused.

use std::collections::BTreeSet;

use crate::types::Lane;

/// Smallest-free lane allocator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneRing {
    /// Released lanes below `next`
    free: BTreeSet<Lane>,
    /// First lane never handed out (or handed back from the top)
    next: Lane,
    /// Widest the ring has been
    peak: usize,
}

impl LaneRing {
    /// Create an empty ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the smallest lane not currently in use
    pub fn allocate(&mut self) -> Lane {
        self.allocate_excluding(&[])
    }

    /// Take the smallest free lane that is not in `excluded`
    ///
    /// Skipped lanes above the high-water mark stay free.
    pub fn allocate_excluding(&mut self, excluded: &[Lane]) -> Lane {
        let reusable = self
            .free
            .iter()
            .copied()
            .find(|lane| !excluded.contains(lane));
        let lane = match reusable {
            Some(lane) => {
                self.free.remove(&lane);
                lane
            }
            None => {
                let mut lane = self.next;
                while excluded.contains(&lane) {
                    lane += 1;
                }
                self.free.extend(self.next..lane);
                self.next = lane + 1;
                lane
            }
        };
        self.peak = self.peak.max(self.in_use());
        lane
    }

    /// Return a lane to the pool
    ///
    /// # Panics
    ///
    /// Panics if the lane is not currently allocated. A double release means
    /// two wires believed they owned the same column.
    pub fn release(&mut self, lane: Lane) {
        assert!(
            self.is_allocated(lane),
            "lane {} released while not allocated",
            lane
        );
        self.free.insert(lane);
        while self.next > 0 && self.free.remove(&(self.next - 1)) {
            self.next -= 1;
        }
    }

    /// Whether `lane` is currently handed out
    pub fn is_allocated(&self, lane: Lane) -> bool {
        lane < self.next && !self.free.contains(&lane)
    }

    /// Number of lanes currently handed out
    pub fn in_use(&self) -> usize {
        self.next as usize - self.free.len()
    }

    /// Highest number of simultaneously allocated lanes
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Allocated lanes in ascending order
    pub fn allocated(&self) -> impl Iterator<Item = Lane> + '_ {
        (0..self.next).filter(move |lane| !self.free.contains(lane))
    }

    /// Forget every allocation
    pub fn clear(&mut self) {
        self.free.clear();
        self.next = 0;
        self.peak = 0;
    }
}

//! Event index for fast row queries
//!
//! This module provides the `EventIndex` struct which keeps periodic
//! checkpoints over the sparse event log of the layout builder. A checkpoint
//! stores the set of lanes entering its row plus every merge whose parent
//! wires are still open there, so a query never replays more than one
//! checkpoint interval of events.
//!
//! A checkpoint cannot answer merge queries until the end row of each of its
//! open merges is known. Until then it waits in a not-ready map, filed under
//! every merge it still lacks an end for, and is promoted the moment the last
//! of those ends is scanned. Sealing the index (every source
//! exhausted) promotes whatever is left, with unknown ends staying `None`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, trace};

use crate::layout::RowEvent;
use crate::types::{Lane, Row};

/// A merge commit whose parent wires are still open at some row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MergeSpan {
    /// Row of the merge commit
    pub child: Row,
    /// Lane of the merge commit
    pub lane: Lane,
    /// Row where the last parent wire lands, if known
    pub end: Option<Row>,
}

/// Replay state captured at one row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Row the checkpoint describes
    pub row: Row,
    /// Lanes entering `row`
    pub active: BTreeSet<Lane>,
    /// Merges above `row` still open when it is entered, ordered by child row
    pub merge_spans: Vec<MergeSpan>,
}

impl Checkpoint {
    fn empty(row: Row) -> Self {
        Self {
            row,
            active: BTreeSet::new(),
            merge_spans: Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        self.merge_spans.iter().all(|span| span.end.is_some())
    }
}

/// Periodic checkpoints over a sparse event log
///
/// The index does not own the events. Every call takes the builder's event
/// slice, which must be the same log the index was extended with.
#[derive(Debug)]
pub struct EventIndex {
    frequency: usize,
    ready: BTreeMap<Row, Checkpoint>,
    not_ready: BTreeMap<Row, Checkpoint>,
    /// Merge child row to the not-ready checkpoints missing its end
    waiting_on: BTreeMap<Row, Vec<Row>>,
    merge_ends: BTreeMap<Row, Row>,
    entering: BTreeSet<Lane>,
    open_merges: BTreeMap<Row, Lane>,
    scanned_row: Row,
    next_checkpoint: Row,
    sealed: bool,
}

impl EventIndex {
    /// Create an index with a checkpoint every `frequency` rows
    pub fn new(frequency: usize) -> Self {
        let frequency = frequency.max(1);
        let mut ready = BTreeMap::new();
        ready.insert(0, Checkpoint::empty(0));
        Self {
            frequency,
            ready,
            not_ready: BTreeMap::new(),
            waiting_on: BTreeMap::new(),
            merge_ends: BTreeMap::new(),
            entering: BTreeSet::new(),
            open_merges: BTreeMap::new(),
            scanned_row: 0,
            next_checkpoint: frequency as Row,
            sealed: false,
        }
    }

    /// Scan events up to `frontier` and cut the checkpoints that became due
    ///
    /// # Arguments
    ///
    /// * `events` - The builder's full event log
    /// * `frontier` - Number of rows consumed so far
    pub fn extend(&mut self, events: &[RowEvent], frontier: Row) {
        debug_assert!(frontier >= self.scanned_row, "index frontier moved backwards");
        let start = events.partition_point(|event| event.row < self.scanned_row);

        for event in &events[start..] {
            if event.row >= frontier {
                break;
            }
            while self.next_checkpoint <= event.row {
                self.cut_checkpoint();
            }
            event.apply(&mut self.entering);
            for end in &event.merge_ends {
                self.open_merges.remove(&end.child);
                self.merge_ends.insert(end.child, event.row);
                self.resolve(end.child, event.row);
            }
            if event.opens_merge() {
                self.open_merges.insert(event.row, event.lane);
            }
        }
        while self.next_checkpoint <= frontier {
            self.cut_checkpoint();
        }
        self.scanned_row = frontier;
    }

    /// Promote every waiting checkpoint; no more events will arrive
    pub fn seal(&mut self) {
        self.ready.append(&mut self.not_ready);
        self.waiting_on.clear();
        self.sealed = true;
        debug!("Sealed event index with {} checkpoints", self.ready.len());
    }

    /// Lanes drawn on `row`: the entering lanes plus any lane started there
    pub fn active_lanes_at(&self, events: &[RowEvent], row: Row) -> BTreeSet<Lane> {
        let (mut lanes, start) = match self.ready.range(..=row).next_back() {
            Some((_, checkpoint)) => (
                checkpoint.active.clone(),
                events.partition_point(|event| event.row < checkpoint.row),
            ),
            None => (BTreeSet::new(), 0),
        };

        for event in &events[start..] {
            if event.row > row {
                break;
            }
            if event.row == row {
                lanes.extend(event.started.iter().copied());
                break;
            }
            event.apply(&mut lanes);
        }
        lanes
    }

    /// Merges above `row` whose parent wires are still open entering it
    pub fn merge_spans_at(&self, events: &[RowEvent], row: Row) -> Vec<MergeSpan> {
        let still_open = |span: &MergeSpan| span.end.map_or(true, |end| end >= row);
        let (mut spans, start) = match self.ready.range(..=row).next_back() {
            Some((_, checkpoint)) => (
                checkpoint
                    .merge_spans
                    .iter()
                    .copied()
                    .filter(still_open)
                    .collect::<Vec<_>>(),
                events.partition_point(|event| event.row < checkpoint.row),
            ),
            None => (Vec::new(), 0),
        };

        for event in &events[start..] {
            if event.row >= row {
                break;
            }
            if event.opens_merge() {
                let span = MergeSpan {
                    child: event.row,
                    lane: event.lane,
                    end: self.merge_ends.get(&event.row).copied(),
                };
                if still_open(&span) {
                    spans.push(span);
                }
            }
        }
        spans
    }

    /// Forget everything derived from rows at or after `row`
    ///
    /// The next [`EventIndex::extend`] rescans from the newest surviving
    /// checkpoint, which is at or before `row`.
    pub fn recompute_from(&mut self, row: Row) {
        let _ = self.ready.split_off(&row);
        let _ = self.not_ready.split_off(&row);
        self.merge_ends.retain(|_, end| *end < row);

        // Sealed checkpoints may hold ends that a rescan can still supply.
        let demoted: Vec<Row> = self
            .ready
            .values()
            .filter(|checkpoint| {
                checkpoint
                    .merge_spans
                    .iter()
                    .any(|span| span.end.map_or(true, |end| end >= row))
            })
            .map(|checkpoint| checkpoint.row)
            .collect();
        for key in demoted {
            if let Some(checkpoint) = self.ready.remove(&key) {
                self.not_ready.insert(key, checkpoint);
            }
        }
        for checkpoint in self.not_ready.values_mut() {
            for span in &mut checkpoint.merge_spans {
                if span.end.is_some_and(|end| end >= row) {
                    span.end = None;
                }
            }
        }
        self.waiting_on.clear();
        for checkpoint in std::mem::take(&mut self.not_ready).into_values() {
            self.park(checkpoint);
        }
        self.ready.entry(0).or_insert_with(|| Checkpoint::empty(0));

        let restart = self
            .ready
            .values()
            .chain(self.not_ready.values())
            .max_by_key(|checkpoint| checkpoint.row)
            .cloned()
            .unwrap_or_else(|| Checkpoint::empty(0));
        self.entering = restart.active;
        self.open_merges = restart
            .merge_spans
            .iter()
            .map(|span| (span.child, span.lane))
            .collect();
        self.scanned_row = restart.row;
        self.next_checkpoint = restart.row + self.frequency as Row;
        self.sealed = false;

        debug!(
            "Index recompute from row {}: rescanning from checkpoint {}",
            row, restart.row
        );
    }

    /// Drop every checkpoint except the empty one at row 0
    pub fn clear(&mut self) {
        *self = Self::new(self.frequency);
    }

    /// Ready checkpoints
    pub fn checkpoint_count(&self) -> usize {
        self.ready.len()
    }

    /// Checkpoints waiting for merge ends
    pub fn not_ready_count(&self) -> usize {
        self.not_ready.len()
    }

    /// Ready checkpoint at exactly `row`
    pub fn checkpoint(&self, row: Row) -> Option<&Checkpoint> {
        self.ready.get(&row)
    }

    /// Whether [`EventIndex::seal`] ran since the last recompute
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn cut_checkpoint(&mut self) {
        let row = self.next_checkpoint;
        let checkpoint = Checkpoint {
            row,
            active: self.entering.clone(),
            merge_spans: self
                .open_merges
                .iter()
                .map(|(child, lane)| MergeSpan {
                    child: *child,
                    lane: *lane,
                    end: None,
                })
                .collect(),
        };
        trace!(
            "Checkpoint at row {}: {} lanes, {} open merges",
            row,
            checkpoint.active.len(),
            checkpoint.merge_spans.len()
        );
        self.park(checkpoint);
        self.next_checkpoint += self.frequency as Row;
    }

    /// File a checkpoint as ready, or under every merge end it is missing
    fn park(&mut self, checkpoint: Checkpoint) {
        if checkpoint.is_ready() {
            self.ready.insert(checkpoint.row, checkpoint);
            return;
        }
        for span in checkpoint.merge_spans.iter().filter(|span| span.end.is_none()) {
            self.waiting_on.entry(span.child).or_default().push(checkpoint.row);
        }
        self.not_ready.insert(checkpoint.row, checkpoint);
    }

    /// Record the end of merge `child` on the checkpoints waiting for it
    fn resolve(&mut self, child: Row, end: Row) {
        let Some(rows) = self.waiting_on.remove(&child) else {
            return;
        };
        for row in rows {
            let Some(checkpoint) = self.not_ready.get_mut(&row) else {
                continue;
            };
            for span in checkpoint.merge_spans.iter_mut().filter(|span| span.child == child) {
                span.end = Some(end);
            }
            if checkpoint.is_ready() {
                if let Some(checkpoint) = self.not_ready.remove(&row) {
                    trace!("Promoted checkpoint at row {}", row);
                    self.ready.insert(row, checkpoint);
                }
            }
        }
    }
}

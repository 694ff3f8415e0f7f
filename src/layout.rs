//! Lane layout builder
//!
//! Consumes the merged commit stream one row at a time and assigns every
//! commit a lane, recording a [`RowEvent`] wherever the lane structure
//! changes. History arrives newest first, so a commit is always seen before
//! its parents: each consumed commit leaves one pending waiter per parent,
//! and the parent picks those waiters up when it arrives.
//!
//! ## Lane ownership
//!
//! A lane belongs to exactly one commit at a time. A commit keeps its lane
//! until the first of its parents shows up; that parent inherits the lane
//! (the *carried* edge). Any further parent edges of a merge commit are
//! *fresh* edges: no lane is reserved for them, and the parent they land on
//! gets a lane of its own. When several children converge on one parent,
//! the lowest child row hands over its lane and the other carried lanes end.
//!
//! ```text
//!   row 0  C1   *        lane 0 starts
//!   row 1  C2   *        merge: parents C3, C4
//!   row 2  C3   *        inherits lane 0 (carried), root: lane 0 ends
//!   row 3  C4     *      fresh edge from C2, lane 1 starts and ends
//! ```
//!
//! ## Replay rule
//!
//! `entering(r + 1) = entering(r) ∪ started(r) − ended(r)` and the lanes
//! drawn on row `r` are `entering(r) ∪ started(r)`. See [`RowEvent::apply`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, info, trace};

use crate::id::CommitId;
use crate::pending::{PendingParents, Waiter};
use crate::ring::LaneRing;
use crate::types::{Commit, Lane, Row};

/// How a child edge reached the row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EdgeKind {
    /// The edge rode the child's lane down to this row
    Carried,
    /// The child's lane was already taken; the edge lands without one
    Fresh,
}

/// A child edge converging into a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Incoming {
    /// Row of the child commit
    pub child: Row,
    /// Lane of the child commit
    pub lane: Lane,
    /// Whether the edge carried the child's lane
    pub kind: EdgeKind,
}

/// Marker that every parent wire of a merge commit has now landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MergeEnd {
    /// Row of the merge commit
    pub child: Row,
    /// Lane of the merge commit
    pub lane: Lane,
}

/// Structural change attached to one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowEvent {
    /// Row the event belongs to
    pub row: Row,
    /// Lane of the commit at this row
    pub lane: Lane,
    /// Number of parents the commit lists
    pub parent_count: u32,
    /// No loaded child references this commit
    pub is_start: bool,
    /// The commit has no parents
    pub is_end: bool,
    /// Lanes allocated at this row
    pub started: SmallVec<[Lane; 1]>,
    /// Lanes released at this row
    pub ended: SmallVec<[Lane; 2]>,
    /// Every child edge converging here, ordered by child row
    pub incoming: SmallVec<[Incoming; 2]>,
    /// Merge commits whose last parent wire ends here
    pub merge_ends: SmallVec<[MergeEnd; 1]>,
}

impl RowEvent {
    /// Whether the commit opens more than one parent wire
    pub fn opens_merge(&self) -> bool {
        self.parent_count > 1
    }

    /// Move an entering-lane set past this row
    pub fn apply(&self, entering: &mut BTreeSet<Lane>) {
        entering.extend(self.started.iter().copied());
        for lane in &self.ended {
            entering.remove(lane);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenChild {
    /// Parents not consumed yet
    remaining: u32,
    /// Parents listed in total
    parents: u32,
    /// The child still owns its lane (no parent inherited it yet)
    lane_open: bool,
}

#[derive(Debug, Clone)]
struct Snapshot {
    row: Row,
    event_len: usize,
    ring: LaneRing,
    pending: PendingParents,
    open: BTreeMap<Row, OpenChild>,
}

/// Incremental lane assignment over a row-ordered stream
///
/// Not safe for concurrent `consume` calls; the owning graph serializes its
/// single writer.
#[derive(Debug)]
pub struct LaneLayoutBuilder {
    ring: LaneRing,
    pending: PendingParents,
    open: BTreeMap<Row, OpenChild>,
    lanes: Vec<Lane>,
    events: Vec<RowEvent>,
    tail_releases: Vec<(Row, Lane)>,
    finished: bool,
    snapshots: Vec<Snapshot>,
    snapshot_every: usize,
}

impl LaneLayoutBuilder {
    /// Create a builder that keeps a rewind snapshot every `snapshot_every` rows
    pub fn new(snapshot_every: usize) -> Self {
        Self {
            ring: LaneRing::new(),
            pending: PendingParents::new(),
            open: BTreeMap::new(),
            lanes: Vec::new(),
            events: Vec::new(),
            tail_releases: Vec::new(),
            finished: false,
            snapshots: Vec::new(),
            snapshot_every: snapshot_every.max(1),
        }
    }

    /// Lay out the commit at `row`
    ///
    /// Returns the lane assigned to the commit.
    ///
    /// # Panics
    ///
    /// Panics if `row` is not the next unconsumed row, or if the builder was
    /// already finished. Both mean the writer broke its contract, and lane
    /// state would be corrupt if consumption continued.
    pub fn consume(&mut self, row: Row, commit: &Commit) -> Lane {
        assert_eq!(
            row as usize,
            self.lanes.len(),
            "row {} consumed out of order (next row is {})",
            row,
            self.lanes.len()
        );
        assert!(!self.finished, "row {} consumed after the stream was finished", row);

        if row as usize % self.snapshot_every == 0
            && self.snapshots.last().map_or(true, |snapshot| snapshot.row < row)
        {
            self.snapshots.push(Snapshot {
                row,
                event_len: self.events.len(),
                ring: self.ring.clone(),
                pending: self.pending.clone(),
                open: self.open.clone(),
            });
        }

        let waiters = self.pending.take(&commit.id);
        let mut incoming: SmallVec<[Incoming; 2]> = SmallVec::new();
        let mut started = SmallVec::new();
        let mut ended = SmallVec::new();
        let mut merge_ends = SmallVec::new();
        let mut inherited = None;

        for Waiter { child, .. } in waiters.iter().copied() {
            let child_lane = self.lanes[child as usize];
            let state = self
                .open
                .get_mut(&child)
                .expect("pending waiter without an open child");

            let kind = if state.lane_open {
                state.lane_open = false;
                if inherited.is_none() {
                    inherited = Some(child_lane);
                } else {
                    self.ring.release(child_lane);
                    ended.push(child_lane);
                }
                EdgeKind::Carried
            } else {
                EdgeKind::Fresh
            };

            assert!(state.remaining > 0, "child {} has no parents left to resolve", child);
            state.remaining -= 1;
            if state.remaining == 0 {
                let parents = state.parents;
                self.open.remove(&child);
                if parents > 1 {
                    merge_ends.push(MergeEnd {
                        child,
                        lane: child_lane,
                    });
                }
            }

            incoming.push(Incoming {
                child,
                lane: child_lane,
                kind,
            });
        }

        let lane = match inherited {
            Some(lane) => lane,
            None => {
                // A fresh edge never lands on the lane of the merge it came from.
                let excluded: SmallVec<[Lane; 2]> = incoming.iter().map(|edge| edge.lane).collect();
                let lane = self.ring.allocate_excluding(&excluded);
                started.push(lane);
                lane
            }
        };

        let is_start = waiters.is_empty();
        let is_end = commit.parents.is_empty();
        if is_end {
            self.ring.release(lane);
            ended.push(lane);
        } else {
            for (index, parent) in commit.parents.iter().enumerate() {
                self.pending.insert(
                    *parent,
                    Waiter {
                        child: row,
                        parent_index: index as u32,
                    },
                );
            }
            self.open.insert(
                row,
                OpenChild {
                    remaining: commit.parents.len() as u32,
                    parents: commit.parents.len() as u32,
                    lane_open: true,
                },
            );
        }
        self.lanes.push(lane);

        let plain_continuation = commit.parents.len() == 1
            && incoming.len() == 1
            && incoming[0].kind == EdgeKind::Carried
            && merge_ends.is_empty();
        if !plain_continuation {
            trace!(
                "Row {} ({}) on lane {}: started {:?}, ended {:?}",
                row,
                commit.id.short(),
                lane,
                started,
                ended
            );
            self.events.push(RowEvent {
                row,
                lane,
                parent_count: commit.parents.len() as u32,
                is_start,
                is_end,
                started,
                ended,
                incoming,
                merge_ends,
            });
        }

        lane
    }

    /// Release lanes still held for parents that will never arrive
    ///
    /// Call once every source is exhausted and every row is consumed. The
    /// pending entries themselves are kept so [`LaneLayoutBuilder::unresolved`]
    /// can still report them. Calling it again is a no-op.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        for (row, state) in self.open.iter_mut() {
            if state.lane_open {
                let lane = self.lanes[*row as usize];
                self.ring.release(lane);
                self.tail_releases.push((*row, lane));
                state.lane_open = false;
            }
        }
        self.finished = true;
        info!(
            "Layout finished: {} rows, {} events, {} dangling lanes released",
            self.lanes.len(),
            self.events.len(),
            self.tail_releases.len()
        );
    }

    /// Roll back to the newest snapshot at or before `row`
    ///
    /// Returns the row consumption has to restart from, which may be lower
    /// than `row`.
    pub fn rewind(&mut self, row: Row) -> Row {
        if row as usize >= self.lanes.len() && !self.finished {
            return self.lanes.len() as Row;
        }

        let keep = self.snapshots.partition_point(|snapshot| snapshot.row <= row);
        self.snapshots.truncate(keep);
        match self.snapshots.last() {
            Some(snapshot) => {
                self.ring = snapshot.ring.clone();
                self.pending = snapshot.pending.clone();
                self.open = snapshot.open.clone();
                self.events.truncate(snapshot.event_len);
                self.lanes.truncate(snapshot.row as usize);
            }
            None => {
                self.ring.clear();
                self.pending.clear();
                self.open.clear();
                self.events.clear();
                self.lanes.clear();
            }
        }
        self.tail_releases.clear();
        self.finished = false;

        let restart = self.lanes.len() as Row;
        debug!("Rewound layout to row {} (requested {})", restart, row);
        restart
    }

    /// Drop all state
    pub fn clear(&mut self) {
        self.ring.clear();
        self.pending.clear();
        self.open.clear();
        self.lanes.clear();
        self.events.clear();
        self.tail_releases.clear();
        self.snapshots.clear();
        self.finished = false;
    }

    /// Rows consumed so far
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Whether nothing has been consumed
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Whether [`LaneLayoutBuilder::finish`] has run
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Lane of a consumed row
    pub fn lane_of(&self, row: Row) -> Option<Lane> {
        self.lanes.get(row as usize).copied()
    }

    /// Lanes of all consumed rows
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Structural events in row order
    pub fn events(&self) -> &[RowEvent] {
        &self.events
    }

    /// Event recorded at `row`, if the row is structural
    pub fn event_at(&self, row: Row) -> Option<&RowEvent> {
        let index = self.events.partition_point(|event| event.row < row);
        self.events.get(index).filter(|event| event.row == row)
    }

    /// Lanes released by [`LaneLayoutBuilder::finish`], with their owning rows
    pub fn tail_releases(&self) -> &[(Row, Lane)] {
        &self.tail_releases
    }

    /// Lanes currently allocated
    pub fn lanes_in_use(&self) -> usize {
        self.ring.in_use()
    }

    /// Allocated lanes in ascending order
    pub fn allocated_lanes(&self) -> Vec<Lane> {
        self.ring.allocated().collect()
    }

    /// Widest the layout has been
    pub fn peak_lanes(&self) -> usize {
        self.ring.peak()
    }

    /// Consumed commits still holding their lane for an unseen parent
    pub fn open_lineages(&self) -> usize {
        self.open.values().filter(|state| state.lane_open).count()
    }

    /// Parent ids referenced but not consumed, sorted
    pub fn unresolved(&self) -> Vec<CommitId> {
        let mut ids: Vec<CommitId> = self.pending.ids().copied().collect();
        ids.sort_by_key(|id| id.to_string());
        ids
    }

    /// Number of distinct parent ids still awaited
    pub fn unresolved_count(&self) -> usize {
        self.pending.key_count()
    }

    /// Parent edges registered but not landed yet
    pub fn pending_edges(&self) -> usize {
        self.pending.waiter_count()
    }

    /// Child rows waiting for `id`
    pub fn waiting_for(&self, id: &CommitId) -> Vec<Row> {
        self.pending.peek(id).into_iter().map(|waiter| waiter.child).collect()
    }
}

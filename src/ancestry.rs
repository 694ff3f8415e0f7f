//! Ancestor tracking
//!
//! Answers "is this row an ancestor of the focused commit?" while the graph
//! is still loading. The tracker walks forward from the focus row exactly
//! once, and the walk is resumed whenever more rows are laid out. A query for
//! a row below the cursor is answered from the recorded marks.
//!
//! ## How the walk decides
//!
//! The walk keeps the set of lanes currently owned by ancestors plus the
//! merge commits among the ancestors whose parent wires have not all landed.
//! A row is an ancestor when:
//!
//! - a carried edge reaches it on an included lane, or
//! - a fresh edge reaches it from an ancestor merge.
//!
//! Nothing is ever added speculatively: a lane joins the set only when its
//! owner is known to be an ancestor. When the set and the merge table are
//! both empty no later row can be an ancestor and the tracker stops.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::Serialize;
use tracing::{debug, trace};

use crate::collections::HashMap;
use crate::id::CommitId;
use crate::layout::{EdgeKind, LaneLayoutBuilder, RowEvent};
use crate::types::{Lane, Row};

/// Read access the tracker needs from a laid-out graph
pub trait GraphView {
    /// Rows laid out so far
    fn frontier(&self) -> Row;

    /// Whether every source is exhausted and every row laid out
    fn is_complete(&self) -> bool;

    /// Lane of a laid-out row
    fn lane_of(&self, row: Row) -> Option<Lane>;

    /// Structural event of a row, if it has one
    fn event_at(&self, row: Row) -> Option<&RowEvent>;

    /// Row of a loaded commit
    fn row_of(&self, id: &CommitId) -> Option<Row>;
}

/// Borrowed view over the layout builder and the id map
#[derive(Debug, Clone, Copy)]
pub struct LayoutView<'a> {
    /// Layout state
    pub builder: &'a LaneLayoutBuilder,
    /// Commit id to row
    pub rows: &'a HashMap<CommitId, Row>,
    /// Whether the stream is finished
    pub complete: bool,
}

impl GraphView for LayoutView<'_> {
    fn frontier(&self) -> Row {
        self.builder.len() as Row
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn lane_of(&self, row: Row) -> Option<Lane> {
        self.builder.lane_of(row)
    }

    fn event_at(&self, row: Row) -> Option<&RowEvent> {
        self.builder.event_at(row)
    }

    fn row_of(&self, id: &CommitId) -> Option<Row> {
        self.rows.get(id).copied()
    }
}

/// Lifecycle of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackerState {
    /// No focus commit
    Uninitialized,
    /// Focus set but its row is not loaded yet
    Locating,
    /// Walking forward from the focus row
    Active,
    /// No further row can be an ancestor
    Exhausted,
    /// Tracking is off; every row counts as included
    Dumb,
}

/// Incremental ancestor walk from a focus commit
#[derive(Debug)]
pub struct AncestorTracker {
    state: TrackerState,
    focus: Option<CommitId>,
    focus_row: Option<Row>,
    cursor: Row,
    lanes: BTreeSet<Lane>,
    merges: BTreeSet<Row>,
    marks: Vec<bool>,
}

impl Default for AncestorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AncestorTracker {
    /// Create a tracker without a focus
    pub fn new() -> Self {
        Self {
            state: TrackerState::Uninitialized,
            focus: None,
            focus_row: None,
            cursor: 0,
            lanes: BTreeSet::new(),
            merges: BTreeSet::new(),
            marks: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Focused commit, if any
    pub fn focus(&self) -> Option<CommitId> {
        self.focus
    }

    /// Row of the focused commit once located
    pub fn focus_row(&self) -> Option<Row> {
        self.focus_row
    }

    /// Focus a commit and start over
    pub fn set_focus(&mut self, id: CommitId) {
        debug!("Ancestor focus set to {}", id.short());
        self.focus = Some(id);
        if self.state != TrackerState::Dumb {
            self.restart();
        }
    }

    /// Drop the focus and every mark
    pub fn reset(&mut self) {
        self.focus = None;
        self.state = TrackerState::Uninitialized;
        self.clear_walk();
    }

    /// Drop the focus; a disabled tracker stays [`TrackerState::Dumb`]
    pub fn clear_focus(&mut self) {
        if self.state == TrackerState::Dumb {
            self.focus = None;
        } else {
            self.reset();
        }
    }

    /// Stop tracking; every row is reported as included
    pub fn disable(&mut self) {
        self.clear_walk();
        self.state = TrackerState::Dumb;
    }

    /// Leave [`TrackerState::Dumb`] and resume with the current focus
    pub fn enable(&mut self) {
        if self.state == TrackerState::Dumb {
            self.restart();
        }
    }

    /// Walk forward until `row` is decided or the laid-out rows run out
    pub fn advance_to<V: GraphView>(&mut self, view: &V, row: Row) {
        if self.state == TrackerState::Locating {
            let located = self.focus.as_ref().and_then(|id| view.row_of(id));
            match located {
                Some(focus_row) => {
                    trace!("Focus located at row {}", focus_row);
                    self.focus_row = Some(focus_row);
                    self.cursor = focus_row;
                    self.state = TrackerState::Active;
                }
                None => return,
            }
        }

        let frontier = view.frontier();
        let stop = row.saturating_add(1).min(frontier);
        while self.state == TrackerState::Active && self.cursor < stop {
            self.step(view, self.cursor);
            self.cursor += 1;
        }
        if self.state == TrackerState::Active && self.cursor >= frontier && view.is_complete() {
            debug!("Ancestor walk reached the end of the stream at row {}", self.cursor);
            self.state = TrackerState::Exhausted;
        }
    }

    /// Whether the commit `id` is an ancestor of the focus (the focus included)
    ///
    /// Commits that are not loaded yet are not ancestors.
    pub fn is_ancestor<V: GraphView>(&mut self, view: &V, id: &CommitId) -> bool {
        if self.state == TrackerState::Dumb {
            return true;
        }
        match view.row_of(id) {
            Some(row) => {
                self.advance_to(view, row);
                self.mark(row)
            }
            None => false,
        }
    }

    /// Ancestor flags for every row of `range`
    pub fn included<V: GraphView>(&mut self, view: &V, range: Range<Row>) -> Vec<bool> {
        if self.state == TrackerState::Dumb {
            return vec![true; range.len()];
        }
        if range.end > range.start {
            self.advance_to(view, range.end - 1);
        }
        range.map(|row| self.mark(row)).collect()
    }

    /// Discard marks that may depend on rows at or after `row`
    ///
    /// If the focus row itself moved, the focus has to be located again.
    pub fn invalidate_from(&mut self, row: Row) {
        match (self.state, self.focus_row) {
            (TrackerState::Dumb | TrackerState::Uninitialized | TrackerState::Locating, _) => {}
            (_, Some(focus_row)) if row <= focus_row => self.restart(),
            (TrackerState::Exhausted, Some(_)) => self.restart_at_focus(),
            (_, Some(_)) if row < self.cursor => self.restart_at_focus(),
            _ => {}
        }
    }

    fn restart(&mut self) {
        self.clear_walk();
        self.state = if self.focus.is_some() {
            TrackerState::Locating
        } else {
            TrackerState::Uninitialized
        };
    }

    fn restart_at_focus(&mut self) {
        let focus_row = self.focus_row;
        self.clear_walk();
        if let Some(focus_row) = focus_row {
            trace!("Restarting ancestor walk at focus row {}", focus_row);
            self.focus_row = Some(focus_row);
            self.cursor = focus_row;
            self.state = TrackerState::Active;
        }
    }

    fn clear_walk(&mut self) {
        self.focus_row = None;
        self.cursor = 0;
        self.lanes.clear();
        self.merges.clear();
        self.marks.clear();
    }

    fn mark(&self, row: Row) -> bool {
        match self.focus_row {
            Some(focus_row) if row >= focus_row => self
                .marks
                .get((row - focus_row) as usize)
                .copied()
                .unwrap_or(false),
            _ => false,
        }
    }

    fn step<V: GraphView>(&mut self, view: &V, row: Row) {
        let is_focus = self.focus_row == Some(row);
        let ancestor = match view.event_at(row) {
            Some(event) => {
                let reached = event.incoming.iter().any(|edge| match edge.kind {
                    EdgeKind::Carried => self.lanes.contains(&edge.lane),
                    EdgeKind::Fresh => self.merges.contains(&edge.child),
                });
                let ancestor = is_focus || reached;

                for end in &event.merge_ends {
                    self.merges.remove(&end.child);
                }
                for lane in &event.ended {
                    self.lanes.remove(lane);
                }
                if ancestor {
                    if !event.is_end {
                        self.lanes.insert(event.lane);
                    }
                    if event.opens_merge() {
                        self.merges.insert(row);
                    }
                }
                ancestor
            }
            None => match view.lane_of(row) {
                Some(lane) if is_focus => {
                    self.lanes.insert(lane);
                    true
                }
                Some(lane) => self.lanes.contains(&lane),
                None => false,
            },
        };
        self.marks.push(ancestor);

        if self.lanes.is_empty() && self.merges.is_empty() {
            debug!("Ancestor walk exhausted at row {}", row);
            self.state = TrackerState::Exhausted;
        }
    }
}

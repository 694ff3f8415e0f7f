//! Commit graph facade
//!
//! This module provides the [`CommitGraph`] struct which ties the pipeline
//! together: appended commits go through the stream merger, the merged rows
//! are laid out by the lane builder, the event index cuts checkpoints over the
//! resulting events, and the ancestor tracker walks the laid-out rows on
//! demand.
//!
//! ## Overview
//!
//! ```text
//!   producers ──append──▶ StreamMerger ──rows──▶ LaneLayoutBuilder ──events──▶ EventIndex
//!                                                      │
//!                                                      └──────▶ AncestorTracker
//! ```
//!
//! Every append repacks the merger. When the repack changes rows that were
//! already laid out, the graph rewinds the builder to its nearest snapshot,
//! drops the index state derived from those rows and restarts the ancestor
//! walk, then lays out the new tail.
//!
//! ## Generations
//!
//! Each load runs under a generation number. [`CommitGraph::reset`] bumps it,
//! so batches from a producer that is still working on the previous load are
//! recognised and dropped instead of being mixed into the new one.
//!
//! ## Examples
//!
//! ```rust
//! use lanegraph::{Commit, CommitGraph, CommitId};
//!
//! # fn main() -> lanegraph::Result<()> {
//! let mut graph = CommitGraph::builder().sources(1).build()?;
//! let generation = graph.generation();
//!
//! let id = |n| CommitId::from_u64(n);
//! graph.append(generation, 0, vec![
//!     Commit::new(id(1), 40, vec![id(2)]),
//!     Commit::new(id(2), 30, vec![id(3), id(4)]),
//!     Commit::new(id(3), 20, vec![]),
//!     Commit::new(id(4), 10, vec![]),
//! ])?;
//! graph.mark_exhausted(generation, 0)?;
//!
//! assert_eq!(graph.lane_of(3)?, 1);
//! assert!(graph.is_complete());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace, warn};

use crate::ancestry::{AncestorTracker, LayoutView, TrackerState};
use crate::collections::{map_with_capacity, HashMap};
use crate::error::{GraphError, Result};
use crate::id::CommitId;
use crate::index::{EventIndex, MergeSpan};
use crate::layout::{LaneLayoutBuilder, RowEvent};
use crate::merger::StreamMerger;
use crate::types::{Commit, Generation, GraphConfig, GraphStats, Lane, Row};

/// Graph shared between a feed driver and readers
pub type SharedGraph = Arc<RwLock<CommitGraph>>;

/// Incrementally built commit graph
///
/// Writes (`append`, `mark_exhausted`, `reset`) need `&mut self`; readers of
/// a [`SharedGraph`] take the read lock. Ancestor queries advance the tracker
/// and therefore need the write lock too.
#[derive(Debug)]
pub struct CommitGraph {
    config: GraphConfig,
    generation: Generation,
    merger: StreamMerger,
    builder: LaneLayoutBuilder,
    index: EventIndex,
    tracker: AncestorTracker,
    /// First row of every loaded id
    rows: HashMap<CommitId, Row>,
    degraded: bool,
}

impl CommitGraph {
    /// Create an empty graph without sources
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the configuration does not validate.
    pub fn new(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            merger: StreamMerger::new(config.merge_pack_size),
            builder: LaneLayoutBuilder::new(config.checkpoint_frequency),
            index: EventIndex::new(config.checkpoint_frequency),
            tracker: AncestorTracker::new(),
            rows: map_with_capacity(1024),
            generation: 0,
            degraded: false,
            config,
        })
    }

    /// Start configuring a graph
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Wrap the graph for sharing with a feed driver
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(RwLock::new(self))
    }

    /// Active configuration
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Current load generation
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Register another source and return its index
    ///
    /// Adding a source to a finished graph reopens it: dangling lineages may
    /// now find their parents in the new source.
    pub fn add_source(&mut self) -> usize {
        let reopen = self.builder.is_finished();
        if reopen {
            let frontier = self.builder.len() as Row;
            self.rewind_to(frontier);
        }
        let source = self.merger.add_source();
        debug!("Registered source {}", source);
        if reopen {
            self.sync();
        }
        source
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.merger.source_count()
    }

    /// Append a batch of commits to a source
    ///
    /// Returns `Ok(false)` when the batch belongs to an older generation and
    /// was dropped.
    ///
    /// # Arguments
    ///
    /// * `generation` - Generation the producer was started under
    /// * `source` - Index returned by [`CommitGraph::add_source`]
    /// * `commits` - Commits in the source's order, newest first
    ///
    /// # Errors
    ///
    /// - `UnknownSource` if the source was never registered
    /// - `SourceExhausted` if the source was already marked complete
    #[instrument(skip(self, commits), fields(count = commits.len()))]
    pub fn append(&mut self, generation: Generation, source: usize, commits: Vec<Commit>) -> Result<bool> {
        if generation != self.generation {
            debug!(
                "Dropping stale batch of {} commits for source {} (generation {}, current {})",
                commits.len(),
                source,
                generation,
                self.generation
            );
            return Ok(false);
        }
        self.merger.append(source, commits)?;
        self.sync();
        Ok(true)
    }

    /// Mark a source as complete
    ///
    /// Returns `Ok(false)` for a stale generation. Once every source is
    /// complete the layout is finished and the index sealed.
    #[instrument(skip(self))]
    pub fn mark_exhausted(&mut self, generation: Generation, source: usize) -> Result<bool> {
        if generation != self.generation {
            debug!(
                "Dropping stale end-of-stream for source {} (generation {}, current {})",
                source, generation, self.generation
            );
            return Ok(false);
        }
        self.merger.mark_exhausted(source)?;
        self.sync();
        Ok(true)
    }

    /// Rows available to readers
    pub fn len(&self) -> usize {
        if self.degraded {
            self.merger.len()
        } else {
            self.builder.len()
        }
    }

    /// Whether no row is available yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every source is exhausted
    pub fn is_complete(&self) -> bool {
        self.merger.is_exhausted()
    }

    /// Whether lane layout is off because some source is not time ordered
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Commit at `row`
    pub fn commit(&self, row: Row) -> Result<&Commit> {
        self.check_row(row)?;
        self.merger
            .commit(row)
            .ok_or_else(|| GraphError::internal(format!("row {} missing from the merged index", row)))
    }

    /// Commits of every row in `range`, clipped to the available rows
    pub fn commits(&self, range: Range<Row>) -> impl Iterator<Item = (Row, &Commit)> + '_ {
        let end = range.end.min(self.len() as Row);
        (range.start..end).filter_map(move |row| self.merger.commit(row).map(|commit| (row, commit)))
    }

    /// First row of a loaded commit
    ///
    /// Abbreviated ids match the commit they prefix.
    pub fn row_of(&self, id: &CommitId) -> Result<Row> {
        self.rows
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::CommitNotFound(id.to_string()))
    }

    /// Lane of the commit at `row`
    pub fn lane_of(&self, row: Row) -> Result<Lane> {
        self.check_layout()?;
        self.check_row(row)?;
        self.builder
            .lane_of(row)
            .ok_or_else(|| GraphError::internal(format!("row {} has no lane", row)))
    }

    /// Lanes drawn on `row`
    ///
    /// Includes lanes passing through the row, lanes converging into it and
    /// a lane started by it.
    pub fn active_lanes_at(&self, row: Row) -> Result<BTreeSet<Lane>> {
        self.check_layout()?;
        self.check_row(row)?;
        Ok(self.index.active_lanes_at(self.builder.events(), row))
    }

    /// Merges above `row` whose parent wires are still open entering it
    pub fn merge_spans_at(&self, row: Row) -> Result<Vec<MergeSpan>> {
        self.check_layout()?;
        self.check_row(row)?;
        Ok(self.index.merge_spans_at(self.builder.events(), row))
    }

    /// Structural event of `row`, `None` for a plain continuation
    pub fn event_at(&self, row: Row) -> Result<Option<&RowEvent>> {
        self.check_layout()?;
        self.check_row(row)?;
        Ok(self.builder.event_at(row))
    }

    /// Parent ids referenced by loaded commits but never loaded themselves
    pub fn unresolved(&self) -> Vec<CommitId> {
        self.builder.unresolved()
    }

    /// Rows waiting for an unresolved parent
    pub fn waiting_for(&self, id: &CommitId) -> Vec<Row> {
        self.builder.waiting_for(id)
    }

    /// Focus the ancestor tracker on a commit
    ///
    /// The commit does not have to be loaded yet; the tracker waits for it.
    #[instrument(skip(self))]
    pub fn set_focus(&mut self, id: CommitId) {
        self.tracker.set_focus(id);
    }

    /// Drop the ancestor focus
    ///
    /// In degraded mode the tracker stays disabled and keeps reporting every
    /// row as included.
    pub fn clear_focus(&mut self) {
        self.tracker.clear_focus();
    }

    /// Current ancestor focus, if any
    pub fn focus(&self) -> Option<CommitId> {
        self.tracker.focus()
    }

    /// Whether `id` is the focus or one of its ancestors
    pub fn is_ancestor(&mut self, id: &CommitId) -> bool {
        let view = LayoutView {
            builder: &self.builder,
            rows: &self.rows,
            complete: self.builder.is_finished(),
        };
        self.tracker.is_ancestor(&view, id)
    }

    /// Ancestor flags for the rows of `range`
    pub fn included_rows(&mut self, range: Range<Row>) -> Vec<bool> {
        let view = LayoutView {
            builder: &self.builder,
            rows: &self.rows,
            complete: self.builder.is_finished(),
        };
        self.tracker.included(&view, range)
    }

    /// State of the ancestor tracker
    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.state()
    }

    /// Lay out rows from `row` onward again
    ///
    /// # Errors
    ///
    /// - `LayoutDisabled` in degraded mode
    /// - `RowOutOfRange` / `RowNotYetAvailable` if `row` is not laid out
    #[instrument(skip(self))]
    pub fn recompute_from(&mut self, row: Row) -> Result<()> {
        self.check_layout()?;
        self.check_row(row)?;
        self.rewind_to(row);
        self.sync();
        Ok(())
    }

    /// Clear every row and start a new generation
    ///
    /// The same number of sources is registered again, all still loading.
    /// Producers of the previous generation are ignored from now on.
    #[instrument(skip(self))]
    pub fn reset(&mut self) -> Generation {
        let sources = self.merger.source_count();
        self.generation += 1;
        self.merger.clear();
        self.builder.clear();
        self.index.clear();
        self.tracker.reset();
        self.rows.clear();
        self.degraded = false;
        for _ in 0..sources {
            self.merger.add_source();
        }
        info!("Graph reset to generation {} with {} sources", self.generation, sources);
        self.generation
    }

    /// Summary counters
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            rows: self.len(),
            sources: self.merger.source_count(),
            events: self.builder.events().len(),
            checkpoints: self.index.checkpoint_count(),
            pending_checkpoints: self.index.not_ready_count(),
            lanes_in_use: self.builder.lanes_in_use(),
            peak_lanes: self.builder.peak_lanes(),
            unresolved: self.builder.unresolved_count(),
            pending_edges: self.builder.pending_edges(),
            complete: self.is_complete(),
            degraded: self.degraded,
        }
    }

    fn check_layout(&self) -> Result<()> {
        if self.degraded {
            return Err(GraphError::LayoutDisabled);
        }
        Ok(())
    }

    fn check_row(&self, row: Row) -> Result<()> {
        let frontier = self.len() as Row;
        if row < frontier {
            Ok(())
        } else if self.is_complete() {
            Err(GraphError::RowOutOfRange { row, len: frontier })
        } else {
            Err(GraphError::RowNotYetAvailable { row, frontier })
        }
    }

    /// Undo layout state for rows at or after `row`
    fn rewind_to(&mut self, row: Row) {
        let restart = self.builder.rewind(row);
        self.index.recompute_from(restart);
        self.tracker.invalidate_from(restart);
        self.rows.retain(|_, first| *first < restart);
        debug!("Layout rewound to row {} for a change at row {}", restart, row);
    }

    /// Bring layout, index and id map up to date with the merger
    fn sync(&mut self) {
        let repack = self.merger.repack();

        if self.merger.is_disordered() {
            if !self.degraded {
                warn!("Input is not time ordered; disabling lane layout");
                self.degraded = true;
                self.builder.clear();
                self.index.clear();
                self.tracker.disable();
            }
            if repack.dirty_from.is_some() {
                self.rebuild_rows();
            }
            return;
        }

        if let Some(dirty) = repack.dirty_from {
            if (dirty as usize) < self.builder.len() {
                self.rewind_to(dirty);
            }
        }

        let start = self.builder.len() as Row;
        let end = self.merger.len() as Row;
        for row in start..end {
            let Some(commit) = self.merger.commit(row) else {
                break;
            };
            self.builder.consume(row, commit);
            self.rows.entry(commit.id).or_insert(row);
        }
        if end > start {
            trace!("Laid out rows {}..{}", start, end);
        }
        self.index.extend(self.builder.events(), self.builder.len() as Row);

        if self.merger.is_exhausted() && !self.builder.is_finished() {
            self.builder.finish();
            self.index.seal();
        }
    }

    fn rebuild_rows(&mut self) {
        self.rows.clear();
        for row in 0..self.merger.len() as Row {
            if let Some(commit) = self.merger.commit(row) {
                self.rows.entry(commit.id).or_insert(row);
            }
        }
    }
}

/// Builder for [`CommitGraph`] with custom configuration
///
/// # Examples
///
/// ```rust
/// use lanegraph::GraphBuilder;
///
/// let graph = GraphBuilder::new()
///     .checkpoint_frequency(64)
///     .sources(3)
///     .build()
///     .unwrap();
/// assert_eq!(graph.source_count(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: GraphConfig,
    sources: usize,
}

impl GraphBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration
    ///
    /// Options set afterwards override the corresponding fields.
    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Set rows between checkpoints
    ///
    /// Lower values make row queries cheaper and loading more memory hungry.
    ///
    /// # Arguments
    ///
    /// * `rows` - Checkpoint interval in rows, at least 1
    pub fn checkpoint_frequency(mut self, rows: usize) -> Self {
        self.config.checkpoint_frequency = rows;
        self
    }

    /// Set entries per pack of the merged row index
    ///
    /// # Arguments
    ///
    /// * `entries` - Pack size, a power of two
    pub fn merge_pack_size(mut self, entries: usize) -> Self {
        self.config.merge_pack_size = entries;
        self
    }

    /// Register this many sources up front
    pub fn sources(mut self, count: usize) -> Self {
        self.sources = count;
        self
    }

    /// Build the graph
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the options do not validate.
    pub fn build(self) -> Result<CommitGraph> {
        let mut graph = CommitGraph::new(self.config)?;
        for _ in 0..self.sources {
            graph.add_source();
        }
        Ok(graph)
    }

    /// Build the graph behind a shared lock
    pub fn build_shared(self) -> Result<SharedGraph> {
        self.build().map(CommitGraph::into_shared)
    }
}

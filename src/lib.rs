//! # lanegraph - Incremental commit graph layout
//!
//! Lays out commit history as vertical lanes while the history is still
//! streaming in from one or more repositories.
//!
//! ## Overview
//!
//! lanegraph turns time-ordered commit streams into a drawable graph:
//! - Merges any number of per-repository streams into one stable row order
//! - Assigns every commit a lane, reusing the smallest free lane
//! - Records a sparse log of structural events (starts, ends, merges, forks)
//! - Answers "which lanes cross this row" from periodic checkpoints
//! - Marks the ancestors of a focused commit without rescanning history
//!
//! ## Architecture
//!
//! - **Stream Merger**: stable k-way merge by timestamp, source, local order.
//!   Repacking after growth rebuilds only the rows that moved
//! - **Lane Layout Builder**: consumes rows in order and owns the lane array
//!   and the event log. Parents that have not arrived yet wait in an
//!   arena-backed pending table
//! - **Event Index**: checkpoints every `checkpoint_frequency` rows; a
//!   checkpoint is usable once the ends of the merges crossing it are known
//! - **Ancestor Tracker**: forward walk from the focus that follows lanes and
//!   merge edges, resumed as more rows are laid out
//!
//! ## Quick Start
//!
//! ```rust
//! use lanegraph::{Commit, CommitGraph, CommitId};
//!
//! # fn main() -> lanegraph::Result<()> {
//! let mut graph = CommitGraph::builder()
//!     .checkpoint_frequency(64)
//!     .sources(1)
//!     .build()?;
//! let generation = graph.generation();
//!
//! let id = |n| CommitId::from_u64(n);
//! graph.append(generation, 0, vec![
//!     Commit::new(id(1), 400, vec![id(2)]),
//!     Commit::new(id(2), 300, vec![id(3), id(4)]),
//!     Commit::new(id(3), 200, vec![]),
//!     Commit::new(id(4), 100, vec![]),
//! ])?;
//! graph.mark_exhausted(generation, 0)?;
//!
//! assert_eq!(graph.lane_of(1)?, 0);
//! assert_eq!(graph.lane_of(3)?, 1);
//!
//! graph.set_focus(id(2));
//! assert!(graph.is_ancestor(&id(4)));
//! assert!(!graph.is_ancestor(&id(1)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming Input
//!
//! Producers usually run concurrently. The [`feed`] module provides a tokio
//! channel whose driver applies batches to a [`SharedGraph`]:
//!
//! ```rust,no_run
//! use lanegraph::{feed_channel, GraphBuilder};
//!
//! # async fn run() -> lanegraph::Result<()> {
//! let graph = GraphBuilder::new().sources(2).build_shared()?;
//! let (sender, driver) = feed_channel(64, graph.read().generation());
//! let driver = tokio::spawn(driver.run(graph.clone()));
//!
//! sender.send_batch(0, vec![]).await?;
//! sender.exhausted(0).await?;
//! sender.exhausted(1).await?;
//! drop(sender);
//! # let _ = driver.await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Degraded Mode
//!
//! When a source delivers commits out of timestamp order the lanes cannot be
//! trusted. The graph keeps serving rows but lane queries fail with
//! [`GraphError::LayoutDisabled`] and every row counts as an ancestor until
//! the next [`CommitGraph::reset`].
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, GraphError>`. Rows that are not
//! loaded yet are reported as [`GraphError::RowNotYetAvailable`], which is
//! recoverable; once every source is exhausted the same request becomes
//! [`GraphError::RowOutOfRange`].
//!
//! ## Module Organization
//!
//! - [`graph`]: The graph facade and its builder
//! - [`merger`]: Stable merge of per-source streams
//! - [`layout`]: Lane assignment and the event log
//! - [`index`]: Checkpoints over the event log
//! - [`ring`]: Smallest-free lane allocator
//! - [`ancestry`]: Ancestor tracking from a focus commit
//! - [`feed`]: Async producer channel
//! - [`grouping`]: Day headers for row views
//! - [`id`]: Commit identifiers
//! - [`types`]: Common types and configuration
//! - [`error`]: Error types and handling

// Public API modules
pub mod ancestry;
pub mod collections;
pub mod error;
pub mod feed;
pub mod graph;
pub mod grouping;
pub mod id;
pub mod index;
pub mod layout;
pub mod merger;
pub mod ring;
pub mod types;

// Internal modules (not part of public API)
mod pending;

// Re-export main types for convenience
pub use ancestry::{AncestorTracker, GraphView, LayoutView, TrackerState};
pub use error::{GraphError, Result};
pub use feed::{feed_channel, FeedDriver, FeedMessage, FeedSender, FeedSummary};
pub use graph::{CommitGraph, GraphBuilder, SharedGraph};
pub use grouping::{day_label, group_by_day};
pub use id::CommitId;
pub use index::{Checkpoint, EventIndex, MergeSpan};
pub use layout::{EdgeKind, Incoming, LaneLayoutBuilder, MergeEnd, RowEvent};
pub use merger::{Repack, StreamMerger};
pub use types::*;

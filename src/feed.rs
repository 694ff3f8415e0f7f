//! Asynchronous commit feed
//!
//! Producers (one per repository) push batches through a bounded tokio
//! channel; a single [`FeedDriver`] drains it and applies each message to a
//! [`SharedGraph`] under the write lock. The lock is never held across an
//! await point.
//!
//! Every sender carries the generation it was created for. After a
//! [`CommitGraph::reset`](crate::CommitGraph::reset) its batches are stale and
//! the graph drops them.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::graph::SharedGraph;
use crate::types::{Commit, Generation};

/// Message from a producer to the driver
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// More commits for a source
    Batch {
        /// Generation the producer runs under
        generation: Generation,
        /// Target source
        source: usize,
        /// Commits, newest first
        commits: Vec<Commit>,
    },
    /// The source produced its last commit
    Exhausted {
        /// Generation the producer runs under
        generation: Generation,
        /// Finished source
        source: usize,
    },
}

/// Producer handle
#[derive(Debug, Clone)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedMessage>,
    generation: Generation,
}

impl FeedSender {
    /// Generation stamped on every message
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Same channel, stamping another generation
    pub fn with_generation(&self, generation: Generation) -> Self {
        Self {
            tx: self.tx.clone(),
            generation,
        }
    }

    /// Send a batch of commits for `source`
    ///
    /// # Errors
    ///
    /// Returns an internal error if the driver is gone.
    pub async fn send_batch(&self, source: usize, commits: Vec<Commit>) -> Result<()> {
        self.tx
            .send(FeedMessage::Batch {
                generation: self.generation,
                source,
                commits,
            })
            .await
            .map_err(|_| GraphError::internal("feed driver stopped"))
    }

    /// Signal that `source` is complete
    pub async fn exhausted(&self, source: usize) -> Result<()> {
        self.tx
            .send(FeedMessage::Exhausted {
                generation: self.generation,
                source,
            })
            .await
            .map_err(|_| GraphError::internal("feed driver stopped"))
    }

    /// Blocking variant of [`FeedSender::send_batch`] for worker threads
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn blocking_send_batch(&self, source: usize, commits: Vec<Commit>) -> Result<()> {
        self.tx
            .blocking_send(FeedMessage::Batch {
                generation: self.generation,
                source,
                commits,
            })
            .map_err(|_| GraphError::internal("feed driver stopped"))
    }

    /// Blocking variant of [`FeedSender::exhausted`] for worker threads
    pub fn blocking_exhausted(&self, source: usize) -> Result<()> {
        self.tx
            .blocking_send(FeedMessage::Exhausted {
                generation: self.generation,
                source,
            })
            .map_err(|_| GraphError::internal("feed driver stopped"))
    }
}

/// What a driver applied before its senders went away
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Batches applied
    pub batches: usize,
    /// Commits applied
    pub commits: usize,
    /// Messages dropped for a stale generation
    pub dropped: usize,
    /// Sources marked exhausted
    pub exhausted: usize,
    /// Time spent draining the channel
    pub elapsed: Duration,
}

/// Consumer side of the feed
#[derive(Debug)]
pub struct FeedDriver {
    rx: mpsc::Receiver<FeedMessage>,
}

impl FeedDriver {
    /// Apply messages until every sender is dropped
    ///
    /// # Errors
    ///
    /// Stops at the first message the graph rejects (unknown source, append
    /// to an exhausted source) and returns that error.
    pub async fn run(mut self, graph: SharedGraph) -> Result<FeedSummary> {
        let started = Instant::now();
        let mut summary = FeedSummary::default();

        while let Some(message) = self.rx.recv().await {
            match message {
                FeedMessage::Batch {
                    generation,
                    source,
                    commits,
                } => {
                    let count = commits.len();
                    let applied = graph.write().append(generation, source, commits)?;
                    if applied {
                        summary.batches += 1;
                        summary.commits += count;
                    } else {
                        summary.dropped += 1;
                    }
                }
                FeedMessage::Exhausted { generation, source } => {
                    if graph.write().mark_exhausted(generation, source)? {
                        debug!("Source {} exhausted", source);
                        summary.exhausted += 1;
                    } else {
                        summary.dropped += 1;
                    }
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            "Feed drained: {} batches, {} commits, {} stale messages in {}",
            summary.batches,
            summary.commits,
            summary.dropped,
            humantime::format_duration(summary.elapsed)
        );
        Ok(summary)
    }
}

/// Create a bounded feed for producers of `generation`
pub fn feed_channel(capacity: usize, generation: Generation) -> (FeedSender, FeedDriver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSender { tx, generation }, FeedDriver { rx })
}

//! Core data types used throughout the lanegraph library
//!
//! ## Overview
//!
//! - **Addressing**: [`Row`], [`Lane`], [`Generation`]
//! - **Input**: [`Commit`], the minimal per-commit tuple the engine consumes
//! - **Output**: [`CommitRow`] for row-based consumers, [`GraphStats`]
//! - **Configuration**: [`GraphConfig`]
//!
//! ## Examples
//!
//! ```rust
//! use lanegraph::types::{Commit, GraphConfig};
//! use lanegraph::CommitId;
//!
//! let config = GraphConfig {
//!     checkpoint_frequency: 128,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//!
//! let root = Commit::new(CommitId::from_u64(1), 1_700_000_000, vec![]);
//! assert!(root.is_root());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::id::CommitId;

/// Global row index in the merged, time-ordered sequence
pub type Row = u32;

/// Vertical rendering column
pub type Lane = u32;

/// Load generation; bumped on every reset so late producers can be ignored
pub type Generation = u64;

/// A commit as seen by the layout engine
///
/// Immutable once appended. The lane is deliberately not a field here: lane
/// numbers live in the builder's own per-row array so readers never observe
/// a commit being mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit hash
    pub id: CommitId,
    /// Commit time in seconds since the Unix epoch
    pub timestamp: i64,
    /// Parent hashes in the order the repository lists them
    #[serde(default)]
    pub parents: Vec<CommitId>,
    /// Index of the repository this commit was read from
    #[serde(default)]
    pub source: usize,
}

impl Commit {
    /// Create a commit for source 0
    pub fn new(id: CommitId, timestamp: i64, parents: Vec<CommitId>) -> Self {
        Self {
            id,
            timestamp,
            parents,
            source: 0,
        }
    }

    /// Same commit tagged with another source index
    pub fn with_source(mut self, source: usize) -> Self {
        self.source = source;
        self
    }

    /// Whether the commit has no parents
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether the commit joins two or more lines of history
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// One entry of a row-based view
///
/// Real commits and synthetic group headers flow through the same row APIs
/// instead of wrapping commits in decorator objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRow<'a> {
    /// A commit at a graph row
    Real {
        /// Graph row of the commit
        row: Row,
        /// The commit itself
        commit: &'a Commit,
    },
    /// Header separating groups of commits
    GroupHeader {
        /// Text shown for the group
        label: String,
        /// Timestamp of the first commit in the group
        timestamp: i64,
    },
}

impl CommitRow<'_> {
    /// Graph row, if this entry is a real commit
    pub fn row(&self) -> Option<Row> {
        match self {
            CommitRow::Real { row, .. } => Some(*row),
            CommitRow::GroupHeader { .. } => None,
        }
    }
}

/// Tunable options of the engine
///
/// # Default Values
///
/// - `checkpoint_frequency`: 256 rows per checkpoint
/// - `merge_pack_size`: 64 entries per merger pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Rows between two checkpoints of the event index
    pub checkpoint_frequency: usize,
    /// Entries per pack of the merged row index (power of two)
    pub merge_pack_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            checkpoint_frequency: 256,
            merge_pack_size: 64,
        }
    }
}

impl GraphConfig {
    /// Check that every option is usable
    ///
    /// # Errors
    ///
    /// - `checkpoint_frequency` is zero
    /// - `merge_pack_size` is zero or not a power of two
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_frequency == 0 {
            return Err(GraphError::config("checkpoint_frequency must be at least 1"));
        }
        if !self.merge_pack_size.is_power_of_two() {
            return Err(GraphError::config(format!(
                "merge_pack_size must be a power of two, got {}",
                self.merge_pack_size
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: GraphConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Summary counters of a graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    /// Rows laid out so far
    pub rows: usize,
    /// Registered sources
    pub sources: usize,
    /// Structural events recorded
    pub events: usize,
    /// Ready checkpoints
    pub checkpoints: usize,
    /// Checkpoints waiting for merge ends
    pub pending_checkpoints: usize,
    /// Lanes currently allocated
    pub lanes_in_use: usize,
    /// Widest the graph has been
    pub peak_lanes: usize,
    /// Parent ids referenced but not loaded
    pub unresolved: usize,
    /// Parent edges still waiting for their parent row
    pub pending_edges: usize,
    /// Whether every source is exhausted
    pub complete: bool,
    /// Whether layout was disabled for out-of-order input
    pub degraded: bool,
}

//! Stream merger
//!
//! Merges any number of per-repository commit sequences, each newest first,
//! into one global row order. The sort key is
//! `(timestamp descending, source ascending, local row ascending)`, which
//! makes the k-way merge stable and repeatable.
//!
//! Source data is never copied into the combined index; the index only holds
//! `(source, local row)` pairs, stored in fixed-size packs. A repack after
//! sources grow keeps every pack in front of the first row that can change
//! and re-merges only the tail.
//!
//! ```text
//!   source 0:  t=90 t=70 t=40          combined:  row 0 -> (0, 0)  t=90
//!   source 1:  t=80 t=40 t=10                     row 1 -> (1, 0)  t=80
//!                                                 row 2 -> (0, 1)  t=70
//!                                                 row 3 -> (0, 2)  t=40
//!                                                 row 4 -> (1, 1)  t=40
//!                                                 row 5 -> (1, 2)  t=10
//! ```

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tracing::{debug, trace, warn};

use crate::error::{GraphError, Result};
use crate::types::{Commit, Row};

/// Position of a commit inside its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    source: u32,
    local: u32,
}

/// Outcome of a repack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repack {
    /// First row whose mapping changed, `None` if nothing moved
    pub dirty_from: Option<Row>,
    /// Total rows after the repack
    pub len: Row,
}

#[derive(Debug, Default)]
struct SourceLog {
    commits: Vec<Commit>,
    /// Commits covered by the combined index
    merged: usize,
    exhausted: bool,
    disordered: bool,
}

/// Row index split into equally sized packs
#[derive(Debug)]
struct PackedIndex {
    packs: Vec<Vec<Slot>>,
    shift: u32,
    len: usize,
}

impl PackedIndex {
    fn new(pack_size: usize) -> Self {
        debug_assert!(pack_size.is_power_of_two());
        Self {
            packs: Vec::new(),
            shift: pack_size.trailing_zeros(),
            len: 0,
        }
    }

    fn pack_size(&self) -> usize {
        1 << self.shift
    }

    fn get(&self, row: usize) -> Option<Slot> {
        if row >= self.len {
            return None;
        }
        Some(self.packs[row >> self.shift][row & (self.pack_size() - 1)])
    }

    fn push(&mut self, slot: Slot) {
        let size = self.pack_size();
        match self.packs.last_mut() {
            Some(pack) if pack.len() < size => pack.push(slot),
            _ => {
                let mut pack = Vec::with_capacity(size);
                pack.push(slot);
                self.packs.push(pack);
            }
        }
        self.len += 1;
    }

    fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let size = self.pack_size();
        self.packs.truncate(len.div_ceil(size));
        if let Some(pack) = self.packs.last_mut() {
            let keep = len - (len / size) * size;
            if keep > 0 {
                pack.truncate(keep);
            }
        }
        self.len = len;
    }

    fn iter(&self) -> impl Iterator<Item = Slot> + '_ {
        self.packs.iter().flatten().copied()
    }

    fn clear(&mut self) {
        self.packs.clear();
        self.len = 0;
    }
}

/// Head of a source during the k-way merge
#[derive(Debug, PartialEq, Eq)]
struct Head {
    timestamp: i64,
    source: u32,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: newest first, then lowest source.
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type SortKey = (Reverse<i64>, u32, u32);

/// Stable k-way merger over growing sources
#[derive(Debug)]
pub struct StreamMerger {
    sources: Vec<SourceLog>,
    index: PackedIndex,
}

impl StreamMerger {
    /// Create a merger whose index packs hold `pack_size` rows
    pub fn new(pack_size: usize) -> Self {
        Self {
            sources: Vec::new(),
            index: PackedIndex::new(pack_size),
        }
    }

    /// Register a new, still-loading source and return its index
    pub fn add_source(&mut self) -> usize {
        self.sources.push(SourceLog::default());
        self.sources.len() - 1
    }

    /// Number of registered sources
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Append commits to the tail of a source
    ///
    /// Commits are stamped with `source`. The combined index does not change
    /// until the next [`StreamMerger::repack`].
    ///
    /// # Errors
    ///
    /// - `UnknownSource` if `source` was never registered
    /// - `SourceExhausted` if the source was already marked complete
    pub fn append(&mut self, source: usize, commits: impl IntoIterator<Item = Commit>) -> Result<()> {
        let log = self
            .sources
            .get_mut(source)
            .ok_or(GraphError::UnknownSource(source))?;
        if log.exhausted {
            return Err(GraphError::SourceExhausted(source));
        }

        for mut commit in commits {
            if let Some(last) = log.commits.last() {
                if commit.timestamp > last.timestamp && !log.disordered {
                    warn!(
                        "Source {} is not time ordered: {} ({}) follows {} ({})",
                        source,
                        commit.id.short(),
                        commit.timestamp,
                        last.id.short(),
                        last.timestamp
                    );
                    log.disordered = true;
                }
            }
            commit.source = source;
            log.commits.push(commit);
        }
        Ok(())
    }

    /// Mark a source as complete
    pub fn mark_exhausted(&mut self, source: usize) -> Result<()> {
        let log = self
            .sources
            .get_mut(source)
            .ok_or(GraphError::UnknownSource(source))?;
        log.exhausted = true;
        Ok(())
    }

    /// Whether every registered source is complete
    pub fn is_exhausted(&self) -> bool {
        self.sources.iter().all(|log| log.exhausted)
    }

    /// Whether any source broke descending timestamp order
    pub fn is_disordered(&self) -> bool {
        self.sources.iter().any(|log| log.disordered)
    }

    /// Rows in the combined index
    pub fn len(&self) -> usize {
        self.index.len
    }

    /// Whether the combined index is empty
    pub fn is_empty(&self) -> bool {
        self.index.len == 0
    }

    /// Commits appended to `source` so far
    pub fn source_len(&self, source: usize) -> usize {
        self.sources.get(source).map_or(0, |log| log.commits.len())
    }

    /// `(source, local row)` of a global row
    pub fn get(&self, row: Row) -> Option<(usize, usize)> {
        self.index
            .get(row as usize)
            .map(|slot| (slot.source as usize, slot.local as usize))
    }

    /// Commit at a global row
    pub fn commit(&self, row: Row) -> Option<&Commit> {
        let slot = self.index.get(row as usize)?;
        self.sources
            .get(slot.source as usize)?
            .commits
            .get(slot.local as usize)
    }

    /// Recompute the combined index after sources grew
    ///
    /// Only the part of the index from the first row that can change gets
    /// rebuilt. Rows before `dirty_from` keep their mapping.
    pub fn repack(&mut self) -> Repack {
        let grown = self
            .sources
            .iter()
            .any(|log| log.merged < log.commits.len());
        if !grown {
            return Repack {
                dirty_from: None,
                len: self.index.len as Row,
            };
        }

        let dirty = if self.is_disordered() {
            self.rebuild_all()
        } else {
            self.rebuild_tail()
        };

        for log in &mut self.sources {
            log.merged = log.commits.len();
        }

        debug!("Repacked stream: dirty from {:?}, {} rows", dirty, self.index.len);
        Repack {
            dirty_from: dirty,
            len: self.index.len as Row,
        }
    }

    /// Drop every source and the index
    pub fn clear(&mut self) {
        self.sources.clear();
        self.index.clear();
    }

    fn key_of(&self, slot: Slot) -> SortKey {
        let commit = &self.sources[slot.source as usize].commits[slot.local as usize];
        (Reverse(commit.timestamp), slot.source, slot.local)
    }

    fn rebuild_tail(&mut self) -> Option<Row> {
        let old_len = self.index.len;

        // Where would the first new commit of each grown source land?
        let mut dirty = old_len;
        for (source, log) in self.sources.iter().enumerate() {
            if log.merged == log.commits.len() {
                continue;
            }
            let key = (
                Reverse(log.commits[log.merged].timestamp),
                source as u32,
                log.merged as u32,
            );
            let landing = self.partition_index(dirty, |slot_key| slot_key < key);
            dirty = dirty.min(landing);
        }

        let mut cursors: Vec<usize> = self.sources.iter().map(|log| log.merged).collect();
        if dirty < old_len {
            let boundary = self.index.get(dirty).map(|slot| self.key_of(slot));
            if let Some(boundary) = boundary {
                for (source, log) in self.sources.iter().enumerate() {
                    let source_key = source as u32;
                    cursors[source] = if source_key == boundary.1 {
                        boundary.2 as usize
                    } else {
                        log.commits[..log.merged].partition_point(|commit| {
                            (Reverse(commit.timestamp), source_key) < (boundary.0, boundary.1)
                        })
                    };
                }
            }
        }

        trace!("Re-merging from row {} with cursors {:?}", dirty, cursors);
        self.index.truncate(dirty);
        self.merge_from(cursors);
        Some(dirty as Row)
    }

    fn rebuild_all(&mut self) -> Option<Row> {
        let old: Vec<Slot> = self.index.iter().collect();
        self.index.clear();
        self.merge_from(vec![0; self.sources.len()]);

        let changed = old
            .iter()
            .zip(self.index.iter())
            .position(|(before, after)| *before != after)
            .unwrap_or(old.len().min(self.index.len));
        Some(changed as Row)
    }

    /// First row in `0..limit` whose key fails `precedes`
    fn partition_index(&self, limit: usize, precedes: impl Fn(SortKey) -> bool) -> usize {
        let (mut low, mut high) = (0usize, limit);
        while low < high {
            let mid = low + (high - low) / 2;
            let slot = self.index.get(mid).expect("row below index length");
            if precedes(self.key_of(slot)) {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    fn merge_from(&mut self, mut cursors: Vec<usize>) {
        let mut heap = BinaryHeap::with_capacity(self.sources.len());
        for (source, log) in self.sources.iter().enumerate() {
            if let Some(commit) = log.commits.get(cursors[source]) {
                heap.push(Head {
                    timestamp: commit.timestamp,
                    source: source as u32,
                });
            }
        }

        while let Some(head) = heap.pop() {
            let source = head.source as usize;
            let local = cursors[source];
            self.index.push(Slot {
                source: head.source,
                local: local as u32,
            });
            cursors[source] += 1;
            if let Some(commit) = self.sources[source].commits.get(cursors[source]) {
                heap.push(Head {
                    timestamp: commit.timestamp,
                    source: head.source,
                });
            }
        }
    }
}

//! Pending-parent table
//!
//! Maps a parent id that has not been consumed yet to every child row
//! waiting for it. Waiters live in one growable arena and are chained through
//! intrusive `next` links, so high-throughput loading does not allocate a
//! fresh list per parent. Slots freed by [`PendingParents::take`] are reused.

use smallvec::SmallVec;

use crate::collections::{map_with_capacity, HashMap};
use crate::id::CommitId;
use crate::types::Row;

/// A child row waiting for one of its parents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Waiter {
    /// Row of the waiting child
    pub child: Row,
    /// Position of the awaited id in the child's parent list
    pub parent_index: u32,
}

#[derive(Debug, Clone)]
struct Node {
    waiter: Waiter,
    next: Option<u32>,
}

/// Arena-backed multimap from parent id to waiting children
#[derive(Debug, Clone)]
pub struct PendingParents {
    heads: HashMap<CommitId, u32>,
    nodes: Vec<Node>,
    free: Vec<u32>,
    live: usize,
}

impl Default for PendingParents {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingParents {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            heads: map_with_capacity(64),
            nodes: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Record that `waiter` expects `parent` to appear later
    pub fn insert(&mut self, parent: CommitId, waiter: Waiter) {
        let next = self.heads.get(&parent).copied();
        let node = Node { waiter, next };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        self.heads.insert(parent, slot);
        self.live += 1;
    }

    /// Remove and return every waiter for `id`, ordered by child row
    pub fn take(&mut self, id: &CommitId) -> SmallVec<[Waiter; 2]> {
        let mut waiters = SmallVec::new();
        let mut cursor = self.heads.remove(id);
        while let Some(slot) = cursor {
            let node = &self.nodes[slot as usize];
            waiters.push(node.waiter);
            cursor = node.next;
            self.free.push(slot);
        }
        self.live -= waiters.len();
        waiters.sort_unstable();
        waiters
    }

    /// Ids referenced as parents but not consumed yet
    pub fn ids(&self) -> impl Iterator<Item = &CommitId> + '_ {
        self.heads.keys()
    }

    /// Waiters for `id` without removing them
    pub fn peek(&self, id: &CommitId) -> Vec<Waiter> {
        let mut waiters = Vec::new();
        let mut cursor = self.heads.get(id).copied();
        while let Some(slot) = cursor {
            let node = &self.nodes[slot as usize];
            waiters.push(node.waiter);
            cursor = node.next;
        }
        waiters.sort_unstable();
        waiters
    }

    /// Number of distinct awaited ids
    pub fn key_count(&self) -> usize {
        self.heads.len()
    }

    /// Number of waiting edges
    pub fn waiter_count(&self) -> usize {
        self.live
    }

    /// Drop everything, keeping allocated capacity
    pub fn clear(&mut self) {
        self.heads.clear();
        self.nodes.clear();
        self.free.clear();
        self.live = 0;
    }
}

//! Integration tests for lanegraph
//!
//! Runs synthetic multi-repository histories through the whole pipeline and
//! compares incremental loads against one-shot loads and against a
//! reachability oracle.

use ::lanegraph::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::info;

/// Shape of a generated history
#[derive(Debug, Clone, Copy)]
pub struct HistoryConfig {
    /// Number of commits
    pub len: usize,
    /// Number of repositories the commits are spread over
    pub sources: usize,
    /// Chance in percent that a commit is a merge
    pub merge_percent: u32,
    /// Chance in percent that a commit starts a new root
    pub root_percent: u32,
    /// How far back (in rows) a first parent may sit
    pub reach: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            len: 120,
            sources: 3,
            merge_percent: 15,
            root_percent: 3,
            reach: 6,
        }
    }
}

/// A commit history with unique, strictly decreasing timestamps
///
/// Because no two commits share a timestamp, the merged row order equals
/// `commits` no matter how the commits are spread over sources or batches.
#[derive(Debug, Clone)]
pub struct SyntheticHistory {
    pub commits: Vec<Commit>,
    pub sources: Vec<Vec<Commit>>,
}

impl SyntheticHistory {
    /// Generate a history from a seeded RNG
    pub fn generate(rng: &mut StdRng, config: HistoryConfig) -> Self {
        let len = config.len.max(1);
        let sources = config.sources.max(1);
        let mut commits = Vec::with_capacity(len);
        let mut split = vec![Vec::new(); sources];

        for index in 0..len {
            let older = index + 1..len;
            let mut parents = Vec::new();
            let is_root = older.is_empty() || rng.random_range(0..100) < config.root_percent;
            if !is_root {
                let last = (index + config.reach.max(1)).min(len - 1);
                parents.push(rng.random_range(index + 1..=last));
                if rng.random_range(0..100) < config.merge_percent {
                    let second = rng.random_range(older);
                    if second != parents[0] {
                        parents.push(second);
                    }
                }
            }

            let source = rng.random_range(0..sources);
            let commit = Commit::new(
                Self::id(index),
                ((len - index) * 10) as i64,
                parents.into_iter().map(Self::id).collect(),
            )
            .with_source(source);
            split[source].push(commit.clone());
            commits.push(commit);
        }

        Self {
            commits,
            sources: split,
        }
    }

    /// Identifier of the commit at `index`
    pub fn id(index: usize) -> CommitId {
        CommitId::from_u64(index as u64 + 1)
    }

    /// Load every source in one batch
    pub fn load_one_shot(&self, frequency: usize) -> CommitGraph {
        let mut graph = self.empty_graph(frequency);
        for (source, commits) in self.sources.iter().enumerate() {
            graph.append(0, source, commits.clone()).unwrap();
        }
        for source in 0..self.sources.len() {
            graph.mark_exhausted(0, source).unwrap();
        }
        graph
    }

    /// Load in random batches, interleaving sources
    pub fn load_in_batches(&self, rng: &mut StdRng, frequency: usize, max_batch: usize) -> CommitGraph {
        let mut graph = self.empty_graph(frequency);
        for (source, batch) in self.batches(rng, max_batch) {
            graph.append(0, source, batch).unwrap();
        }
        for source in 0..self.sources.len() {
            graph.mark_exhausted(0, source).unwrap();
        }
        graph
    }

    /// Random `(source, batch)` sequence covering every commit once
    pub fn batches(&self, rng: &mut StdRng, max_batch: usize) -> Vec<(usize, Vec<Commit>)> {
        let mut cursors = vec![0usize; self.sources.len()];
        let mut batches = Vec::new();
        loop {
            let open: Vec<usize> = (0..self.sources.len())
                .filter(|source| cursors[*source] < self.sources[*source].len())
                .collect();
            if open.is_empty() {
                return batches;
            }
            let source = open[rng.random_range(0..open.len())];
            let start = cursors[source];
            let end = (start + rng.random_range(1..=max_batch.max(1))).min(self.sources[source].len());
            batches.push((source, self.sources[source][start..end].to_vec()));
            cursors[source] = end;
        }
    }

    /// Ancestors of `focus` (the focus included) by walking parent edges
    pub fn ancestors_of(&self, focus: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([focus]);
        while let Some(index) = queue.pop_front() {
            if !seen.insert(index) {
                continue;
            }
            for parent in &self.commits[index].parents {
                if let Some(position) = self.commits.iter().position(|commit| commit.id == *parent) {
                    queue.push_back(position);
                }
            }
        }
        seen
    }

    fn empty_graph(&self, frequency: usize) -> CommitGraph {
        GraphBuilder::new()
            .checkpoint_frequency(frequency)
            .merge_pack_size(4)
            .sources(self.sources.len())
            .build()
            .unwrap()
    }
}

/// Everything observable about a laid-out graph
#[derive(Debug, PartialEq)]
pub struct LayoutSnapshot {
    pub order: Vec<CommitId>,
    pub lanes: Vec<Lane>,
    pub events: Vec<Option<RowEvent>>,
    pub active: Vec<BTreeSet<Lane>>,
    pub spans: Vec<Vec<MergeSpan>>,
}

impl LayoutSnapshot {
    pub fn capture(graph: &CommitGraph) -> Self {
        let rows = 0..graph.len() as Row;
        Self {
            order: graph.commits(rows.clone()).map(|(_, commit)| commit.id).collect(),
            lanes: rows.clone().map(|row| graph.lane_of(row).unwrap()).collect(),
            events: rows.clone().map(|row| graph.event_at(row).unwrap().cloned()).collect(),
            active: rows.clone().map(|row| graph.active_lanes_at(row).unwrap()).collect(),
            spans: rows.map(|row| graph.merge_spans_at(row).unwrap()).collect(),
        }
    }
}

/// Rows whose checkpointed answers disagree with a replay of the whole log
///
/// Works on a partially loaded graph too: merge ends not scanned yet are
/// `None` in both answers.
pub fn index_mismatches(graph: &CommitGraph) -> Vec<Row> {
    let len = graph.len() as Row;
    let events: Vec<RowEvent> = (0..len)
        .filter_map(|row| graph.event_at(row).unwrap().cloned())
        .collect();
    let ends: HashMap<Row, Row> = events
        .iter()
        .flat_map(|event| event.merge_ends.iter().map(move |end| (end.child, event.row)))
        .collect();

    let mut entering = BTreeSet::new();
    let mut opened: Vec<MergeSpan> = Vec::new();
    let mut pending = events.iter().peekable();
    let mut mismatches = Vec::new();
    for row in 0..len {
        let event = pending.next_if(|event| event.row == row);

        let mut active = entering.clone();
        if let Some(event) = event {
            active.extend(event.started.iter().copied());
        }
        let spans: Vec<MergeSpan> = opened
            .iter()
            .copied()
            .filter(|span| span.end.map_or(true, |end| end >= row))
            .collect();
        if graph.active_lanes_at(row).unwrap() != active || graph.merge_spans_at(row).unwrap() != spans {
            mismatches.push(row);
        }

        if let Some(event) = event {
            event.apply(&mut entering);
            if event.opens_merge() {
                opened.push(MergeSpan {
                    child: row,
                    lane: event.lane,
                    end: ends.get(&row).copied(),
                });
            }
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_incremental_batches_match_one_shot() {
        for seed in 0..8u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let history = SyntheticHistory::generate(&mut rng, HistoryConfig::default());
            let frequency = 1 + (seed as usize % 5);

            let reference = history.load_one_shot(frequency);
            let incremental = history.load_in_batches(&mut rng, frequency, 7);

            assert_eq!(
                LayoutSnapshot::capture(&incremental),
                LayoutSnapshot::capture(&reference),
                "seed {}",
                seed
            );
            assert_eq!(incremental.stats(), reference.stats(), "seed {}", seed);
            info!("Seed {} laid out {} rows", seed, reference.len());
        }
    }

    #[test]
    fn test_source_split_does_not_change_layout() {
        let mut rng = StdRng::seed_from_u64(17);
        let spread = SyntheticHistory::generate(&mut rng, HistoryConfig::default());
        let single = SyntheticHistory {
            commits: spread.commits.clone(),
            sources: vec![spread.commits.clone()],
        };

        let a = LayoutSnapshot::capture(&spread.load_one_shot(8));
        let b = LayoutSnapshot::capture(&single.load_one_shot(8));
        assert_eq!(a, b);
    }

    #[test]
    fn test_ancestors_match_reachability() {
        let mut rng = StdRng::seed_from_u64(99);
        let history = SyntheticHistory::generate(
            &mut rng,
            HistoryConfig {
                len: 80,
                merge_percent: 25,
                ..Default::default()
            },
        );
        let mut graph = history.load_one_shot(4);

        for focus in [0, 1, 7, 20, 41, 79] {
            let expected = history.ancestors_of(focus);
            graph.set_focus(SyntheticHistory::id(focus));
            let flags = graph.included_rows(0..history.commits.len() as Row);
            let actual: BTreeSet<usize> = flags
                .iter()
                .enumerate()
                .filter(|(_, included)| **included)
                .map(|(row, _)| row)
                .collect();
            assert_eq!(actual, expected, "focus {}", focus);
            assert_eq!(graph.tracker_state(), TrackerState::Exhausted);
        }
    }

    #[test]
    fn test_focus_survives_interleaved_loading() {
        let mut rng = StdRng::seed_from_u64(5);
        let history = SyntheticHistory::generate(&mut rng, HistoryConfig::default());
        let focus = 30;
        let expected = history.ancestors_of(focus);

        let mut graph = GraphBuilder::new()
            .checkpoint_frequency(3)
            .sources(history.sources.len())
            .build()
            .unwrap();
        graph.set_focus(SyntheticHistory::id(focus));
        for (source, batch) in history.batches(&mut rng, 5) {
            graph.append(0, source, batch).unwrap();
            // Query mid-load so the walk has to be invalidated by later rewinds.
            let _ = graph.included_rows(0..graph.len() as Row);
        }
        for source in 0..history.sources.len() {
            graph.mark_exhausted(0, source).unwrap();
        }

        for (row, commit) in history.commits.iter().enumerate() {
            assert_eq!(graph.is_ancestor(&commit.id), expected.contains(&row), "row {}", row);
        }
    }

    #[test]
    fn test_recompute_from_any_row_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(3);
        let history = SyntheticHistory::generate(
            &mut rng,
            HistoryConfig {
                len: 60,
                ..Default::default()
            },
        );
        let mut graph = history.load_one_shot(4);
        let reference = LayoutSnapshot::capture(&graph);

        for row in [0, 1, 13, 31, 59] {
            graph.recompute_from(row).unwrap();
            assert_eq!(LayoutSnapshot::capture(&graph), reference, "row {}", row);
            assert!(graph.stats().complete);
        }
    }

    #[test]
    fn test_late_source_joins_finished_graph() {
        let mut rng = StdRng::seed_from_u64(11);
        let history = SyntheticHistory::generate(
            &mut rng,
            HistoryConfig {
                len: 50,
                sources: 2,
                ..Default::default()
            },
        );
        let reference = history.load_one_shot(4);

        let mut graph = GraphBuilder::new().checkpoint_frequency(4).sources(1).build().unwrap();
        graph.append(0, 0, history.sources[0].clone()).unwrap();
        graph.mark_exhausted(0, 0).unwrap();
        assert!(graph.is_complete());

        let late = graph.add_source();
        assert_eq!(late, 1);
        assert!(!graph.is_complete());
        graph.append(0, late, history.sources[1].clone()).unwrap();
        graph.mark_exhausted(0, late).unwrap();

        assert_eq!(LayoutSnapshot::capture(&graph), LayoutSnapshot::capture(&reference));
    }

    #[test]
    fn test_late_source_supplies_missing_merge_parent() {
        let id = CommitId::from_u64;
        let first = vec![
            Commit::new(id(1), 50, vec![id(2), id(99)]),
            Commit::new(id(2), 40, vec![id(3)]),
            Commit::new(id(3), 30, vec![]),
        ];
        let second = vec![Commit::new(id(99), 10, vec![])];

        let mut reference = GraphBuilder::new().checkpoint_frequency(1).sources(2).build().unwrap();
        reference.append(0, 0, first.clone()).unwrap();
        reference.append(0, 1, second.clone()).unwrap();
        reference.mark_exhausted(0, 0).unwrap();
        reference.mark_exhausted(0, 1).unwrap();

        let mut graph = GraphBuilder::new().checkpoint_frequency(1).sources(1).build().unwrap();
        graph.append(0, 0, first).unwrap();
        graph.mark_exhausted(0, 0).unwrap();
        assert_eq!(graph.merge_spans_at(2).unwrap()[0].end, None);

        let late = graph.add_source();
        graph.append(0, late, second).unwrap();
        graph.mark_exhausted(0, late).unwrap();

        assert_eq!(graph.merge_spans_at(2).unwrap()[0].end, Some(3));
        assert!(graph.unresolved().is_empty());
        assert_eq!(LayoutSnapshot::capture(&graph), LayoutSnapshot::capture(&reference));
        assert_eq!(graph.stats(), reference.stats());
    }

    #[test]
    fn test_degraded_mode_until_reset() {
        let mut graph = GraphBuilder::new().sources(2).build().unwrap();
        let id = CommitId::from_u64;
        graph
            .append(0, 0, vec![Commit::new(id(1), 100, vec![id(2)]), Commit::new(id(2), 90, vec![])])
            .unwrap();
        graph.set_focus(id(1));
        assert!(!graph.is_ancestor(&id(9)));

        // Source 1 goes back in time.
        graph
            .append(0, 1, vec![Commit::new(id(8), 10, vec![]), Commit::new(id(9), 50, vec![])])
            .unwrap();
        assert!(graph.is_degraded());
        assert_eq!(graph.len(), 4);
        assert!(matches!(graph.active_lanes_at(0), Err(GraphError::LayoutDisabled)));
        assert!(matches!(graph.event_at(0), Err(GraphError::LayoutDisabled)));
        assert!(matches!(graph.recompute_from(0), Err(GraphError::LayoutDisabled)));
        assert_eq!(graph.included_rows(0..4), vec![true; 4]);
        assert!(graph.row_of(&id(9)).is_ok());
        assert!(graph.stats().degraded);

        // The focus goes away but tracking stays off.
        graph.clear_focus();
        assert_eq!(graph.focus(), None);
        assert_eq!(graph.tracker_state(), TrackerState::Dumb);
        assert_eq!(graph.included_rows(0..4), vec![true; 4]);

        let generation = graph.reset();
        graph
            .append(generation, 1, vec![Commit::new(id(9), 50, vec![]), Commit::new(id(8), 10, vec![])])
            .unwrap();
        assert!(!graph.is_degraded());
        assert_eq!(graph.lane_of(1).unwrap(), 0);
        assert_eq!(graph.tracker_state(), TrackerState::Uninitialized);
    }

    #[test]
    fn test_day_groups_over_multi_source_history() {
        let day = 86_400;
        let id = CommitId::from_u64;
        let mut graph = GraphBuilder::new().sources(2).build().unwrap();
        graph
            .append(0, 0, vec![Commit::new(id(1), 2 * day + 60, vec![id(3)]), Commit::new(id(3), day + 60, vec![])])
            .unwrap();
        graph
            .append(0, 1, vec![Commit::new(id(2), 2 * day + 30, vec![]), Commit::new(id(4), 30, vec![])])
            .unwrap();

        let rows = group_by_day(&graph, 0..4).unwrap();
        let labels: Vec<&str> = rows
            .iter()
            .filter_map(|row| match row {
                CommitRow::GroupHeader { label, .. } => Some(label.as_str()),
                CommitRow::Real { .. } => None,
            })
            .collect();
        assert_eq!(labels, vec!["1970-01-03", "1970-01-02", "1970-01-01"]);
        assert_eq!(rows.len(), 7);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_reload_through_feed_ignores_previous_generation() {
        let mut rng = StdRng::seed_from_u64(23);
        let history = SyntheticHistory::generate(&mut rng, HistoryConfig::default());
        let reference = history.load_one_shot(4);

        let graph = GraphBuilder::new()
            .checkpoint_frequency(4)
            .merge_pack_size(4)
            .sources(history.sources.len())
            .build_shared()
            .unwrap();
        let (old, driver) = feed_channel(8, graph.read().generation());
        let handle = tokio::spawn(driver.run(graph.clone()));

        let batches = history.batches(&mut rng, 9);
        for (source, batch) in batches.iter().take(batches.len() / 2) {
            old.send_batch(*source, batch.clone()).await.unwrap();
        }

        let generation = graph.write().reset();
        let fresh = old.with_generation(generation);
        for (index, (source, batch)) in batches.iter().enumerate() {
            fresh.send_batch(*source, batch.clone()).await.unwrap();
            if index % 3 == 0 {
                old.send_batch(*source, batch.clone()).await.unwrap();
            }
        }
        for source in 0..history.sources.len() {
            old.exhausted(source).await.unwrap();
            fresh.exhausted(source).await.unwrap();
        }
        drop(old);
        drop(fresh);

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.dropped >= history.sources.len());
        assert_eq!(summary.exhausted, history.sources.len());
        info!("Reload applied {} batches, dropped {}", summary.batches, summary.dropped);

        let graph = graph.read();
        assert_eq!(graph.generation(), generation);
        assert_eq!(LayoutSnapshot::capture(&graph), LayoutSnapshot::capture(&reference));
    }
}

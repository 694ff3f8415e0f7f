//! Main test module for lanegraph
//!
//! This module includes all test suites:
//! - Integration tests for multi-source scenarios
//! - Chaos tests for interleaved, stale and reordered feeds
//! - Property-based tests for layout invariants

pub mod integration;

#[cfg(test)]
mod edge_cases {
    use ::lanegraph::*;

    fn id(n: u64) -> CommitId {
        CommitId::from_u64(n)
    }

    fn commit(n: u64, timestamp: i64, parents: &[u64]) -> Commit {
        Commit::new(id(n), timestamp, parents.iter().map(|p| id(*p)).collect())
    }

    #[test]
    fn test_empty_graph() {
        let mut graph = GraphBuilder::new().sources(2).build().unwrap();
        assert!(graph.is_empty());
        assert!(matches!(graph.lane_of(0), Err(GraphError::RowNotYetAvailable { row: 0, frontier: 0 })));

        graph.mark_exhausted(0, 0).unwrap();
        graph.mark_exhausted(0, 1).unwrap();
        assert!(graph.is_complete());
        assert!(matches!(graph.lane_of(0), Err(GraphError::RowOutOfRange { row: 0, len: 0 })));

        let stats = graph.stats();
        assert_eq!(stats.rows, 0);
        assert_eq!(stats.checkpoints, 1);
        assert_eq!(stats.peak_lanes, 0);
    }

    #[test]
    fn test_single_root_commit() {
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        graph.append(0, 0, vec![commit(1, 10, &[])]).unwrap();

        let event = graph.event_at(0).unwrap().unwrap();
        assert!(event.is_start);
        assert!(event.is_end);
        assert_eq!(event.started.as_slice(), &[0]);
        assert_eq!(event.ended.as_slice(), &[0]);
        assert_eq!(graph.active_lanes_at(0).unwrap().len(), 1);
        assert_eq!(graph.stats().lanes_in_use, 0);
    }

    #[test]
    fn test_octopus_merge() {
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        graph
            .append(
                0,
                0,
                vec![
                    commit(1, 50, &[2, 3, 4]),
                    commit(2, 40, &[]),
                    commit(3, 30, &[]),
                    commit(4, 20, &[]),
                ],
            )
            .unwrap();
        graph.mark_exhausted(0, 0).unwrap();

        // The first parent keeps the merge's lane; the others start fresh ones.
        assert_eq!(graph.lane_of(1).unwrap(), 0);
        assert_eq!(graph.lane_of(2).unwrap(), 1);
        assert_eq!(graph.lane_of(3).unwrap(), 1);

        let spans = graph.merge_spans_at(2).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].child, 0);
        assert_eq!(spans[0].end, Some(3));
        assert_eq!(graph.merge_spans_at(3).unwrap().len(), 1);

        let last = graph.event_at(3).unwrap().unwrap();
        assert_eq!(last.merge_ends.len(), 1);
        assert_eq!(last.merge_ends[0].child, 0);
    }

    #[test]
    fn test_duplicate_parent_references_from_many_children() {
        // Four branch tips all pointing at one base commit.
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        graph
            .append(
                0,
                0,
                vec![
                    commit(1, 50, &[9]),
                    commit(2, 40, &[9]),
                    commit(3, 30, &[9]),
                    commit(4, 20, &[9]),
                ],
            )
            .unwrap();
        assert_eq!(graph.waiting_for(&id(9)), vec![0, 1, 2, 3]);
        assert_eq!(graph.stats().lanes_in_use, 4);

        graph.append(0, 0, vec![commit(9, 10, &[])]).unwrap();
        let event = graph.event_at(4).unwrap().unwrap();
        assert_eq!(graph.lane_of(4).unwrap(), 0);
        assert_eq!(event.incoming.len(), 4);
        assert!(event.incoming.iter().all(|edge| edge.kind == EdgeKind::Carried));
        assert_eq!(event.ended.as_slice(), &[1, 2, 3, 0]);
        assert_eq!(graph.stats().lanes_in_use, 0);
    }

    #[test]
    fn test_unknown_source_and_exhausted_source() {
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        assert!(matches!(
            graph.append(0, 3, vec![commit(1, 10, &[])]),
            Err(GraphError::UnknownSource(3))
        ));

        graph.mark_exhausted(0, 0).unwrap();
        assert!(matches!(
            graph.append(0, 0, vec![commit(1, 10, &[])]),
            Err(GraphError::SourceExhausted(0))
        ));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        assert!(matches!(
            GraphBuilder::new().checkpoint_frequency(0).build(),
            Err(GraphError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            GraphBuilder::new().merge_pack_size(48).build(),
            Err(GraphError::InvalidConfiguration(_))
        ));
        assert!(GraphConfig::from_json_str(r#"{"checkpoint_frequency": 32}"#).is_ok());
        assert!(GraphConfig::from_json_str(r#"{"merge_pack_size": 3}"#).is_err());
    }

    #[test]
    fn test_equal_timestamps_order_by_source() {
        let mut graph = GraphBuilder::new().sources(2).build().unwrap();
        graph.append(0, 1, vec![commit(20, 100, &[])]).unwrap();
        graph.append(0, 0, vec![commit(10, 100, &[])]).unwrap();

        let order: Vec<CommitId> = graph.commits(0..2).map(|(_, commit)| commit.id).collect();
        assert_eq!(order, vec![id(10), id(20)]);
        assert_eq!(graph.row_of(&id(20)).unwrap(), 1);
    }

    #[test]
    fn test_focus_before_it_loads() {
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        graph.set_focus(id(2));
        assert_eq!(graph.tracker_state(), TrackerState::Locating);

        graph.append(0, 0, vec![commit(1, 30, &[2])]).unwrap();
        assert!(!graph.is_ancestor(&id(1)));
        assert_eq!(graph.tracker_state(), TrackerState::Locating);

        graph.append(0, 0, vec![commit(2, 20, &[3]), commit(3, 10, &[])]).unwrap();
        assert!(graph.is_ancestor(&id(3)));
        assert!(!graph.is_ancestor(&id(1)));
        assert_eq!(graph.tracker_state(), TrackerState::Exhausted);
    }

    #[test]
    fn test_clear_focus() {
        let mut graph = GraphBuilder::new().sources(1).build().unwrap();
        graph.append(0, 0, vec![commit(1, 20, &[2]), commit(2, 10, &[])]).unwrap();
        graph.set_focus(id(1));
        assert!(graph.is_ancestor(&id(2)));

        graph.clear_focus();
        assert_eq!(graph.focus(), None);
        assert_eq!(graph.tracker_state(), TrackerState::Uninitialized);
        assert!(!graph.is_ancestor(&id(2)));
    }
}

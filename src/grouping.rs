//! Day grouping for row views
//!
//! Inserts a [`CommitRow::GroupHeader`] in front of the first commit of every
//! UTC calendar day. Headers are synthetic rows: they never get a lane and
//! carry no graph row.

use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::error::{GraphError, Result};
use crate::graph::CommitGraph;
use crate::types::{CommitRow, Row};

/// `YYYY-MM-DD` label of a Unix timestamp
///
/// # Errors
///
/// Returns an internal error for timestamps chrono cannot represent.
pub fn day_label(timestamp: i64) -> Result<String> {
    let time: DateTime<Utc> = DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| GraphError::internal(format!("timestamp {} out of range", timestamp)))?;
    Ok(time.format("%Y-%m-%d").to_string())
}

/// Rows of `range` with a header before each new day
///
/// The range is clipped to the rows laid out so far. The first commit of the
/// range always gets a header.
///
/// # Examples
///
/// ```rust
/// use lanegraph::{group_by_day, Commit, CommitGraph, CommitId, CommitRow};
///
/// # fn main() -> lanegraph::Result<()> {
/// let mut graph = CommitGraph::builder().sources(1).build()?;
/// graph.append(0, 0, vec![
///     Commit::new(CommitId::from_u64(1), 86_400 + 5, vec![]),
///     Commit::new(CommitId::from_u64(2), 86_400, vec![]),
///     Commit::new(CommitId::from_u64(3), 100, vec![]),
/// ])?;
///
/// let rows = group_by_day(&graph, 0..3)?;
/// assert_eq!(rows.len(), 5);
/// assert!(matches!(&rows[0], CommitRow::GroupHeader { label, .. } if label == "1970-01-02"));
/// assert_eq!(rows[3], CommitRow::GroupHeader { label: "1970-01-01".into(), timestamp: 100 });
/// # Ok(())
/// # }
/// ```
pub fn group_by_day(graph: &CommitGraph, range: Range<Row>) -> Result<Vec<CommitRow<'_>>> {
    let mut rows = Vec::with_capacity(range.len() + 1);
    let mut current: Option<String> = None;

    for (row, commit) in graph.commits(range) {
        let label = day_label(commit.timestamp)?;
        if current.as_deref() != Some(label.as_str()) {
            rows.push(CommitRow::GroupHeader {
                label: label.clone(),
                timestamp: commit.timestamp,
            });
            current = Some(label);
        }
        rows.push(CommitRow::Real { row, commit });
    }
    Ok(rows)
}

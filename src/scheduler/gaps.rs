//! Backfill target selection.
//!
//! Upstream history and the measured commits are both ordered newest first.
//! Each pair of consecutive measured commits spans a run of history; the
//! widest run with unmeasured commits inside it is split at its midpoint.

use std::collections::{HashMap, HashSet};

use crate::commit::CommitInfo;

/// Span of history between two consecutive measured commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGap {
    /// Newer end of the span
    pub start: CommitInfo,
    /// Index of `start` in the newest-first history
    pub start_index: usize,
    /// Distance in history to the older end of the span
    pub size: usize,
}

/// Pick the commit that halves the widest coverage gap, or `None` when every
/// measured commit is adjacent to the next one.
///
/// When several gaps share the largest size, the oldest one is split.
pub fn find_gap(history: &[CommitInfo], measured: &[CommitInfo]) -> Option<CommitInfo> {
    let history = newest_first(history.to_vec());
    let gap = coverage_gaps(&history, measured)
        .into_iter()
        // max_by_key keeps the last maximum, i.e. the oldest span
        .max_by_key(|gap| gap.size)?;

    if gap.size <= 1 {
        return None;
    }

    let index = (gap.start_index + gap.size / 2).min(history.len() - 1);
    let target = history[index].clone();
    tracing::info!(
        gap = gap.size,
        start = gap.start.short(),
        middle = target.short(),
        "Found commit in the middle of the largest coverage gap"
    );
    Some(target)
}

/// Gaps between consecutive measured commits, newest first. `history` must
/// already be sorted newest first. Measured commits missing from history
/// break the chain: neither neighbouring pair yields a gap.
pub fn coverage_gaps(history: &[CommitInfo], measured: &[CommitInfo]) -> Vec<CoverageGap> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(history.len());
    for (index, commit) in history.iter().enumerate() {
        positions.entry(commit.hash.as_str()).or_insert(index);
    }

    let measured = dedup_by_hash(newest_first(measured.to_vec()));
    measured
        .windows(2)
        .filter_map(|pair| {
            let start_index = *positions.get(pair[0].hash.as_str())?;
            let end_index = *positions.get(pair[1].hash.as_str())?;
            let size = end_index.checked_sub(start_index)?;
            Some(CoverageGap {
                start: pair[0].clone(),
                start_index,
                size,
            })
        })
        .collect()
}

/// Commits that count as covered: the published snapshot plus whatever the
/// workers are measuring right now, when it is part of `history`.
pub fn covered_commits(
    snapshot: Vec<CommitInfo>,
    history: &[CommitInfo],
    in_flight: &[String],
) -> Vec<CommitInfo> {
    let in_flight: HashSet<&str> = in_flight.iter().map(String::as_str).collect();
    let mut covered = snapshot;
    covered.extend(
        history
            .iter()
            .filter(|c| in_flight.contains(c.hash.as_str()))
            .cloned(),
    );
    covered
}

fn newest_first(mut commits: Vec<CommitInfo>) -> Vec<CommitInfo> {
    commits.sort_by(|a, b| b.date.cmp(&a.date));
    commits
}

fn dedup_by_hash(commits: Vec<CommitInfo>) -> Vec<CommitInfo> {
    let mut seen = HashSet::new();
    commits
        .into_iter()
        .filter(|c| seen.insert(c.hash.clone()))
        .collect()
}

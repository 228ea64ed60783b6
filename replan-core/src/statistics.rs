//! Search-effort reporting.
//!
//! A statistics record is produced for every planning attempt, whether or
//! not a plan was found: `SolvingStatistics` describes the effort spent,
//! `SolutionStatistics` additionally carries the objective of the best
//! solution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Effort spent by a solve, available regardless of success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvingStatistics {
    /// Search nodes explored.
    pub nodes: u64,
    /// Backtracks performed.
    pub backtracks: u64,
    /// Wall-clock time spent in the search loop.
    pub elapsed: Duration,
    /// Whether the cooperative time limit truncated the search.
    pub timeout: bool,
}

impl SolvingStatistics {
    /// Fold another solve's effort into this one (used when merging
    /// partition results).
    pub fn merge(&mut self, other: &SolvingStatistics) {
        self.nodes += other.nodes;
        self.backtracks += other.backtracks;
        self.elapsed = self.elapsed.max(other.elapsed);
        self.timeout |= other.timeout;
    }
}

/// Statistics attached to a found solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionStatistics {
    /// Objective value (total action duration) of the retained solution.
    pub objective: i64,
    /// Search nodes explored.
    pub nodes: u64,
    /// Backtracks performed.
    pub backtracks: u64,
    /// Wall-clock time spent in the search loop.
    pub elapsed: Duration,
    /// True when the time limit fired even though a solution exists; the
    /// solution may then be sub-optimal.
    pub hit_limit: bool,
}

impl SolutionStatistics {
    pub fn from_solving(objective: i64, solving: &SolvingStatistics) -> Self {
        Self {
            objective,
            nodes: solving.nodes,
            backtracks: solving.backtracks,
            elapsed: solving.elapsed,
            hit_limit: solving.timeout,
        }
    }

    /// Merge a partition's solution statistics into this one; objectives
    /// add up since partitions are disjoint.
    pub fn merge(&mut self, other: &SolutionStatistics) {
        self.objective += other.objective;
        self.nodes += other.nodes;
        self.backtracks += other.backtracks;
        self.elapsed = self.elapsed.max(other.elapsed);
        self.hit_limit |= other.hit_limit;
    }
}

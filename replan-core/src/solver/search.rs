//! Depth-first search with propagation, branch-and-bound and a cooperative
//! time limit.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::domain::{Contradiction, DomainSnapshot, DomainStore, VarId};
use super::propagation::{propagate_to_fixpoint, Propagator};
use crate::statistics::SolvingStatistics;

/// A variable/value selection goal. Goals are consulted in priority order;
/// the first one returning a decision wins. A goal returns `None` once every
/// variable it is responsible for is fixed.
pub trait Brancher {
    fn decide(&self, store: &DomainStore) -> Option<(VarId, i64)>;
}

/// A fully instantiated assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    values: Vec<i64>,
}

impl Solution {
    fn capture(store: &DomainStore) -> Self {
        let values = (0..store.len())
            .map(|i| {
                let var = VarId(i as u32);
                debug_assert!(store.is_fixed(var), "solution with open variable {var:?}");
                store.lo(var)
            })
            .collect();
        Self { values }
    }

    pub fn value_of(&self, var: VarId) -> i64 {
        self.values[var.index()]
    }
}

/// Search knobs supplied by the planner.
#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    /// Cooperative wall-clock limit; checked once per search node.
    pub time_limit: Option<Duration>,
}

struct Frame {
    snapshot: Vec<DomainSnapshot>,
    var: VarId,
    value: i64,
    refuted: bool,
}

/// Result of a search: the best solution found (with its objective value)
/// and the effort statistics.
pub struct SearchOutcome {
    pub best: Option<(Solution, i64)>,
    pub statistics: SolvingStatistics,
}

/// Minimize `objective` by depth-first branch-and-bound.
///
/// Decisions come from `branchers` in priority order, with an implicit
/// fallback that assigns any remaining open variable to its lower bound.
/// Every improving solution posts `objective < best` before the search
/// resumes.
pub fn minimize(
    store: &mut DomainStore,
    propagators: &[Box<dyn Propagator>],
    branchers: &[Box<dyn Brancher>],
    objective: VarId,
    config: &SearchConfig,
) -> SearchOutcome {
    let started = Instant::now();
    let mut stats = SolvingStatistics::default();
    let mut best: Option<(Solution, i64)> = None;
    let mut stack: Vec<Frame> = Vec::new();

    'search: loop {
        if let Some(limit) = config.time_limit {
            if started.elapsed() >= limit {
                stats.timeout = true;
                break;
            }
        }

        // Bound the objective by the incumbent, then propagate.
        let feasible = bound_and_propagate(store, propagators, objective, best.as_ref());
        if feasible {
            match next_decision(store, branchers) {
                Some((var, value)) => {
                    stats.nodes += 1;
                    trace!(var = var.index(), value, "decision");
                    let snapshot = store.snapshot();
                    let ok = store.fix(var, value).is_ok();
                    stack.push(Frame {
                        snapshot,
                        var,
                        value,
                        refuted: false,
                    });
                    if !ok && !backtrack(store, &mut stack, &mut stats) {
                        break 'search;
                    }
                    continue;
                }
                None => {
                    // Every variable fixed: an improving solution.
                    let objective_value = store.lo(objective);
                    debug!(objective = objective_value, "solution found");
                    best = Some((Solution::capture(store), objective_value));
                    if !backtrack(store, &mut stack, &mut stats) {
                        break 'search;
                    }
                    continue;
                }
            }
        }
        if !backtrack(store, &mut stack, &mut stats) {
            break 'search;
        }
    }

    stats.elapsed = started.elapsed();
    SearchOutcome {
        best,
        statistics: stats,
    }
}

fn bound_and_propagate(
    store: &mut DomainStore,
    propagators: &[Box<dyn Propagator>],
    objective: VarId,
    best: Option<&(Solution, i64)>,
) -> bool {
    if let Some((_, bound)) = best {
        if store.set_hi(objective, bound - 1).is_err() {
            return false;
        }
    }
    propagate_to_fixpoint(propagators, store).is_ok()
}

fn next_decision(
    store: &DomainStore,
    branchers: &[Box<dyn Brancher>],
) -> Option<(VarId, i64)> {
    for brancher in branchers {
        if let Some(decision) = brancher.decide(store) {
            return Some(decision);
        }
    }
    // Fallback: first open variable, lower bound first.
    (0..store.len()).find_map(|i| {
        let var = VarId(i as u32);
        (!store.is_fixed(var)).then(|| (var, store.lo(var)))
    })
}

/// Undo decisions until one can be refuted. Returns false when the tree is
/// exhausted.
fn backtrack(store: &mut DomainStore, stack: &mut Vec<Frame>, stats: &mut SolvingStatistics) -> bool {
    stats.backtracks += 1;
    while let Some(mut frame) = stack.pop() {
        if frame.refuted {
            continue;
        }
        store.restore(&frame.snapshot);
        let removed: Result<bool, Contradiction> = store.remove(frame.var, frame.value);
        frame.refuted = true;
        stack.push(frame);
        match removed {
            Ok(_) => return true,
            // Refutation emptied the domain: keep unwinding.
            Err(Contradiction) => {
                stack.pop();
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::propagation::{NotEqual, Plus};

    #[test]
    fn minimizes_a_simple_sum() {
        let mut store = DomainStore::new();
        let a = store.new_bounds(2, 10);
        let b = store.new_bounds(3, 10);
        let obj = store.new_bounds(0, 20);
        let props: Vec<Box<dyn Propagator>> = vec![Box::new(Plus { a, b, c: obj })];
        let outcome = minimize(&mut store, &props, &[], obj, &SearchConfig::default());
        let (solution, objective) = outcome.best.expect("solution");
        assert_eq!(objective, 5);
        assert_eq!(solution.value_of(a), 2);
        assert_eq!(solution.value_of(b), 3);
        assert!(!outcome.statistics.timeout);
        assert!(outcome.statistics.nodes > 0);
    }

    #[test]
    fn refutes_and_explores_alternatives() {
        let mut store = DomainStore::new();
        let a = store.new_enumerated(0, 1);
        let b = store.new_enumerated(0, 1);
        let obj = store.new_fixed(0);
        let props: Vec<Box<dyn Propagator>> = vec![Box::new(NotEqual { a, b })];
        let outcome = minimize(&mut store, &props, &[], obj, &SearchConfig::default());
        let (solution, _) = outcome.best.expect("solution");
        assert_ne!(solution.value_of(a), solution.value_of(b));
    }

    #[test]
    fn infeasible_problem_reports_no_solution() {
        let mut store = DomainStore::new();
        let a = store.new_fixed(1);
        let b = store.new_fixed(1);
        let obj = store.new_fixed(0);
        let props: Vec<Box<dyn Propagator>> = vec![Box::new(NotEqual { a, b })];
        let outcome = minimize(&mut store, &props, &[], obj, &SearchConfig::default());
        assert!(outcome.best.is_none());
        assert!(!outcome.statistics.timeout);
    }

    #[test]
    fn time_limit_flags_timeout() {
        let mut store = DomainStore::new();
        // Large enough tree that a zero budget trips immediately.
        for _ in 0..8 {
            store.new_bounds(0, 1000);
        }
        let obj = store.new_bounds(0, 1000);
        let config = SearchConfig {
            time_limit: Some(Duration::ZERO),
        };
        let outcome = minimize(&mut store, &[], &[], obj, &config);
        assert!(outcome.statistics.timeout);
    }
}

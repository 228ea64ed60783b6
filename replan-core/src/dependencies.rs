//! Execution ordering: which actions must commit before which.
//!
//! An action acquiring space on a node (a migration or resume towards it, a
//! run on it, its shutdown) depends on every action releasing space on that
//! node (a migration or resume away from it, a stop or suspend on it, its
//! boot) whose finish instant is at or before the acquiring action's start:
//! the plan's timing says that released space is what the acquisition uses.
//! Committing in any dependency-consistent order reaches the same
//! destination as the timed replay.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::plan::{Action, TimedReconfigurationPlan};

/// Dataflow counters over a plan's actions, driven by the executor.
#[derive(Debug, Clone)]
pub struct Dependencies {
    actions: Vec<Action>,
    /// Indices of the actions each action waits for.
    blockers: Vec<Vec<usize>>,
    committed: Vec<bool>,
}

impl Dependencies {
    pub fn from_plan(plan: &TimedReconfigurationPlan) -> Self {
        let actions: Vec<Action> = plan.actions().to_vec();

        // Per node: the actions releasing space on it, with their finish.
        let mut outgoing: FxHashMap<&str, Vec<(usize, u32)>> = FxHashMap::default();
        for (index, action) in actions.iter().enumerate() {
            if let Some(node) = action.kind.outgoing_node() {
                outgoing.entry(node).or_default().push((index, action.finish));
            }
        }

        let mut blockers = vec![Vec::new(); actions.len()];
        for (index, action) in actions.iter().enumerate() {
            let Some(node) = action.kind.incoming_node() else {
                continue;
            };
            for (other, finish) in outgoing.get(node).into_iter().flatten() {
                if *other != index && *finish <= action.start {
                    trace!(blocked = index, on = other, node, "dependency");
                    blockers[index].push(*other);
                }
            }
        }

        let committed = vec![false; actions.len()];
        Self {
            actions,
            blockers,
            committed,
        }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Actions the action at `index` waits for.
    pub fn blockers_of(&self, index: usize) -> &[usize] {
        &self.blockers[index]
    }

    pub fn is_committed(&self, index: usize) -> bool {
        self.committed[index]
    }

    /// Uncommitted actions whose blockers have all committed.
    pub fn ready_set(&self) -> Vec<usize> {
        (0..self.actions.len())
            .filter(|i| {
                !self.committed[*i]
                    && self.blockers[*i].iter().all(|b| self.committed[*b])
            })
            .collect()
    }

    /// Mark an action as executed. Returns false when it is not ready.
    pub fn commit(&mut self, index: usize) -> bool {
        if self.committed[index] || !self.blockers[index].iter().all(|b| self.committed[*b]) {
            return false;
        }
        self.committed[index] = true;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.committed.iter().all(|c| *c)
    }
}

//! Search goals: which variable to branch on next and which value to try.
//!
//! Placement variables come first, in decreasing urgency: VMs managed by a
//! job group, VMs sitting on overloaded nodes, every other hosted VM, then
//! waiting VMs. Start instants follow, earliest lower bound first. Whatever
//! remains (durations, loads, the objective) is fixed by the search
//! fallback.

use rustc_hash::FxHashSet;

use crate::constraints::VJob;
use crate::problem::ReconfigurationProblem;
use crate::solver::{Brancher, DomainStore, VarId};

/// Assigns hoster variables in a fixed order, trying a preferred node first
/// when one is recorded and still available.
pub struct HosterBrancher {
    entries: Vec<(VarId, Option<i64>)>,
}

impl Brancher for HosterBrancher {
    fn decide(&self, store: &DomainStore) -> Option<(VarId, i64)> {
        for (var, preferred) in &self.entries {
            if store.is_fixed(*var) {
                continue;
            }
            if let Some(node) = preferred {
                if store.contains(*var, *node) {
                    return Some((*var, *node));
                }
            }
            return Some((*var, store.lo(*var)));
        }
        None
    }
}

/// Picks the open start variable with the smallest lower bound and tries
/// that bound.
pub struct EarliestStartBrancher {
    starts: Vec<VarId>,
}

impl Brancher for EarliestStartBrancher {
    fn decide(&self, store: &DomainStore) -> Option<(VarId, i64)> {
        self.starts
            .iter()
            .filter(|v| !store.is_fixed(**v))
            .min_by_key(|v| store.lo(**v))
            .map(|v| (*v, store.lo(*v)))
    }
}

/// The prioritized goal list for one problem.
///
/// With `repair` on, every hosted VM first tries to stay where it is;
/// otherwise placement is plain first-fit by node index.
pub fn build_branchers(
    problem: &ReconfigurationProblem,
    jobs: &[VJob],
    repair: bool,
) -> Vec<Box<dyn Brancher>> {
    let source = problem.source();
    let overloaded: FxHashSet<&str> = source
        .nodes()
        .iter()
        .filter(|n| source.free_cpu(&n.name) < 0 || source.free_memory(&n.name) < 0)
        .map(|n| n.name.as_str())
        .collect();

    let slices = problem.slices();
    let preference = |model: &crate::actions::VmActionModel| {
        if repair {
            model.current_host().map(|i| i as i64)
        } else {
            None
        }
    };

    let mut seen: FxHashSet<VarId> = FxHashSet::default();
    let mut grouped = Vec::new();
    let mut urgent = Vec::new();
    let mut hosted = Vec::new();
    let mut waiting = Vec::new();

    // VJob members keep their queue order.
    for job in jobs {
        for vm in &job.vms {
            let Some(model) = problem.vm_models().iter().find(|m| m.vm().name == *vm) else {
                continue;
            };
            if let Some(var) = model.hoster_var(slices) {
                if seen.insert(var) {
                    grouped.push((var, preference(model)));
                }
            }
        }
    }

    for model in problem.vm_models() {
        let Some(var) = model.hoster_var(slices) else {
            continue;
        };
        if seen.contains(&var) {
            continue;
        }
        let current = model
            .current_host()
            .map(|i| problem.node_at(i).name.as_str());
        if current.is_some_and(|n| overloaded.contains(n)) {
            seen.insert(var);
            urgent.push((var, preference(model)));
        }
    }

    for model in problem.vm_models() {
        let Some(var) = model.hoster_var(slices) else {
            continue;
        };
        if seen.contains(&var) {
            continue;
        }
        seen.insert(var);
        if model.current_host().is_some() {
            hosted.push((var, preference(model)));
        } else {
            waiting.push((var, None));
        }
    }

    let starts: Vec<VarId> = problem
        .demanding_slices()
        .map(|s| s.start)
        .collect();

    let mut branchers: Vec<Box<dyn Brancher>> = Vec::new();
    for entries in [grouped, urgent, hosted, waiting] {
        if !entries.is_empty() {
            branchers.push(Box::new(HosterBrancher { entries }));
        }
    }
    branchers.push(Box::new(EarliestStartBrancher { starts }));
    branchers
}

//! Placement constraints and VM jobs.
//!
//! A constraint names VMs and nodes, and posts itself onto a
//! [`ReconfigurationProblem`] either by filtering hoster domains directly or
//! by installing a propagator. Constraints only bind VMs that are running in
//! the target state; naming an unknown VM or node is a malformed constraint.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::problem::ReconfigurationProblem;
use crate::solver::propagation::{DisjointGroups, NotEqual, WithinOneGroup};
use crate::solver::VarId;

/// A placement rule over VM and node names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlacementConstraint {
    /// The VMs may only run on the listed nodes.
    Fence { vms: Vec<String>, nodes: Vec<String> },
    /// The VMs must avoid the listed nodes.
    Ban { vms: Vec<String>, nodes: Vec<String> },
    /// Pairwise distinct hosts for the VMs.
    Spread { vms: Vec<String> },
    /// The two VM groups never share a node.
    Split { left: Vec<String>, right: Vec<String> },
    /// Nodes hosting these VMs host no other VM.
    Lonely { vms: Vec<String> },
    /// All VMs land inside a single one of the node groups.
    OneOf {
        vms: Vec<String>,
        groups: Vec<Vec<String>>,
    },
}

impl PlacementConstraint {
    /// Short identifier used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            PlacementConstraint::Fence { .. } => "fence",
            PlacementConstraint::Ban { .. } => "ban",
            PlacementConstraint::Spread { .. } => "spread",
            PlacementConstraint::Split { .. } => "split",
            PlacementConstraint::Lonely { .. } => "lonely",
            PlacementConstraint::OneOf { .. } => "one_of",
        }
    }

    /// Every VM the constraint involves, for partitioning.
    pub fn vms(&self) -> Vec<&str> {
        match self {
            PlacementConstraint::Fence { vms, .. }
            | PlacementConstraint::Ban { vms, .. }
            | PlacementConstraint::Spread { vms }
            | PlacementConstraint::Lonely { vms }
            | PlacementConstraint::OneOf { vms, .. } => {
                vms.iter().map(String::as_str).collect()
            }
            PlacementConstraint::Split { left, right } => left
                .iter()
                .chain(right.iter())
                .map(String::as_str)
                .collect(),
        }
    }

    /// Every node the constraint involves, for partitioning.
    pub fn nodes(&self) -> Vec<&str> {
        match self {
            PlacementConstraint::Fence { nodes, .. }
            | PlacementConstraint::Ban { nodes, .. } => {
                nodes.iter().map(String::as_str).collect()
            }
            PlacementConstraint::OneOf { groups, .. } => groups
                .iter()
                .flat_map(|g| g.iter().map(String::as_str))
                .collect(),
            PlacementConstraint::Spread { .. }
            | PlacementConstraint::Split { .. }
            | PlacementConstraint::Lonely { .. } => Vec::new(),
        }
    }

    /// Install the constraint on a built problem.
    pub fn post(&self, problem: &mut ReconfigurationProblem) -> Result<()> {
        debug!(constraint = self.kind(), "posting placement constraint");
        match self {
            PlacementConstraint::Fence { vms, nodes } => {
                let allowed = self.node_indices(problem, nodes)?;
                for var in self.bound_hosters(problem, vms)? {
                    problem.restrict_hoster(var, &allowed)?;
                }
                Ok(())
            }
            PlacementConstraint::Ban { vms, nodes } => {
                let banned = self.node_indices(problem, nodes)?;
                for var in self.bound_hosters(problem, vms)? {
                    problem.deny_hoster(var, &banned)?;
                }
                Ok(())
            }
            PlacementConstraint::Spread { vms } => {
                let hosters = self.bound_hosters(problem, vms)?;
                for i in 0..hosters.len() {
                    for j in i + 1..hosters.len() {
                        problem.add_propagator(Box::new(NotEqual {
                            a: hosters[i],
                            b: hosters[j],
                        }));
                    }
                }
                Ok(())
            }
            PlacementConstraint::Split { left, right } => {
                let left = self.bound_hosters(problem, left)?;
                let right = self.bound_hosters(problem, right)?;
                if !left.is_empty() && !right.is_empty() {
                    problem.add_propagator(Box::new(DisjointGroups { left, right }));
                }
                Ok(())
            }
            PlacementConstraint::Lonely { vms } => {
                let members: FxHashSet<&str> = vms.iter().map(String::as_str).collect();
                for vm in vms {
                    if !problem.knows_vm(vm) {
                        return self.unknown_vm(vm);
                    }
                }
                let left = self.bound_hosters(problem, vms)?;
                let right: Vec<VarId> = problem
                    .vm_hosters()
                    .into_iter()
                    .filter(|(name, _)| !members.contains(name.as_str()))
                    .map(|(_, var)| var)
                    .collect();
                if !left.is_empty() && !right.is_empty() {
                    problem.add_propagator(Box::new(DisjointGroups { left, right }));
                }
                Ok(())
            }
            PlacementConstraint::OneOf { vms, groups } => {
                let vars = self.bound_hosters(problem, vms)?;
                let mut candidate_groups = Vec::with_capacity(groups.len());
                for group in groups {
                    let indices = self.node_indices(problem, group)?;
                    candidate_groups.push(indices.into_iter().map(|i| i as i64).collect());
                }
                if !vars.is_empty() {
                    problem.add_propagator(Box::new(WithinOneGroup {
                        vars,
                        groups: candidate_groups,
                    }));
                }
                Ok(())
            }
        }
    }

    /// Resolve node names, erroring on unknown ones.
    fn node_indices(
        &self,
        problem: &ReconfigurationProblem,
        nodes: &[String],
    ) -> Result<Vec<usize>> {
        nodes
            .iter()
            .map(|name| {
                problem
                    .node_index(name)
                    .ok_or_else(|| PlanError::MalformedConstraint {
                        constraint: self.kind().to_string(),
                        reason: format!("unknown node '{name}'"),
                    })
            })
            .collect()
    }

    /// Hoster variables of the named VMs that are running in the target
    /// state. Unknown VMs are malformed; known VMs that end up stopped or
    /// sleeping have no placement to constrain and are skipped.
    fn bound_hosters(
        &self,
        problem: &ReconfigurationProblem,
        vms: &[String],
    ) -> Result<Vec<VarId>> {
        let mut hosters = Vec::with_capacity(vms.len());
        for vm in vms {
            if !problem.knows_vm(vm) {
                return self.unknown_vm(vm);
            }
            if let Some(var) = problem.hoster_of(vm) {
                hosters.push(var);
            }
        }
        Ok(hosters)
    }

    fn unknown_vm<T>(&self, vm: &str) -> Result<T> {
        Err(PlanError::MalformedConstraint {
            constraint: self.kind().to_string(),
            reason: format!("unknown virtual machine '{vm}'"),
        })
    }
}

/// A named group of VMs managed together, with the constraints that travel
/// with it through queueing and partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VJob {
    pub name: String,
    pub vms: Vec<String>,
    pub constraints: Vec<PlacementConstraint>,
}

impl VJob {
    pub fn new(name: impl Into<String>, vms: Vec<String>) -> Self {
        Self {
            name: name.into(),
            vms,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: PlacementConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(PlacementConstraint::Spread { vms: Vec::new() } => "spread")]
    #[test_case(PlacementConstraint::Lonely { vms: Vec::new() } => "lonely")]
    #[test_case(PlacementConstraint::Split { left: Vec::new(), right: Vec::new() } => "split")]
    fn kind_labels(constraint: PlacementConstraint) -> &'static str {
        constraint.kind()
    }

    #[test]
    fn split_reports_both_sides() {
        let c = PlacementConstraint::Split {
            left: vec!["vm1".into()],
            right: vec!["vm2".into(), "vm3".into()],
        };
        assert_eq!(c.vms(), vec!["vm1", "vm2", "vm3"]);
        assert!(c.nodes().is_empty());
    }

    #[test]
    fn one_of_reports_all_group_nodes() {
        let c = PlacementConstraint::OneOf {
            vms: vec!["vm1".into()],
            groups: vec![vec!["n1".into(), "n2".into()], vec!["n3".into()]],
        };
        assert_eq!(c.nodes(), vec!["n1", "n2", "n3"]);
        assert_eq!(c.kind(), "one_of");
    }

    #[test]
    fn constraints_round_trip_through_serde() {
        let c = PlacementConstraint::Fence {
            vms: vec!["vm1".into()],
            nodes: vec!["n1".into()],
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: PlacementConstraint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}

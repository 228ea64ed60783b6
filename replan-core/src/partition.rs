//! Constraint-connectivity splitting: solve independent parts of the
//! datacenter on worker threads.
//!
//! VMs and nodes connected through a constraint or a job belong to the same
//! component. A component is planned on its own when its VMs are all fenced
//! inside the component's nodes and currently hosted there; everything else
//! lands in a residual partition. Sub-plans and statistics merge after the
//! workers join, objectives adding up since the parts share nothing.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use crate::configuration::{Configuration, VmState};
use crate::constraints::{PlacementConstraint, VJob};
use crate::durations::DurationEvaluator;
use crate::error::{PlanError, Result};
use crate::plan::TimedReconfigurationPlan;
use crate::planner::{PlannedReconfiguration, Planner};
use crate::problem::NextStateSpec;

struct UnionFind {
    parent: Vec<usize>,
    ids: FxHashMap<String, usize>,
}

impl UnionFind {
    fn new() -> Self {
        Self {
            parent: Vec::new(),
            ids: FxHashMap::default(),
        }
    }

    fn id(&mut self, key: String) -> usize {
        let next = self.parent.len();
        match self.ids.entry(key) {
            std::collections::hash_map::Entry::Occupied(e) => *e.get(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(next);
                self.parent.push(next);
                next
            }
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra] = rb;
        }
    }

    fn root_of(&mut self, key: &str) -> Option<usize> {
        self.ids.get(key).copied().map(|id| self.find(id))
    }
}

fn vm_key(name: &str) -> String {
    format!("v:{name}")
}

fn node_key(name: &str) -> String {
    format!("n:{name}")
}

#[derive(Default)]
struct Component {
    vms: FxHashSet<String>,
    nodes: FxHashSet<String>,
    constraints: Vec<usize>,
    jobs: Vec<usize>,
}

/// Everything one worker needs, with owned copies so workers share nothing
/// mutable.
struct PartitionInput {
    source: Configuration,
    next: NextStateSpec,
    constraints: Vec<PlacementConstraint>,
    jobs: Vec<VJob>,
}

pub(crate) fn plan_partitioned<E: DurationEvaluator>(
    planner: &Planner<E>,
    source: &Configuration,
    next: &NextStateSpec,
    constraints: &[PlacementConstraint],
    jobs: &[VJob],
) -> Result<PlannedReconfiguration> {
    let parts = split(source, next, constraints, jobs)?;
    if parts.len() < 2 {
        return planner.plan_part(source, next, constraints, jobs);
    }
    info!(partitions = parts.len(), "planning partitions in parallel");

    let results: Vec<Result<PlannedReconfiguration>> = std::thread::scope(|scope| {
        let handles: Vec<_> = parts
            .iter()
            .map(|part| {
                scope.spawn(move || {
                    planner.plan_part(&part.source, &part.next, &part.constraints, &part.jobs)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| PlanError::PartitionFailure)
                    .and_then(|r| r)
            })
            .collect()
    });

    let mut plan = TimedReconfigurationPlan::new(source.clone());
    let mut statistics = None;
    for result in results {
        let planned = result?;
        for action in planned.plan.actions() {
            plan.add(action.clone());
        }
        match &mut statistics {
            None => statistics = Some(planned.statistics),
            Some(total) => total.merge(&planned.statistics),
        }
    }
    let statistics = statistics.ok_or(PlanError::PartitionFailure)?;
    Ok(PlannedReconfiguration { plan, statistics })
}

/// Split the inputs into independent partitions. Fewer than two means
/// partitioning found nothing separable.
fn split(
    source: &Configuration,
    next: &NextStateSpec,
    constraints: &[PlacementConstraint],
    jobs: &[VJob],
) -> Result<Vec<PartitionInput>> {
    let mut uf = UnionFind::new();
    for constraint in constraints {
        let mut entities: Vec<usize> = constraint
            .vms()
            .into_iter()
            .map(|v| uf.id(vm_key(v)))
            .collect();
        entities.extend(constraint.nodes().into_iter().map(|n| uf.id(node_key(n))));
        for window in entities.windows(2) {
            uf.union(window[0], window[1]);
        }
    }
    for job in jobs {
        let ids: Vec<usize> = job.vms.iter().map(|v| uf.id(vm_key(v))).collect();
        for window in ids.windows(2) {
            uf.union(window[0], window[1]);
        }
    }

    // Gather the drafts by component root.
    let mut components: FxHashMap<usize, Component> = FxHashMap::default();
    for (index, constraint) in constraints.iter().enumerate() {
        let Some(root) = constraint
            .vms()
            .first()
            .and_then(|v| uf.root_of(&vm_key(v)))
        else {
            continue;
        };
        let component = components.entry(root).or_default();
        component
            .vms
            .extend(constraint.vms().into_iter().map(str::to_string));
        component
            .nodes
            .extend(constraint.nodes().into_iter().map(str::to_string));
        component.constraints.push(index);
    }
    for (index, job) in jobs.iter().enumerate() {
        let Some(root) = job.vms.first().and_then(|v| uf.root_of(&vm_key(v))) else {
            continue;
        };
        if let Some(component) = components.get_mut(&root) {
            component.vms.extend(job.vms.iter().cloned());
            component.jobs.push(index);
        }
    }

    // Keep the components that are provably self-contained.
    let fenced: FxHashMap<&str, Vec<usize>> = fence_index(constraints);
    let mut separable: Vec<Component> = Vec::new();
    for (_, component) in components {
        if component.nodes.is_empty() {
            continue;
        }
        if is_separable(source, &component, constraints, &fenced) {
            separable.push(component);
        }
    }

    // Pull VMs hosted on a component's nodes into it; a pulled VM that is
    // constrained elsewhere would tie the component back to the rest, so
    // such components dissolve into the residual.
    let constrained: FxHashSet<&str> = constraints
        .iter()
        .flat_map(|c| c.vms())
        .collect();
    let mut kept: Vec<Component> = Vec::new();
    'component: for mut component in separable {
        let mut pulled = Vec::new();
        for vm in source.vms() {
            if component.vms.contains(&vm.name) {
                continue;
            }
            if let Some(location) = source.location_of(&vm.name) {
                if component.nodes.contains(location) {
                    if constrained.contains(vm.name.as_str()) {
                        continue 'component;
                    }
                    pulled.push(vm.name.clone());
                }
            }
        }
        component.vms.extend(pulled);
        kept.push(component);
    }

    if kept.is_empty() {
        return Ok(Vec::new());
    }

    let claimed_vms: FxHashSet<&String> = kept.iter().flat_map(|c| c.vms.iter()).collect();
    let claimed_nodes: FxHashSet<&String> = kept.iter().flat_map(|c| c.nodes.iter()).collect();
    let claimed_constraints: FxHashSet<usize> =
        kept.iter().flat_map(|c| c.constraints.iter().copied()).collect();
    let claimed_jobs: FxHashSet<usize> = kept.iter().flat_map(|c| c.jobs.iter().copied()).collect();

    let mut parts = Vec::with_capacity(kept.len() + 1);
    for component in &kept {
        debug!(
            vms = component.vms.len(),
            nodes = component.nodes.len(),
            "separable partition"
        );
        parts.push(build_input(
            source,
            next,
            constraints,
            jobs,
            |vm| component.vms.contains(vm),
            |node| component.nodes.contains(node),
            |ci| component.constraints.contains(&ci),
            |ji| component.jobs.contains(&ji),
        )?);
    }

    // Residual: everything not claimed by a separable component.
    let residual_nodes: Vec<&str> = source
        .nodes()
        .iter()
        .map(|n| n.name.as_str())
        .filter(|n| !claimed_nodes.contains(&n.to_string()))
        .collect();
    if residual_nodes.is_empty() {
        // Every node is claimed. An unclaimed entity with a wanted state
        // would fall out of all partitions, so the split is unsound and the
        // problem must be planned whole.
        let leftover = next.vms().any(|vm| !claimed_vms.contains(&vm.to_string()))
            || next
                .online
                .iter()
                .chain(next.offline.iter())
                .any(|node| !claimed_nodes.contains(node));
        if leftover {
            debug!("unclaimed work but no residual nodes, not partitioning");
            return Ok(Vec::new());
        }
    } else {
        parts.push(build_input(
            source,
            next,
            constraints,
            jobs,
            |vm| !claimed_vms.contains(&vm.to_string()),
            |node| !claimed_nodes.contains(&node.to_string()),
            |ci| !claimed_constraints.contains(&ci),
            |ji| !claimed_jobs.contains(&ji),
        )?);
    }
    Ok(parts)
}

/// Map VM name to the fence constraints naming it.
fn fence_index(constraints: &[PlacementConstraint]) -> FxHashMap<&str, Vec<usize>> {
    let mut index: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
    for (ci, constraint) in constraints.iter().enumerate() {
        if let PlacementConstraint::Fence { vms, .. } = constraint {
            for vm in vms {
                index.entry(vm.as_str()).or_default().push(ci);
            }
        }
    }
    index
}

/// A component stands alone when each of its VMs is fenced inside the
/// component's nodes and currently hosted (if hosted at all) inside them.
fn is_separable(
    source: &Configuration,
    component: &Component,
    constraints: &[PlacementConstraint],
    fenced: &FxHashMap<&str, Vec<usize>>,
) -> bool {
    for vm in &component.vms {
        let covered = fenced
            .get(vm.as_str())
            .is_some_and(|fences| {
                fences.iter().any(|ci| {
                    component.constraints.contains(ci)
                        && constraints[*ci]
                            .nodes()
                            .iter()
                            .all(|n| component.nodes.contains(*n))
                })
            });
        if !covered {
            return false;
        }
        if let Some(location) = source.location_of(vm) {
            if !component.nodes.contains(location) {
                return false;
            }
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn build_input(
    source: &Configuration,
    next: &NextStateSpec,
    constraints: &[PlacementConstraint],
    jobs: &[VJob],
    keep_vm: impl Fn(&str) -> bool,
    keep_node: impl Fn(&str) -> bool,
    keep_constraint: impl Fn(usize) -> bool,
    keep_job: impl Fn(usize) -> bool,
) -> Result<PartitionInput> {
    let mut cfg = Configuration::new();
    for node in source.nodes() {
        if !keep_node(&node.name) {
            continue;
        }
        if source.is_online(&node.name) {
            cfg.add_online(node.clone());
        } else {
            cfg.add_offline(node.clone());
        }
    }
    for vm in source.vms() {
        if !keep_vm(&vm.name) {
            continue;
        }
        match source.state_of(&vm.name) {
            Some(VmState::Running) => {
                let location = source.location_of(&vm.name).unwrap_or_default();
                cfg.set_run_on(vm.clone(), location)?;
            }
            Some(VmState::Sleeping) => {
                let location = source.location_of(&vm.name).unwrap_or_default();
                cfg.set_sleep_on(vm.clone(), location)?;
            }
            Some(VmState::Waiting) => cfg.add_waiting(vm.clone()),
            Some(VmState::Terminated) | None => {}
        }
    }

    let filtered = NextStateSpec {
        to_run: next.to_run.iter().filter(|v| keep_vm(v)).cloned().collect(),
        to_sleep: next.to_sleep.iter().filter(|v| keep_vm(v)).cloned().collect(),
        to_terminate: next
            .to_terminate
            .iter()
            .filter(|v| keep_vm(v))
            .cloned()
            .collect(),
        online: next.online.iter().filter(|n| keep_node(n)).cloned().collect(),
        offline: next.offline.iter().filter(|n| keep_node(n)).cloned().collect(),
    };

    let kept_constraints = constraints
        .iter()
        .enumerate()
        .filter(|(ci, _)| keep_constraint(*ci))
        .map(|(_, c)| c.clone())
        .collect();
    let kept_jobs = jobs
        .iter()
        .enumerate()
        .filter(|(ji, _)| keep_job(*ji))
        .map(|(_, j)| j.clone())
        .collect();

    Ok(PartitionInput {
        source: cfg,
        next: filtered,
        constraints: kept_constraints,
        jobs: kept_jobs,
    })
}

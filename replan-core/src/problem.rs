//! The reconfiguration problem: a CSP built from a snapshot and the wanted
//! next states.
//!
//! Building instantiates one action model per VM or node whose state
//! changes, wires slice arithmetic and duration channels, and posts the
//! bin-packing and slice-scheduling propagators. Solving minimizes the sum
//! of action completion instants.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::{
    BootModel, MigrationModel, NodeActionModel, ResumeModel, RunModel, ShutdownModel, StopModel,
    SuspendModel, VmActionModel,
};
use crate::configuration::{Configuration, Node, VirtualMachine, VmState};
use crate::durations::DurationEvaluator;
use crate::error::{PlanError, Result};
use crate::packing::{BinPacking, PackItem};
use crate::plan::{Action, TimedReconfigurationPlan};
use crate::scheduling::{is_satisfied, NodeCapacity, PlacedSlice, SchedSlice, SliceScheduler};
use crate::slice::{Slice, SliceId};
use crate::solver::propagation::{MaxOf, Plus, SelectDuration, SumOf};
use crate::solver::{
    minimize, Brancher, DomainStore, Propagator, SearchConfig, SearchOutcome, Solution, VarId,
};

/// The wanted next state, as entity names. Entities left unnamed keep their
/// current state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextStateSpec {
    pub to_run: Vec<String>,
    pub to_sleep: Vec<String>,
    pub to_terminate: Vec<String>,
    pub online: Vec<String>,
    pub offline: Vec<String>,
}

impl NextStateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, vm: impl Into<String>) -> Self {
        self.to_run.push(vm.into());
        self
    }

    pub fn sleep(mut self, vm: impl Into<String>) -> Self {
        self.to_sleep.push(vm.into());
        self
    }

    pub fn terminate(mut self, vm: impl Into<String>) -> Self {
        self.to_terminate.push(vm.into());
        self
    }

    pub fn set_online(mut self, node: impl Into<String>) -> Self {
        self.online.push(node.into());
        self
    }

    pub fn set_offline(mut self, node: impl Into<String>) -> Self {
        self.offline.push(node.into());
        self
    }

    /// Every VM named in the wanted states.
    pub fn vms(&self) -> impl Iterator<Item = &str> {
        self.to_run
            .iter()
            .chain(self.to_sleep.iter())
            .chain(self.to_terminate.iter())
            .map(String::as_str)
    }
}

/// Classified state change of one VM, with its evaluated durations.
enum VmTransition {
    Migrate { duration: u32 },
    Start { duration: u32 },
    Halt { duration: u32 },
    Suspend { duration: u32 },
    Resume { local: u32, remote: u32 },
}

impl VmTransition {
    fn horizon_share(&self) -> u32 {
        match self {
            VmTransition::Migrate { duration }
            | VmTransition::Start { duration }
            | VmTransition::Halt { duration }
            | VmTransition::Suspend { duration } => *duration,
            VmTransition::Resume { local, remote } => (*local).max(*remote),
        }
    }
}

pub struct ReconfigurationProblem {
    source: Configuration,
    nodes: Vec<Node>,
    node_idx: FxHashMap<String, usize>,
    horizon: u32,
    store: DomainStore,
    slices: Vec<Slice>,
    propagators: Vec<Box<dyn Propagator>>,
    vm_models: Vec<VmActionModel>,
    vm_model_idx: FxHashMap<String, usize>,
    node_models: Vec<NodeActionModel>,
    node_model_idx: FxHashMap<String, usize>,
    /// Demanding hoster variable back to its VM, for error reporting.
    hoster_owner: FxHashMap<VarId, String>,
    end: VarId,
    total_duration: VarId,
}

impl ReconfigurationProblem {
    /// Build the CSP for turning `source` into a snapshot satisfying
    /// `next`. `horizon_override` replaces the computed worst-case horizon.
    pub fn build(
        source: &Configuration,
        next: &NextStateSpec,
        durations: &dyn DurationEvaluator,
        horizon_override: Option<u32>,
    ) -> Result<Self> {
        source.check_viability()?;
        let target_states = Self::vm_targets(source, next)?;
        let node_targets = Self::node_targets(source, next)?;

        let nodes: Vec<Node> = source.nodes().to_vec();
        let node_idx: FxHashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), i))
            .collect();
        // Where a VM may run once the plan completes.
        let dest_online: Vec<bool> = nodes
            .iter()
            .map(|n| match node_targets.get(n.name.as_str()) {
                Some(online) => *online,
                None => source.is_online(&n.name),
            })
            .collect();

        let vm_entries = Self::classify_vms(source, &target_states, &node_targets, durations)?;
        let node_entries = Self::classify_nodes(source, &node_targets, durations)?;

        let needed: u64 = vm_entries
            .iter()
            .map(|(_, _, t)| t.horizon_share() as u64)
            .chain(node_entries.iter().map(|(_, _, _, d)| *d as u64))
            .sum();
        let horizon =
            horizon_override.unwrap_or_else(|| u32::try_from(needed + 1).unwrap_or(u32::MAX));
        debug!(
            horizon,
            vm_changes = vm_entries.len(),
            node_changes = node_entries.len(),
            "building reconfiguration problem"
        );

        let mut problem = Self {
            source: source.clone(),
            nodes,
            node_idx,
            horizon,
            store: DomainStore::new(),
            slices: Vec::new(),
            propagators: Vec::new(),
            vm_models: Vec::new(),
            vm_model_idx: FxHashMap::default(),
            node_models: Vec::new(),
            node_model_idx: FxHashMap::default(),
            hoster_owner: FxHashMap::default(),
            end: VarId(0),
            total_duration: VarId(0),
        };

        for (node, index, boot, duration) in node_entries {
            problem.install_node_model(node, index, boot, duration)?;
        }
        for (vm, src, transition) in vm_entries {
            problem.install_vm_model(vm, src, transition, &dest_online)?;
        }
        problem.install_objective();
        problem.install_packing()?;
        problem.install_scheduler();
        Ok(problem)
    }

    /// Resolve the wanted VM states, rejecting duplicates and unknowns.
    fn vm_targets<'a>(
        source: &Configuration,
        next: &'a NextStateSpec,
    ) -> Result<FxHashMap<&'a str, VmState>> {
        let mut targets = FxHashMap::default();
        let groups = [
            (&next.to_run, VmState::Running),
            (&next.to_sleep, VmState::Sleeping),
            (&next.to_terminate, VmState::Terminated),
        ];
        for (names, state) in groups {
            for name in names {
                if source.vm(name).is_none() {
                    return Err(PlanError::UnknownEntity {
                        entity: name.clone(),
                    });
                }
                if targets.insert(name.as_str(), state).is_some() {
                    return Err(PlanError::MultipleResultingState {
                        entity: name.clone(),
                    });
                }
            }
        }
        Ok(targets)
    }

    /// Resolve the wanted node memberships (`true` = online).
    fn node_targets<'a>(
        source: &Configuration,
        next: &'a NextStateSpec,
    ) -> Result<FxHashMap<&'a str, bool>> {
        let mut targets = FxHashMap::default();
        for (names, online) in [(&next.online, true), (&next.offline, false)] {
            for name in names {
                if source.node(name).is_none() {
                    return Err(PlanError::UnknownEntity {
                        entity: name.clone(),
                    });
                }
                if targets.insert(name.as_str(), online).is_some() {
                    return Err(PlanError::MultipleResultingState {
                        entity: name.clone(),
                    });
                }
            }
        }
        Ok(targets)
    }

    fn classify_vms(
        source: &Configuration,
        targets: &FxHashMap<&str, VmState>,
        node_targets: &FxHashMap<&str, bool>,
        durations: &dyn DurationEvaluator,
    ) -> Result<Vec<(VirtualMachine, Option<usize>, VmTransition)>> {
        let going_offline =
            |node: &str| node_targets.get(node) == Some(&false);
        let mut entries = Vec::new();
        for vm in source.vms() {
            let current = source.state_of(&vm.name).ok_or_else(|| {
                PlanError::UnknownResultingState {
                    entity: vm.name.clone(),
                }
            })?;
            let wanted = targets.get(vm.name.as_str()).copied().unwrap_or(current);
            let location = source.location_of(&vm.name);
            let transition = match (current, wanted) {
                (VmState::Running, VmState::Running) => Some(VmTransition::Migrate {
                    duration: durations.migration(vm)?,
                }),
                (VmState::Waiting, VmState::Running) => Some(VmTransition::Start {
                    duration: durations.run(vm)?,
                }),
                (VmState::Sleeping, VmState::Running) => Some(VmTransition::Resume {
                    local: durations.local_resume(vm)?,
                    remote: durations.remote_resume(vm)?,
                }),
                (VmState::Running, VmState::Sleeping) => {
                    // The VM sleeps where it is; that node must stay online.
                    if location.is_some_and(&going_offline) {
                        return Err(PlanError::InconsistentModel {
                            entity: vm.name.clone(),
                            details: "cannot suspend on a node going offline".into(),
                        });
                    }
                    Some(VmTransition::Suspend {
                        duration: durations.suspend(vm)?,
                    })
                }
                (VmState::Running, VmState::Terminated) => Some(VmTransition::Halt {
                    duration: durations.stop(vm)?,
                }),
                (VmState::Sleeping, VmState::Sleeping) => {
                    if location.is_some_and(&going_offline) {
                        return Err(PlanError::InconsistentModel {
                            entity: vm.name.clone(),
                            details: "sleeping on a node going offline".into(),
                        });
                    }
                    None
                }
                (VmState::Waiting, VmState::Waiting)
                | (VmState::Terminated, VmState::Terminated) => None,
                (from, to) => {
                    return Err(PlanError::InconsistentModel {
                        entity: vm.name.clone(),
                        details: format!("unsupported transition {from:?} -> {to:?}"),
                    })
                }
            };
            if let Some(transition) = transition {
                entries.push((vm.clone(), location.map(str::to_string), transition));
            }
        }
        // Resolve locations to indices afterwards so classification stays a
        // pure read over the snapshot.
        let node_idx: FxHashMap<&str, usize> = source
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.as_str(), i))
            .collect();
        Ok(entries
            .into_iter()
            .map(|(vm, loc, t)| {
                let src = loc.as_deref().and_then(|n| node_idx.get(n).copied());
                (vm, src, t)
            })
            .collect())
    }

    fn classify_nodes(
        source: &Configuration,
        targets: &FxHashMap<&str, bool>,
        durations: &dyn DurationEvaluator,
    ) -> Result<Vec<(Node, usize, bool, u32)>> {
        let mut entries = Vec::new();
        for (index, node) in source.nodes().iter().enumerate() {
            let Some(&online) = targets.get(node.name.as_str()) else {
                continue;
            };
            if online && source.is_offline(&node.name) {
                entries.push((node.clone(), index, true, durations.startup(node)?));
            } else if !online && source.is_online(&node.name) {
                entries.push((node.clone(), index, false, durations.shutdown(node)?));
            }
        }
        Ok(entries)
    }

    fn push_slice(&mut self, slice: Slice) -> SliceId {
        self.slices.push(slice);
        SliceId(self.slices.len() - 1)
    }

    /// Tie a slice's interval arithmetic together.
    fn link_slice(&mut self, id: SliceId) {
        let slice = &self.slices[id.index()];
        self.propagators.push(Box::new(Plus {
            a: slice.start,
            b: slice.duration,
            c: slice.end,
        }));
    }

    /// New demanding slice restricted to the destination-online nodes.
    fn demanding_slice(
        &mut self,
        vm: &VirtualMachine,
        dest_online: &[bool],
    ) -> Result<SliceId> {
        // An empty node set has no hoster domain to build.
        if self.nodes.is_empty() {
            return Err(PlanError::NoViableHost {
                vm: vm.name.clone(),
            });
        }
        let slice = Slice::demanding(
            &mut self.store,
            format!("d({})", vm.name),
            self.nodes.len(),
            self.horizon,
            vm.cpu_demand,
            vm.memory_demand,
        );
        for (index, online) in dest_online.iter().enumerate() {
            if !online {
                self.store
                    .remove(slice.hoster, index as i64)
                    .map_err(|_| PlanError::NoViableHost {
                        vm: vm.name.clone(),
                    })?;
            }
        }
        self.hoster_owner.insert(slice.hoster, vm.name.clone());
        let id = self.push_slice(slice);
        self.link_slice(id);
        Ok(id)
    }

    fn consuming_slice(&mut self, vm: &VirtualMachine, src: usize) -> SliceId {
        let slice = Slice::consuming(
            &mut self.store,
            format!("c({})", vm.name),
            src,
            self.horizon,
            vm.cpu_consumption,
            vm.memory_consumption,
        );
        let id = self.push_slice(slice);
        self.link_slice(id);
        id
    }

    fn inconsistent(&self, entity: &str, details: &str) -> PlanError {
        PlanError::InconsistentModel {
            entity: entity.to_string(),
            details: details.to_string(),
        }
    }

    fn install_vm_model(
        &mut self,
        vm: VirtualMachine,
        src: Option<usize>,
        transition: VmTransition,
        dest_online: &[bool],
    ) -> Result<()> {
        let name = vm.name.clone();
        let model = match transition {
            VmTransition::Migrate { duration } => {
                let src = src.ok_or_else(|| self.inconsistent(&name, "running VM without a location"))?;
                let demanding = self.demanding_slice(&vm, dest_online)?;
                let consuming = self.consuming_slice(&vm, src);
                let dvar = self.store.new_bounds(0, duration as i64);
                let d_slice = &self.slices[demanding.index()];
                let c_slice = &self.slices[consuming.index()];
                self.propagators.push(Box::new(SelectDuration {
                    selector: d_slice.hoster,
                    reference: src as i64,
                    eq_value: 0,
                    ne_value: duration as i64,
                    out: dvar,
                }));
                self.propagators.push(Box::new(Plus {
                    a: d_slice.start,
                    b: dvar,
                    c: c_slice.end,
                }));
                let finish = c_slice.end;
                VmActionModel::Migration(MigrationModel {
                    vm,
                    source: src,
                    demanding,
                    consuming,
                    duration: dvar,
                    finish,
                })
            }
            VmTransition::Start { duration } => {
                let demanding = self.demanding_slice(&vm, dest_online)?;
                let d_slice = &self.slices[demanding.index()];
                let start = d_slice.start;
                let dvar = self.store.new_fixed(duration as i64);
                let finish = self.store.new_bounds(0, self.horizon as i64);
                self.propagators.push(Box::new(Plus {
                    a: start,
                    b: dvar,
                    c: finish,
                }));
                self.store
                    .set_hi(start, self.horizon as i64 - duration as i64)
                    .map_err(|_| self.inconsistent(&name, "run duration exceeds the horizon"))?;
                VmActionModel::Run(RunModel {
                    vm,
                    demanding,
                    duration,
                    finish,
                })
            }
            VmTransition::Halt { duration } => {
                let src = src.ok_or_else(|| self.inconsistent(&name, "running VM without a location"))?;
                let consuming = self.consuming_slice(&vm, src);
                let dur_var = self.slices[consuming.index()].duration;
                self.store
                    .set_lo(dur_var, duration as i64)
                    .map_err(|_| self.inconsistent(&name, "stop duration exceeds the horizon"))?;
                VmActionModel::Stop(StopModel {
                    vm,
                    source: src,
                    consuming,
                    duration,
                })
            }
            VmTransition::Suspend { duration } => {
                let src = src.ok_or_else(|| self.inconsistent(&name, "running VM without a location"))?;
                let consuming = self.consuming_slice(&vm, src);
                let dur_var = self.slices[consuming.index()].duration;
                self.store
                    .set_lo(dur_var, duration as i64)
                    .map_err(|_| self.inconsistent(&name, "suspend duration exceeds the horizon"))?;
                VmActionModel::Suspend(SuspendModel {
                    vm,
                    source: src,
                    consuming,
                    duration,
                })
            }
            VmTransition::Resume { local, remote } => {
                let src = src.ok_or_else(|| self.inconsistent(&name, "sleeping VM without a location"))?;
                let demanding = self.demanding_slice(&vm, dest_online)?;
                let consuming = self.consuming_slice(&vm, src);
                let dvar = self.store.new_bounds(0, local.max(remote) as i64);
                let d_slice = &self.slices[demanding.index()];
                let c_slice = &self.slices[consuming.index()];
                self.propagators.push(Box::new(SelectDuration {
                    selector: d_slice.hoster,
                    reference: src as i64,
                    eq_value: local as i64,
                    ne_value: remote as i64,
                    out: dvar,
                }));
                self.propagators.push(Box::new(Plus {
                    a: d_slice.start,
                    b: dvar,
                    c: c_slice.end,
                }));
                let finish = c_slice.end;
                VmActionModel::Resume(ResumeModel {
                    vm,
                    source: src,
                    demanding,
                    consuming,
                    duration: dvar,
                    finish,
                })
            }
        };
        self.vm_model_idx.insert(name, self.vm_models.len());
        self.vm_models.push(model);
        Ok(())
    }

    fn install_node_model(
        &mut self,
        node: Node,
        index: usize,
        boot: bool,
        duration: u32,
    ) -> Result<()> {
        let name = node.name.clone();
        let model = if boot {
            // The node monopolizes its own capacity while it boots.
            let slice = Slice::consuming(
                &mut self.store,
                format!("boot({name})"),
                index,
                self.horizon,
                node.cpu_capacity,
                node.memory_capacity,
            );
            let id = self.push_slice(slice);
            let dur_var = self.slices[id.index()].duration;
            let end_var = self.slices[id.index()].end;
            self.store
                .fix(dur_var, duration as i64)
                .and_then(|_| self.store.fix(end_var, duration as i64))
                .map_err(|_| self.inconsistent(&name, "startup duration exceeds the horizon"))?;
            let finish = self.store.new_fixed(duration as i64);
            NodeActionModel::Boot(BootModel {
                node,
                index,
                slice: id,
                duration,
                finish,
            })
        } else {
            // A full-capacity demanding slice: occupants must vacate before
            // the shutdown starts.
            let slice = Slice::demanding(
                &mut self.store,
                format!("halt({name})"),
                self.nodes.len(),
                self.horizon,
                node.cpu_capacity,
                node.memory_capacity,
            );
            let id = self.push_slice(slice);
            self.link_slice(id);
            let slice = &self.slices[id.index()];
            let hoster = slice.hoster;
            let start = slice.start;
            self.store
                .fix(hoster, index as i64)
                .map_err(|_| self.inconsistent(&name, "shutdown slice cannot be anchored"))?;
            let dvar = self.store.new_fixed(duration as i64);
            let finish = self.store.new_bounds(0, self.horizon as i64);
            self.propagators.push(Box::new(Plus {
                a: start,
                b: dvar,
                c: finish,
            }));
            NodeActionModel::Shutdown(ShutdownModel {
                node,
                index,
                slice: id,
                duration,
                finish,
            })
        };
        self.node_model_idx.insert(name, self.node_models.len());
        self.node_models.push(model);
        Ok(())
    }

    /// Global `end` (makespan) and `total_duration` (objective) variables.
    fn install_objective(&mut self) {
        let finishes: Vec<VarId> = self
            .vm_models
            .iter()
            .map(|m| m.finish_var(&self.slices))
            .chain(self.node_models.iter().map(|m| m.finish_var()))
            .collect();
        if finishes.is_empty() {
            self.end = self.store.new_fixed(0);
            self.total_duration = self.store.new_fixed(0);
            return;
        }
        self.end = self.store.new_bounds(0, self.horizon as i64);
        self.total_duration = self
            .store
            .new_bounds(0, self.horizon as i64 * finishes.len() as i64);
        self.propagators.push(Box::new(MaxOf {
            vars: finishes.clone(),
            out: self.end,
        }));
        self.propagators.push(Box::new(SumOf {
            vars: finishes,
            out: self.total_duration,
        }));
    }

    /// The end-state packing: one instance per dimension over the demanding
    /// slices of the VM models, sorted by non-increasing size.
    fn install_packing(&mut self) -> Result<()> {
        let demanding: Vec<&Slice> = self
            .vm_models
            .iter()
            .filter_map(|m| match m {
                VmActionModel::Migration(x) => Some(&self.slices[x.demanding.index()]),
                VmActionModel::Run(x) => Some(&self.slices[x.demanding.index()]),
                VmActionModel::Resume(x) => Some(&self.slices[x.demanding.index()]),
                VmActionModel::Stop(_) | VmActionModel::Suspend(_) => None,
            })
            .collect();

        let mut cpu_items: Vec<PackItem> = demanding
            .iter()
            .map(|s| PackItem {
                hoster: s.hoster,
                size: s.cpu_height as i64,
            })
            .collect();
        cpu_items.sort_by(|a, b| b.size.cmp(&a.size));
        let mut memory_items: Vec<PackItem> = demanding
            .iter()
            .map(|s| PackItem {
                hoster: s.hoster,
                size: s.memory_height as i64,
            })
            .collect();
        memory_items.sort_by(|a, b| b.size.cmp(&a.size));

        let cpu_loads: Vec<VarId> = self
            .nodes
            .iter()
            .map(|n| self.store.new_bounds(0, n.cpu_capacity as i64))
            .collect();
        let memory_loads: Vec<VarId> = self
            .nodes
            .iter()
            .map(|n| self.store.new_bounds(0, n.memory_capacity as i64))
            .collect();

        self.propagators
            .push(Box::new(BinPacking::new("cpu", cpu_items, cpu_loads)?));
        self.propagators
            .push(Box::new(BinPacking::new("memory", memory_items, memory_loads)?));
        Ok(())
    }

    fn install_scheduler(&mut self) {
        let capacities: Vec<NodeCapacity> = self
            .nodes
            .iter()
            .map(|n| NodeCapacity {
                cpu: n.cpu_capacity as i64,
                memory: n.memory_capacity as i64,
            })
            .collect();
        let sched_slices: Vec<SchedSlice> = self
            .slices
            .iter()
            .filter(|s| s.cpu_height > 0 || s.memory_height > 0)
            .map(|s| SchedSlice {
                hoster: s.hoster,
                start: s.start,
                end: s.end,
                cpu: s.cpu_height as i64,
                memory: s.memory_height as i64,
                demanding: s.is_demanding(),
            })
            .collect();
        self.propagators.push(Box::new(SliceScheduler::new(
            self.horizon,
            capacities,
            sched_slices,
        )));
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.node_idx.get(name).copied()
    }

    pub fn node_at(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn knows_vm(&self, name: &str) -> bool {
        self.source.vm(name).is_some()
    }

    /// Demanding hoster variable of a VM running in the target state.
    pub fn hoster_of(&self, vm: &str) -> Option<VarId> {
        self.vm_model_idx
            .get(vm)
            .and_then(|i| self.vm_models[*i].hoster_var(&self.slices))
    }

    /// Every (VM, demanding hoster) pair of the model.
    pub fn vm_hosters(&self) -> Vec<(String, VarId)> {
        self.vm_models
            .iter()
            .filter_map(|m| {
                m.hoster_var(&self.slices)
                    .map(|var| (m.vm().name.clone(), var))
            })
            .collect()
    }

    pub fn vm_models(&self) -> &[VmActionModel] {
        &self.vm_models
    }

    pub fn node_models(&self) -> &[NodeActionModel] {
        &self.node_models
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn demanding_slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter().filter(|s| s.is_demanding())
    }

    pub fn consuming_slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter().filter(|s| !s.is_demanding())
    }

    pub fn store(&self) -> &DomainStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DomainStore {
        &mut self.store
    }

    pub fn total_duration(&self) -> VarId {
        self.total_duration
    }

    pub fn end(&self) -> VarId {
        self.end
    }

    pub fn add_propagator(&mut self, propagator: Box<dyn Propagator>) {
        self.propagators.push(propagator);
    }

    /// Keep only `allowed` node indices in a hoster domain.
    pub fn restrict_hoster(&mut self, var: VarId, allowed: &[usize]) -> Result<()> {
        let allowed: FxHashSet<i64> = allowed.iter().map(|i| *i as i64).collect();
        for value in self.store.values(var) {
            if !allowed.contains(&value) {
                self.store
                    .remove(var, value)
                    .map_err(|_| self.no_viable_host(var))?;
            }
        }
        Ok(())
    }

    /// Remove `banned` node indices from a hoster domain.
    pub fn deny_hoster(&mut self, var: VarId, banned: &[usize]) -> Result<()> {
        for index in banned {
            self.store
                .remove(var, *index as i64)
                .map_err(|_| self.no_viable_host(var))?;
        }
        Ok(())
    }

    fn no_viable_host(&self, var: VarId) -> PlanError {
        PlanError::NoViableHost {
            vm: self
                .hoster_owner
                .get(&var)
                .cloned()
                .unwrap_or_else(|| "?".to_string()),
        }
    }

    /// Minimize the total action duration.
    pub fn solve(&mut self, branchers: &[Box<dyn Brancher>], config: &SearchConfig) -> SearchOutcome {
        minimize(
            &mut self.store,
            &self.propagators,
            branchers,
            self.total_duration,
            config,
        )
    }

    pub fn action_for_vm(&self, vm: &str, solution: &Solution) -> Option<Action> {
        self.vm_model_idx
            .get(vm)
            .and_then(|i| self.vm_models[*i].defined_action(solution, &self.slices, &self.nodes))
    }

    pub fn action_for_node(&self, node: &str, solution: &Solution) -> Option<Action> {
        self.node_model_idx
            .get(node)
            .map(|i| self.node_models[*i].defined_action(solution, &self.slices))
    }

    /// Materialize the timed plan out of a solution.
    pub fn extract_plan(&self, solution: &Solution) -> Result<TimedReconfigurationPlan> {
        debug_assert!(self.placement_satisfied(solution));
        let mut plan = TimedReconfigurationPlan::new(self.source.clone());
        for model in &self.node_models {
            plan.add(model.defined_action(solution, &self.slices));
        }
        for model in &self.vm_models {
            if let Some(action) = model.defined_action(solution, &self.slices, &self.nodes) {
                plan.add(action);
            }
        }
        Ok(plan)
    }

    /// The snapshot once every model's result is applied. Boots come first
    /// so moved VMs find their node online; shutdowns last.
    pub fn resulting_configuration(&self, solution: &Solution) -> Result<Configuration> {
        let mut cfg = self.source.clone();
        for model in &self.node_models {
            if matches!(model, NodeActionModel::Boot(_)) {
                model.put_result(&mut cfg);
            }
        }
        for model in &self.vm_models {
            model.put_result(solution, &self.slices, &self.nodes, &mut cfg)?;
        }
        for model in &self.node_models {
            if matches!(model, NodeActionModel::Shutdown(_)) {
                model.put_result(&mut cfg);
            }
        }
        cfg.check_viability()?;
        Ok(cfg)
    }

    /// Ground-truth capacity sweep over the fully placed slices.
    fn placement_satisfied(&self, solution: &Solution) -> bool {
        let capacities: Vec<NodeCapacity> = self
            .nodes
            .iter()
            .map(|n| NodeCapacity {
                cpu: n.cpu_capacity as i64,
                memory: n.memory_capacity as i64,
            })
            .collect();
        let placed: Vec<PlacedSlice> = self
            .slices
            .iter()
            .filter(|s| s.cpu_height > 0 || s.memory_height > 0)
            .map(|s| PlacedSlice {
                node: solution.value_of(s.hoster) as usize,
                start: solution.value_of(s.start),
                end: solution.value_of(s.end),
                cpu: s.cpu_height as i64,
                memory: s.memory_height as i64,
                demanding: s.is_demanding(),
            })
            .collect();
        is_satisfied(&capacities, &placed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durations::{DurationEvaluator, LinearDurationEvaluator};

    fn two_nodes() -> Configuration {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 4, 4096));
        cfg.add_online(Node::new("n2", 4, 4096));
        cfg
    }

    #[test]
    fn duplicate_target_state_is_rejected() {
        let mut cfg = two_nodes();
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 512), "n1").unwrap();
        let next = NextStateSpec::new().run("vm1").terminate("vm1");
        let err = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PlanError::MultipleResultingState { .. }));
    }

    #[test]
    fn unknown_vm_is_rejected() {
        let cfg = two_nodes();
        let next = NextStateSpec::new().run("ghost");
        let err = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PlanError::UnknownEntity { .. }));
    }

    #[test]
    fn satisfied_snapshot_yields_an_empty_plan() {
        let mut cfg = two_nodes();
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 512), "n1").unwrap();
        let next = NextStateSpec::new().run("vm1");
        let mut problem = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .unwrap();
        let outcome = problem.solve(&[], &SearchConfig::default());
        let (solution, objective) = outcome.best.expect("solution");
        assert_eq!(objective, 0);
        let plan = problem.extract_plan(&solution).unwrap();
        assert!(plan.is_empty());
        let result = problem.resulting_configuration(&solution).unwrap();
        assert_eq!(result.location_of("vm1"), Some("n1"));
    }

    #[test]
    fn waiting_vm_gets_a_run_action() {
        let mut cfg = two_nodes();
        cfg.add_waiting(VirtualMachine::new("vm1", 1, 512));
        let next = NextStateSpec::new().run("vm1");
        let mut problem = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .unwrap();
        let outcome = problem.solve(&[], &SearchConfig::default());
        let (solution, _) = outcome.best.expect("solution");
        let plan = problem.extract_plan(&solution).unwrap();
        assert_eq!(plan.size(), 1);
        let result = problem.resulting_configuration(&solution).unwrap();
        assert!(result.is_running("vm1"));
    }

    #[test]
    fn waiting_vm_without_nodes_reports_no_viable_host() {
        let mut cfg = Configuration::new();
        cfg.add_waiting(VirtualMachine::new("vm1", 1, 512));
        let next = NextStateSpec::new().run("vm1");
        let err = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, PlanError::NoViableHost { .. }));
    }

    struct SaturatingDurations;

    impl DurationEvaluator for SaturatingDurations {
        fn migration(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn run(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn stop(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn suspend(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn local_resume(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn remote_resume(&self, _: &VirtualMachine) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn startup(&self, _: &Node) -> Result<u32> {
            Ok(u32::MAX)
        }
        fn shutdown(&self, _: &Node) -> Result<u32> {
            Ok(u32::MAX)
        }
    }

    #[test]
    fn horizon_saturates_instead_of_overflowing() {
        let mut cfg = two_nodes();
        cfg.add_waiting(VirtualMachine::new("vm1", 1, 512));
        cfg.add_waiting(VirtualMachine::new("vm2", 1, 512));
        let next = NextStateSpec::new().run("vm1").run("vm2");
        let problem =
            ReconfigurationProblem::build(&cfg, &next, &SaturatingDurations, None).unwrap();
        assert_eq!(problem.horizon(), u32::MAX);
    }

    #[test]
    fn booting_node_appears_in_the_plan() {
        let mut cfg = two_nodes();
        cfg.add_offline(Node::new("n3", 4, 4096));
        let next = NextStateSpec::new().set_online("n3");
        let mut problem = ReconfigurationProblem::build(
            &cfg,
            &next,
            &LinearDurationEvaluator::default(),
            None,
        )
        .unwrap();
        let outcome = problem.solve(&[], &SearchConfig::default());
        let (solution, _) = outcome.best.expect("solution");
        let plan = problem.extract_plan(&solution).unwrap();
        assert_eq!(plan.size(), 1);
        let result = problem.resulting_configuration(&solution).unwrap();
        assert!(result.is_online("n3"));
    }
}

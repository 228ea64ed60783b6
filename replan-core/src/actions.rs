//! Action models: the per-VM/per-node wrappers binding slices to the
//! semantics of one action kind.
//!
//! A model owns handles to its slices and auxiliary variables; once the
//! solver commits values, `defined_action` materializes the concrete timed
//! [`Action`] (or nothing, when the VM stays put) and `put_result` applies
//! the resulting state to a configuration.

use crate::configuration::{Configuration, Node, VirtualMachine};
use crate::error::Result;
use crate::plan::{Action, ActionKind};
use crate::slice::{Slice, SliceId};
use crate::solver::{Solution, VarId};

/// Migration of a running VM (which may resolve to "stay put").
///
/// A demanding slice carries the VM's demand towards its (possibly new)
/// host while the consuming slice holds the current consumption on the
/// source until `finish = demanding.start + duration`, `duration` being 0
/// when the hoster resolves to the source.
#[derive(Debug, Clone)]
pub struct MigrationModel {
    pub vm: VirtualMachine,
    pub source: usize,
    pub demanding: SliceId,
    pub consuming: SliceId,
    pub duration: VarId,
    pub finish: VarId,
}

/// Start of a waiting VM.
///
/// The action's finish may precede the slice end: the slice reserves the
/// demand through the horizon while the VM is considered started after
/// `run` duration. This is deliberate policy, not a defect.
#[derive(Debug, Clone)]
pub struct RunModel {
    pub vm: VirtualMachine,
    pub demanding: SliceId,
    pub duration: u32,
    pub finish: VarId,
}

/// Termination of a running VM; resources release at the consuming slice
/// end, the action occupying its last `duration` instants.
#[derive(Debug, Clone)]
pub struct StopModel {
    pub vm: VirtualMachine,
    pub source: usize,
    pub consuming: SliceId,
    pub duration: u32,
}

/// Suspend-to-disk of a running VM at its current location.
#[derive(Debug, Clone)]
pub struct SuspendModel {
    pub vm: VirtualMachine,
    pub source: usize,
    pub consuming: SliceId,
    pub duration: u32,
}

/// Resume of a sleeping VM, locally or on another node.
///
/// Same two-slice shape as a migration; `duration` channels to the local
/// or remote expression depending on where the hoster resolves.
#[derive(Debug, Clone)]
pub struct ResumeModel {
    pub vm: VirtualMachine,
    pub source: usize,
    pub demanding: SliceId,
    pub consuming: SliceId,
    pub duration: VarId,
    pub finish: VarId,
}

/// Per-VM action model.
#[derive(Debug, Clone)]
pub enum VmActionModel {
    Migration(MigrationModel),
    Run(RunModel),
    Stop(StopModel),
    Suspend(SuspendModel),
    Resume(ResumeModel),
}

impl VmActionModel {
    pub fn vm(&self) -> &VirtualMachine {
        match self {
            VmActionModel::Migration(m) => &m.vm,
            VmActionModel::Run(m) => &m.vm,
            VmActionModel::Stop(m) => &m.vm,
            VmActionModel::Suspend(m) => &m.vm,
            VmActionModel::Resume(m) => &m.vm,
        }
    }

    /// The variable holding the moment this model's action completes.
    pub fn finish_var(&self, slices: &[Slice]) -> VarId {
        match self {
            VmActionModel::Migration(m) => m.finish,
            VmActionModel::Run(m) => m.finish,
            VmActionModel::Stop(m) => slices[m.consuming.index()].end,
            VmActionModel::Suspend(m) => slices[m.consuming.index()].end,
            VmActionModel::Resume(m) => m.finish,
        }
    }

    /// The placement variable heuristics branch on, when the model has one.
    pub fn hoster_var(&self, slices: &[Slice]) -> Option<VarId> {
        match self {
            VmActionModel::Migration(m) => Some(slices[m.demanding.index()].hoster),
            VmActionModel::Run(m) => Some(slices[m.demanding.index()].hoster),
            VmActionModel::Resume(m) => Some(slices[m.demanding.index()].hoster),
            VmActionModel::Stop(_) | VmActionModel::Suspend(_) => None,
        }
    }

    /// Node index the VM currently occupies, when hosted.
    pub fn current_host(&self) -> Option<usize> {
        match self {
            VmActionModel::Migration(m) => Some(m.source),
            VmActionModel::Resume(m) => Some(m.source),
            VmActionModel::Stop(m) => Some(m.source),
            VmActionModel::Suspend(m) => Some(m.source),
            VmActionModel::Run(_) => None,
        }
    }

    /// Materialize the concrete action once the solver committed values.
    /// `None` when the model resolves to "no change" (a staying VM).
    pub fn defined_action(
        &self,
        solution: &Solution,
        slices: &[Slice],
        nodes: &[Node],
    ) -> Option<Action> {
        match self {
            VmActionModel::Migration(m) => {
                let demanding = &slices[m.demanding.index()];
                let host = solution.value_of(demanding.hoster) as usize;
                if host == m.source {
                    return None;
                }
                Some(Action::new(
                    ActionKind::Migration {
                        vm: m.vm.name.clone(),
                        source: nodes[m.source].name.clone(),
                        destination: nodes[host].name.clone(),
                    },
                    solution.value_of(demanding.start) as u32,
                    solution.value_of(m.finish) as u32,
                ))
            }
            VmActionModel::Run(m) => {
                let demanding = &slices[m.demanding.index()];
                let host = solution.value_of(demanding.hoster) as usize;
                Some(Action::new(
                    ActionKind::Run {
                        vm: m.vm.name.clone(),
                        node: nodes[host].name.clone(),
                    },
                    solution.value_of(demanding.start) as u32,
                    solution.value_of(m.finish) as u32,
                ))
            }
            VmActionModel::Stop(m) => {
                let end = solution.value_of(slices[m.consuming.index()].end) as u32;
                Some(Action::new(
                    ActionKind::Stop {
                        vm: m.vm.name.clone(),
                        node: nodes[m.source].name.clone(),
                    },
                    end.saturating_sub(m.duration),
                    end,
                ))
            }
            VmActionModel::Suspend(m) => {
                let end = solution.value_of(slices[m.consuming.index()].end) as u32;
                Some(Action::new(
                    ActionKind::Suspend {
                        vm: m.vm.name.clone(),
                        node: nodes[m.source].name.clone(),
                    },
                    end.saturating_sub(m.duration),
                    end,
                ))
            }
            VmActionModel::Resume(m) => {
                let demanding = &slices[m.demanding.index()];
                let host = solution.value_of(demanding.hoster) as usize;
                Some(Action::new(
                    ActionKind::Resume {
                        vm: m.vm.name.clone(),
                        source: nodes[m.source].name.clone(),
                        destination: nodes[host].name.clone(),
                    },
                    solution.value_of(demanding.start) as u32,
                    solution.value_of(m.finish) as u32,
                ))
            }
        }
    }

    /// Apply this model's resulting state to `cfg`.
    pub fn put_result(
        &self,
        solution: &Solution,
        slices: &[Slice],
        nodes: &[Node],
        cfg: &mut Configuration,
    ) -> Result<()> {
        match self {
            VmActionModel::Migration(m) => {
                let host = solution.value_of(slices[m.demanding.index()].hoster) as usize;
                cfg.set_run_on(m.vm.clone(), &nodes[host].name)
            }
            VmActionModel::Run(m) => {
                let host = solution.value_of(slices[m.demanding.index()].hoster) as usize;
                cfg.set_run_on(m.vm.clone(), &nodes[host].name)
            }
            VmActionModel::Stop(m) => {
                cfg.set_terminated(&m.vm.name);
                Ok(())
            }
            VmActionModel::Suspend(m) => cfg.set_sleep_on(m.vm.clone(), &nodes[m.source].name),
            VmActionModel::Resume(m) => {
                let host = solution.value_of(slices[m.demanding.index()].hoster) as usize;
                cfg.set_run_on(m.vm.clone(), &nodes[host].name)
            }
        }
    }
}

/// Boot of an offline node: the node monopolizes its own capacity over
/// `[0, startup]`.
#[derive(Debug, Clone)]
pub struct BootModel {
    pub node: Node,
    pub index: usize,
    pub slice: SliceId,
    pub duration: u32,
    pub finish: VarId,
}

/// Shutdown of an online node: a full-capacity demanding slice claims the
/// node from the shutdown start through the horizon.
#[derive(Debug, Clone)]
pub struct ShutdownModel {
    pub node: Node,
    pub index: usize,
    pub slice: SliceId,
    pub duration: u32,
    pub finish: VarId,
}

/// Per-node action model.
#[derive(Debug, Clone)]
pub enum NodeActionModel {
    Boot(BootModel),
    Shutdown(ShutdownModel),
}

impl NodeActionModel {
    pub fn node(&self) -> &Node {
        match self {
            NodeActionModel::Boot(m) => &m.node,
            NodeActionModel::Shutdown(m) => &m.node,
        }
    }

    pub fn finish_var(&self) -> VarId {
        match self {
            NodeActionModel::Boot(m) => m.finish,
            NodeActionModel::Shutdown(m) => m.finish,
        }
    }

    pub fn defined_action(&self, solution: &Solution, slices: &[Slice]) -> Action {
        match self {
            NodeActionModel::Boot(m) => Action::new(
                ActionKind::Boot {
                    node: m.node.name.clone(),
                },
                0,
                m.duration,
            ),
            NodeActionModel::Shutdown(m) => {
                let start = solution.value_of(slices[m.slice.index()].start) as u32;
                Action::new(
                    ActionKind::Shutdown {
                        node: m.node.name.clone(),
                    },
                    start,
                    start + m.duration,
                )
            }
        }
    }

    pub fn put_result(&self, cfg: &mut Configuration) {
        match self {
            NodeActionModel::Boot(m) => cfg.add_online(m.node.clone()),
            NodeActionModel::Shutdown(m) => cfg.add_offline(m.node.clone()),
        }
    }
}

//! Resource model: nodes, virtual machines and consistent datacenter
//! snapshots.
//!
//! A [`Configuration`] is an immutable-per-snapshot record of the node
//! membership (online/offline) and the VM lifecycle states (running,
//! sleeping, waiting, terminated) with a location map for hosted VMs.
//! Mutators preserve the exactly-one-state partition by moving an entity
//! out of its previous set before inserting it into the new one.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{PlanError, Result};

/// A physical node with CPU/memory capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Total CPU capacity, in the same unit as VM consumption/demand.
    pub cpu_capacity: u32,
    /// Total memory capacity in MB.
    pub memory_capacity: u32,
    /// Number of physical cores.
    pub nb_cpus: u32,
}

impl Node {
    pub fn new(name: impl Into<String>, cpu_capacity: u32, memory_capacity: u32) -> Self {
        Self {
            name: name.into(),
            cpu_capacity,
            memory_capacity,
            nb_cpus: 1,
        }
    }

    pub fn with_nb_cpus(mut self, nb_cpus: u32) -> Self {
        self.nb_cpus = nb_cpus;
        self
    }
}

/// A virtual machine with its current consumption and its target demand.
///
/// Consumption is what the VM uses right now; demand is what it must be
/// given once the reconfiguration completes (possibly different, to model
/// ramp-up or ramp-down).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    pub nb_cpus: u32,
    pub cpu_consumption: u32,
    pub cpu_demand: u32,
    pub memory_consumption: u32,
    pub memory_demand: u32,
}

impl VirtualMachine {
    pub fn new(name: impl Into<String>, cpu: u32, memory: u32) -> Self {
        Self {
            name: name.into(),
            nb_cpus: 1,
            cpu_consumption: cpu,
            cpu_demand: cpu,
            memory_consumption: memory,
            memory_demand: memory,
        }
    }

    /// Set a target demand different from the current consumption.
    pub fn with_demand(mut self, cpu_demand: u32, memory_demand: u32) -> Self {
        self.cpu_demand = cpu_demand;
        self.memory_demand = memory_demand;
        self
    }
}

/// Lifecycle state of a VM within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Running,
    Sleeping,
    Waiting,
    Terminated,
}

/// A consistent snapshot of the datacenter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    nodes: Vec<Node>,
    vms: Vec<VirtualMachine>,
    online: FxHashSet<String>,
    offline: FxHashSet<String>,
    states: FxHashMap<String, VmState>,
    /// Hosting node for running and sleeping VMs.
    locations: FxHashMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node as online. Moves it out of the offline set if needed.
    pub fn add_online(&mut self, node: Node) {
        self.offline.remove(&node.name);
        self.online.insert(node.name.clone());
        self.upsert_node(node);
    }

    /// Register a node as offline. Hosted VMs are not moved; callers must
    /// keep the snapshot viable themselves.
    pub fn add_offline(&mut self, node: Node) {
        self.online.remove(&node.name);
        self.offline.insert(node.name.clone());
        self.upsert_node(node);
    }

    fn upsert_node(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.name == node.name) {
            *existing = node;
        } else {
            self.nodes.push(node);
        }
    }

    fn upsert_vm(&mut self, vm: VirtualMachine) {
        if let Some(existing) = self.vms.iter_mut().find(|v| v.name == vm.name) {
            *existing = vm;
        } else {
            self.vms.push(vm);
        }
    }

    /// Put a VM in the running state on `node`.
    pub fn set_run_on(&mut self, vm: VirtualMachine, node: &str) -> Result<()> {
        if !self.online.contains(node) {
            return Err(PlanError::NonViableConfiguration {
                details: format!("cannot run '{}' on '{}': node is not online", vm.name, node),
            });
        }
        self.states.insert(vm.name.clone(), VmState::Running);
        self.locations.insert(vm.name.clone(), node.to_string());
        self.upsert_vm(vm);
        Ok(())
    }

    /// Put a VM in the sleeping state on `node`.
    pub fn set_sleep_on(&mut self, vm: VirtualMachine, node: &str) -> Result<()> {
        if !self.online.contains(node) {
            return Err(PlanError::NonViableConfiguration {
                details: format!(
                    "cannot make '{}' sleep on '{}': node is not online",
                    vm.name, node
                ),
            });
        }
        self.states.insert(vm.name.clone(), VmState::Sleeping);
        self.locations.insert(vm.name.clone(), node.to_string());
        self.upsert_vm(vm);
        Ok(())
    }

    /// Put a VM in the waiting state (not hosted anywhere).
    pub fn add_waiting(&mut self, vm: VirtualMachine) {
        self.states.insert(vm.name.clone(), VmState::Waiting);
        self.locations.remove(&vm.name);
        self.upsert_vm(vm);
    }

    /// Terminate a VM. It keeps its record but no location.
    pub fn set_terminated(&mut self, vm_name: &str) {
        self.states.insert(vm_name.to_string(), VmState::Terminated);
        self.locations.remove(vm_name);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn vms(&self) -> &[VirtualMachine] {
        &self.vms
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn vm(&self, name: &str) -> Option<&VirtualMachine> {
        self.vms.iter().find(|v| v.name == name)
    }

    pub fn is_online(&self, node: &str) -> bool {
        self.online.contains(node)
    }

    pub fn is_offline(&self, node: &str) -> bool {
        self.offline.contains(node)
    }

    pub fn online_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| self.online.contains(&n.name))
    }

    pub fn offline_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| self.offline.contains(&n.name))
    }

    pub fn state_of(&self, vm: &str) -> Option<VmState> {
        self.states.get(vm).copied()
    }

    pub fn is_running(&self, vm: &str) -> bool {
        self.state_of(vm) == Some(VmState::Running)
    }

    pub fn is_sleeping(&self, vm: &str) -> bool {
        self.state_of(vm) == Some(VmState::Sleeping)
    }

    pub fn is_waiting(&self, vm: &str) -> bool {
        self.state_of(vm) == Some(VmState::Waiting)
    }

    /// Hosting node of a running or sleeping VM.
    pub fn location_of(&self, vm: &str) -> Option<&str> {
        self.locations.get(vm).map(String::as_str)
    }

    pub fn vms_in(&self, state: VmState) -> impl Iterator<Item = &VirtualMachine> {
        self.vms
            .iter()
            .filter(move |v| self.states.get(&v.name) == Some(&state))
    }

    /// Running VMs hosted on `node`.
    pub fn runnings_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a VirtualMachine> {
        self.vms_in(VmState::Running)
            .filter(move |v| self.locations.get(&v.name).map(String::as_str) == Some(node))
    }

    /// Sleeping VMs hosted on `node`.
    pub fn sleepings_on<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a VirtualMachine> {
        self.vms_in(VmState::Sleeping)
            .filter(move |v| self.locations.get(&v.name).map(String::as_str) == Some(node))
    }

    /// CPU capacity left on `node` once the demand of its running VMs is
    /// served.
    pub fn free_cpu(&self, node: &str) -> i64 {
        let cap = self.node(node).map(|n| n.cpu_capacity).unwrap_or(0) as i64;
        cap - self
            .runnings_on(node)
            .map(|v| v.cpu_demand as i64)
            .sum::<i64>()
    }

    /// Memory capacity left on `node` once the demand of its running VMs is
    /// served.
    pub fn free_memory(&self, node: &str) -> i64 {
        let cap = self.node(node).map(|n| n.memory_capacity).unwrap_or(0) as i64;
        cap - self
            .runnings_on(node)
            .map(|v| v.memory_demand as i64)
            .sum::<i64>()
    }

    /// Check the snapshot invariants: every VM in exactly one state, every
    /// node in exactly one membership, every hosted VM on an online node.
    pub fn check_viability(&self) -> Result<()> {
        for node in &self.nodes {
            let on = self.online.contains(&node.name);
            let off = self.offline.contains(&node.name);
            if on == off {
                return Err(PlanError::NonViableConfiguration {
                    details: format!("node '{}' must be either online or offline", node.name),
                });
            }
        }
        for vm in &self.vms {
            let state = self
                .states
                .get(&vm.name)
                .ok_or_else(|| PlanError::UnknownResultingState {
                    entity: vm.name.clone(),
                })?;
            match state {
                VmState::Running | VmState::Sleeping => {
                    let loc = self.locations.get(&vm.name).ok_or_else(|| {
                        PlanError::NonViableConfiguration {
                            details: format!("hosted VM '{}' has no location", vm.name),
                        }
                    })?;
                    if !self.online.contains(loc) {
                        return Err(PlanError::NonViableConfiguration {
                            details: format!("VM '{}' is hosted on non-online node '{loc}'", vm.name),
                        });
                    }
                }
                VmState::Waiting | VmState::Terminated => {
                    if self.locations.contains_key(&vm.name) {
                        return Err(PlanError::NonViableConfiguration {
                            details: format!("unhosted VM '{}' still has a location", vm.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vm(name: &str) -> VirtualMachine {
        VirtualMachine::new(name, 2, 512)
    }

    #[rstest]
    #[case("ghost")]
    #[case("")]
    fn unknown_node_has_no_free_capacity(#[case] node: &str) {
        let cfg = Configuration::new();
        assert_eq!(cfg.free_cpu(node), 0);
        assert_eq!(cfg.free_memory(node), 0);
    }

    #[test]
    fn state_partition_is_maintained() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 8, 4096));
        cfg.set_run_on(vm("vm1"), "n1").unwrap();
        assert!(cfg.is_running("vm1"));

        cfg.set_sleep_on(vm("vm1"), "n1").unwrap();
        assert!(cfg.is_sleeping("vm1"));
        assert!(!cfg.is_running("vm1"));
        assert_eq!(cfg.location_of("vm1"), Some("n1"));

        cfg.add_waiting(vm("vm1"));
        assert!(cfg.is_waiting("vm1"));
        assert_eq!(cfg.location_of("vm1"), None);

        cfg.check_viability().unwrap();
    }

    #[test]
    fn hosting_requires_an_online_node() {
        let mut cfg = Configuration::new();
        cfg.add_offline(Node::new("n1", 8, 4096));
        assert!(cfg.set_run_on(vm("vm1"), "n1").is_err());
        assert!(cfg.set_run_on(vm("vm1"), "ghost").is_err());
    }

    #[test]
    fn free_capacity_accounts_for_demand() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 8, 4096));
        cfg.set_run_on(VirtualMachine::new("vm1", 2, 512).with_demand(3, 1024), "n1")
            .unwrap();
        cfg.set_run_on(vm("vm2"), "n1").unwrap();
        assert_eq!(cfg.free_cpu("n1"), 8 - 3 - 2);
        assert_eq!(cfg.free_memory("n1"), 4096 - 1024 - 512);
    }

    #[test]
    fn booting_a_node_moves_it_online() {
        let mut cfg = Configuration::new();
        cfg.add_offline(Node::new("n1", 8, 4096));
        assert!(cfg.is_offline("n1"));
        cfg.add_online(Node::new("n1", 8, 4096));
        assert!(cfg.is_online("n1"));
        assert!(!cfg.is_offline("n1"));
        assert_eq!(cfg.nodes().len(), 1);
    }
}

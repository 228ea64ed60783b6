//! First-fit admission over a queue of jobs.
//!
//! Turns a job queue into the wanted next states: each job's VMs are
//! tentatively placed on the online nodes in order, honoring the job's
//! fence/ban constraints; a job whose VMs cannot all be served is dropped
//! whole: its running VMs regress to sleeping, the rest keep their current
//! state. Nothing is ever half-placed; a later job naming a regressed VM
//! may still re-admit it.

use tracing::{debug, warn};

use crate::configuration::{Configuration, VmState};
use crate::constraints::{PlacementConstraint, VJob};
use crate::problem::NextStateSpec;

pub struct FirstFitVJobScheduler;

impl FirstFitVJobScheduler {
    /// The wanted next states for `queue`, given the current snapshot.
    pub fn compute(source: &Configuration, queue: &[VJob]) -> NextStateSpec {
        // Free capacity per online node, after the demand of the VMs
        // already running there.
        let mut free: Vec<(String, i64, i64)> = source
            .online_nodes()
            .map(|n| {
                (
                    n.name.clone(),
                    source.free_cpu(&n.name),
                    source.free_memory(&n.name),
                )
            })
            .collect();

        let mut next = NextStateSpec::new();
        for job in queue {
            let mut tentative: Vec<(usize, i64, i64)> = Vec::new();
            let mut members: Vec<&str> = Vec::new();
            let mut serveable = true;

            for vm_name in &job.vms {
                if next.to_run.iter().any(|v| v == vm_name) {
                    // Already admitted through an earlier job.
                    continue;
                }
                match source.state_of(vm_name) {
                    Some(VmState::Running) => {
                        if next.to_sleep.iter().any(|v| v == vm_name) {
                            // Regressed by an earlier failed job: its demand
                            // was freed, so admitting it again reserves a
                            // slot like any unhosted member.
                            let Some(vm) = source.vm(vm_name) else {
                                serveable = false;
                                break;
                            };
                            let (cpu, memory) = (vm.cpu_demand as i64, vm.memory_demand as i64);
                            let slot = free.iter().position(|(name, c, m)| {
                                *c >= cpu && *m >= memory && Self::allowed(job, vm_name, name)
                            });
                            match slot {
                                Some(index) => {
                                    free[index].1 -= cpu;
                                    free[index].2 -= memory;
                                    tentative.push((index, cpu, memory));
                                    members.push(vm_name);
                                }
                                None => {
                                    serveable = false;
                                    break;
                                }
                            }
                        } else {
                            members.push(vm_name);
                        }
                    }
                    Some(VmState::Waiting) | Some(VmState::Sleeping) => {
                        let Some(vm) = source.vm(vm_name) else {
                            serveable = false;
                            break;
                        };
                        let (cpu, memory) = (vm.cpu_demand as i64, vm.memory_demand as i64);
                        let slot = free.iter().position(|(name, c, m)| {
                            *c >= cpu && *m >= memory && Self::allowed(job, vm_name, name)
                        });
                        match slot {
                            Some(index) => {
                                free[index].1 -= cpu;
                                free[index].2 -= memory;
                                tentative.push((index, cpu, memory));
                                members.push(vm_name);
                            }
                            None => {
                                serveable = false;
                                break;
                            }
                        }
                    }
                    Some(VmState::Terminated) | None => {
                        warn!(job = %job.name, vm = %vm_name, "ignoring unschedulable VM");
                    }
                }
            }

            if serveable {
                debug!(job = %job.name, vms = members.len(), "job admitted");
                for vm in members {
                    // A later admission overrides an earlier regression.
                    next.to_sleep.retain(|v| v.as_str() != vm);
                    next.to_run.push(vm.to_string());
                }
            } else {
                // All-or-nothing: release the tentative reservations and
                // regress the job. Running members fall back to sleeping,
                // freeing their demand for later jobs in the queue.
                debug!(job = %job.name, "job cannot be served, regressing it");
                for (index, cpu, memory) in tentative {
                    free[index].1 += cpu;
                    free[index].2 += memory;
                }
                for vm_name in &job.vms {
                    if next.to_run.iter().any(|v| v == vm_name) {
                        // Admitted through an earlier job; that admission
                        // stands.
                        continue;
                    }
                    if source.is_running(vm_name) && !next.to_sleep.iter().any(|v| v == vm_name) {
                        if let Some(vm) = source.vm(vm_name) {
                            if let Some(location) = source.location_of(vm_name) {
                                if let Some(slot) =
                                    free.iter_mut().find(|(name, _, _)| name == location)
                                {
                                    slot.1 += vm.cpu_demand as i64;
                                    slot.2 += vm.memory_demand as i64;
                                }
                            }
                        }
                        next.to_sleep.push(vm_name.clone());
                    }
                }
            }
        }
        next
    }

    /// Whether the job's own fence/ban constraints let `vm` use `node`.
    fn allowed(job: &VJob, vm: &str, node: &str) -> bool {
        for constraint in &job.constraints {
            match constraint {
                PlacementConstraint::Fence { vms, nodes }
                    if vms.iter().any(|v| v == vm) && !nodes.iter().any(|n| n == node) =>
                {
                    return false;
                }
                PlacementConstraint::Ban { vms, nodes }
                    if vms.iter().any(|v| v == vm) && nodes.iter().any(|n| n == node) =>
                {
                    return false;
                }
                _ => {}
            }
        }
        true
    }
}

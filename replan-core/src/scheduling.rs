//! Per-node admission over time: bin-packing *with* time.
//!
//! The propagator reasons over mandatory parts: a consuming slice certainly
//! occupies `[0, end.lo)`, a demanding slice committed to a node certainly
//! occupies `[start.hi, horizon]`. Sweeping the resulting profile per node
//! filters hosts a demanding slice cannot use, lifts demanding starts past
//! intervals that cannot take their height, and caps consuming ends before
//! demand that needs their space.
//!
//! [`is_satisfied`] is the authoritative semantic check: an independent
//! time-sweep over fully placed slices that the incremental propagation
//! must never contradict.

use crate::solver::{Contradiction, DomainStore, Propagator, VarId};

/// CPU/memory capacity of one node, by node index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCapacity {
    pub cpu: i64,
    pub memory: i64,
}

/// Scheduler view over one slice.
#[derive(Debug, Clone, Copy)]
pub struct SchedSlice {
    pub hoster: VarId,
    pub start: VarId,
    pub end: VarId,
    pub cpu: i64,
    pub memory: i64,
    pub demanding: bool,
}

/// A fully placed slice, input of the ground-truth check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedSlice {
    pub node: usize,
    pub start: i64,
    pub end: i64,
    pub cpu: i64,
    pub memory: i64,
    pub demanding: bool,
}

/// `[from, to)` interval occupying fixed heights; `owner` indexes the
/// scheduler's slice list so a slice can be excluded from its own profile.
#[derive(Debug, Clone, Copy)]
struct MandatoryPart {
    from: i64,
    to: i64,
    cpu: i64,
    memory: i64,
    owner: usize,
}

/// Constant-load interval of a node profile.
#[derive(Debug, Clone, Copy)]
struct ProfileStep {
    from: i64,
    to: i64,
    cpu: i64,
    memory: i64,
}

pub struct SliceScheduler {
    horizon: i64,
    capacities: Vec<NodeCapacity>,
    slices: Vec<SchedSlice>,
}

impl SliceScheduler {
    pub fn new(horizon: u32, capacities: Vec<NodeCapacity>, slices: Vec<SchedSlice>) -> Self {
        Self {
            horizon: horizon as i64,
            capacities,
            slices,
        }
    }

    /// Mandatory parts of the slices certainly hosted on `node`.
    fn mandatory_parts(&self, store: &DomainStore, node: usize) -> Vec<MandatoryPart> {
        let mut parts = Vec::new();
        for (owner, slice) in self.slices.iter().enumerate() {
            if store.value(slice.hoster) != Some(node as i64) {
                continue;
            }
            let (from, to) = if slice.demanding {
                // Occupies through the end of the horizon, instant
                // `horizon` included (the final state must hold).
                (store.hi(slice.start), self.horizon + 1)
            } else {
                (0, store.lo(slice.end))
            };
            if from < to && (slice.cpu > 0 || slice.memory > 0) {
                parts.push(MandatoryPart {
                    from,
                    to,
                    cpu: slice.cpu,
                    memory: slice.memory,
                    owner,
                });
            }
        }
        parts
    }

    /// Merge parts into a sorted sequence of constant-load steps covering
    /// `[0, horizon + 1)`.
    fn profile(&self, parts: &[MandatoryPart], exclude: Option<usize>) -> Vec<ProfileStep> {
        let mut events: Vec<(i64, i64, i64)> = Vec::with_capacity(parts.len() * 2);
        for part in parts {
            if exclude == Some(part.owner) {
                continue;
            }
            events.push((part.from, part.cpu, part.memory));
            events.push((part.to, -part.cpu, -part.memory));
        }
        events.sort_by_key(|e| e.0);

        let mut steps = Vec::new();
        let (mut cpu, mut memory) = (0i64, 0i64);
        let mut from = 0i64;
        let mut i = 0;
        while i < events.len() {
            let t = events[i].0;
            if t > from {
                steps.push(ProfileStep {
                    from,
                    to: t,
                    cpu,
                    memory,
                });
                from = t;
            }
            while i < events.len() && events[i].0 == t {
                cpu += events[i].1;
                memory += events[i].2;
                i += 1;
            }
        }
        let limit = self.horizon + 1;
        if from < limit {
            steps.push(ProfileStep {
                from,
                to: limit,
                cpu,
                memory,
            });
        }
        steps
    }

    /// Earliest `t0` such that the whole suffix `[t0, horizon]` can take an
    /// extra `(cpu, memory)` on top of `steps`. `horizon + 1` when no
    /// suffix fits.
    fn earliest_suffix_fit(&self, steps: &[ProfileStep], cpu: i64, memory: i64, cap: NodeCapacity) -> i64 {
        let mut t0 = 0;
        for step in steps {
            if step.cpu + cpu > cap.cpu || step.memory + memory > cap.memory {
                t0 = step.to;
            }
        }
        t0
    }

    /// First instant at which an extra `(cpu, memory)` no longer fits on
    /// top of `steps`; `horizon` when it always fits.
    fn first_violation(&self, steps: &[ProfileStep], cpu: i64, memory: i64, cap: NodeCapacity) -> i64 {
        for step in steps {
            if step.cpu + cpu > cap.cpu || step.memory + memory > cap.memory {
                return step.from;
            }
        }
        self.horizon
    }
}

impl Propagator for SliceScheduler {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        for node in 0..self.capacities.len() {
            let cap = self.capacities[node];
            let parts = self.mandatory_parts(store, node);

            // The mandatory profile on its own must fit.
            for step in self.profile(&parts, None) {
                if step.cpu > cap.cpu || step.memory > cap.memory {
                    return Err(Contradiction);
                }
            }

            for (owner, slice) in self.slices.iter().enumerate() {
                if slice.demanding {
                    if !store.contains(slice.hoster, node as i64) {
                        continue;
                    }
                    let steps = self.profile(&parts, Some(owner));
                    let t0 = self.earliest_suffix_fit(&steps, slice.cpu, slice.memory, cap);
                    if t0 > store.hi(slice.start) {
                        // No start instant works on this node.
                        changed |= store.remove(slice.hoster, node as i64)?;
                    } else if store.value(slice.hoster) == Some(node as i64) {
                        changed |= store.set_lo(slice.start, t0)?;
                    }
                } else if store.value(slice.hoster) == Some(node as i64) {
                    let steps = self.profile(&parts, Some(owner));
                    let latest = self.first_violation(&steps, slice.cpu, slice.memory, cap);
                    changed |= store.set_hi(slice.end, latest)?;
                }
            }
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "slice-scheduler"
    }
}

/// Ground truth: simulate the resource deltas per node in time order
/// (releases before acquisitions at equal instants) and verify free CPU and
/// memory never go negative.
pub fn is_satisfied(capacities: &[NodeCapacity], placed: &[PlacedSlice]) -> bool {
    for (node, cap) in capacities.iter().enumerate() {
        // (instant, acquisition?, cpu delta, memory delta)
        let mut events: Vec<(i64, bool, i64, i64)> = Vec::new();
        for slice in placed.iter().filter(|s| s.node == node) {
            if slice.demanding {
                events.push((slice.start, true, slice.cpu, slice.memory));
            } else {
                events.push((0, true, slice.cpu, slice.memory));
                events.push((slice.end, false, -slice.cpu, -slice.memory));
            }
        }
        events.sort_by_key(|e| (e.0, e.1));

        let (mut cpu, mut memory) = (0i64, 0i64);
        for (_, _, dc, dm) in events {
            cpu += dc;
            memory += dm;
            if cpu > cap.cpu || memory > cap.memory {
                return false;
            }
        }
    }
    true
}

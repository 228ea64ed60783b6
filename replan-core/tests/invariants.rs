//! Randomized invariants over planned reconfigurations.

use proptest::prelude::*;

use replan_core::packing::{BinPacking, PackItem};
use replan_core::solver::{DomainStore, Propagator};
use replan_core::{
    Configuration, LinearDurationEvaluator, NextStateSpec, Node, PlanError, PlanParams, Planner,
    VirtualMachine,
};

#[derive(Debug, Clone)]
struct VmSpec {
    cpu: u32,
    memory: u32,
    node: usize,
    running: bool,
}

fn vm_specs() -> impl Strategy<Value = Vec<VmSpec>> {
    prop::collection::vec(
        (1u32..=4, 256u32..=2048, 0usize..3, any::<bool>()).prop_map(
            |(cpu, memory, node, running)| VmSpec {
                cpu,
                memory,
                node,
                running,
            },
        ),
        0..=6,
    )
}

fn build(specs: &[VmSpec]) -> Option<Configuration> {
    let mut cfg = Configuration::new();
    for name in ["n1", "n2", "n3"] {
        cfg.add_online(Node::new(name, 8, 8192));
    }
    for (index, spec) in specs.iter().enumerate() {
        let vm = VirtualMachine::new(format!("vm{index}"), spec.cpu, spec.memory);
        if spec.running {
            let node = format!("n{}", spec.node + 1);
            // The draw may oversubscribe a node; such a snapshot is not a
            // valid starting point.
            cfg.set_run_on(vm, &node).ok()?;
        } else {
            cfg.add_waiting(vm);
        }
    }
    cfg.check_viability().ok()?;
    Some(cfg)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

    /// Whatever the draw, a produced plan replays cleanly into a viable
    /// destination where every wanted VM runs within capacity.
    #[test]
    fn plans_reach_viable_destinations(specs in vm_specs()) {
        let Some(cfg) = build(&specs) else {
            return Ok(());
        };
        let mut next = NextStateSpec::new();
        for index in 0..specs.len() {
            next = next.run(format!("vm{index}"));
        }
        let planner = Planner::new(LinearDurationEvaluator::default()).with_params(PlanParams {
            repair: true,
            time_limit_ms: Some(2_000),
            ..Default::default()
        });
        match planner.plan(&cfg, &next, &[]) {
            Ok(planned) => {
                let destination = planned.plan.destination().expect("plan replays");
                destination.check_viability().expect("destination viable");
                for index in 0..specs.len() {
                    let name = format!("vm{index}");
                    prop_assert!(destination.is_running(&name), "{name} is not running");
                }
                for node in ["n1", "n2", "n3"] {
                    prop_assert!(destination.free_cpu(node) >= 0);
                    prop_assert!(destination.free_memory(node) >= 0);
                }
            }
            // The demand may simply not fit, or the budget may run out.
            Err(PlanError::NoPlanFound { .. }) => {}
            Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
        }
    }

    /// A plan never touches a VM whose wanted state already holds, so a
    /// satisfied draw maps to the empty plan.
    #[test]
    fn satisfied_draws_plan_nothing(specs in vm_specs()) {
        let Some(cfg) = build(&specs) else {
            return Ok(());
        };
        let mut next = NextStateSpec::new();
        for (index, spec) in specs.iter().enumerate() {
            if spec.running {
                next = next.run(format!("vm{index}"));
            }
        }
        let planner = Planner::new(LinearDurationEvaluator::default()).with_params(PlanParams {
            repair: true,
            time_limit_ms: Some(2_000),
            ..Default::default()
        });
        let planned = planner.plan(&cfg, &next, &[]).expect("already satisfied");
        prop_assert_eq!(planned.plan.size(), 0);
        prop_assert_eq!(planned.plan.destination().expect("replays"), cfg);
    }

    /// Packing propagation never produces an assignment exceeding a bin's
    /// capacity, and the load bounds track the committed items.
    #[test]
    fn packing_assignments_respect_capacities(
        mut sizes in prop::collection::vec(1i64..=6, 1..=6),
        caps in prop::collection::vec(4i64..=12, 1..=3),
    ) {
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        let mut store = DomainStore::new();
        let items: Vec<PackItem> = sizes
            .iter()
            .map(|s| PackItem {
                hoster: store.new_enumerated(0, caps.len() as i64 - 1),
                size: *s,
            })
            .collect();
        let loads: Vec<_> = caps.iter().map(|c| store.new_bounds(0, *c)).collect();
        let packing = BinPacking::new("cpu", items.clone(), loads.clone())
            .expect("sizes are sorted");

        // Fix the remaining items one by one, always to their smallest
        // candidate bin. A contradiction along the way just means the draw
        // (or the greedy choice) is infeasible; a completed assignment must
        // respect every capacity.
        let mut feasible = packing.propagate(&mut store).is_ok();
        if feasible {
            for item in &items {
                if store.is_fixed(item.hoster) {
                    continue;
                }
                let bin = store.lo(item.hoster);
                if store.fix(item.hoster, bin).is_err()
                    || packing.propagate(&mut store).is_err()
                {
                    feasible = false;
                    break;
                }
            }
        }
        if feasible {
            let mut used = vec![0i64; caps.len()];
            for item in &items {
                let bin = store.value(item.hoster).expect("all items are fixed");
                used[bin as usize] += item.size;
            }
            for (bin, cap) in caps.iter().enumerate() {
                prop_assert!(used[bin] <= *cap, "bin {bin} overflows: {} > {cap}", used[bin]);
                prop_assert_eq!(store.lo(loads[bin]), used[bin]);
            }
        }
    }
}

//! Replay determinism: every dependency-consistent commit order reaches
//! the same destination.

use replan_core::{
    Configuration, Dependencies, LinearDurationEvaluator, NextStateSpec, Node, PlacementConstraint,
    PlanParams, Planner, TimedReconfigurationPlan, VirtualMachine,
};

fn planner() -> Planner<LinearDurationEvaluator> {
    Planner::new(LinearDurationEvaluator::default()).with_params(PlanParams {
        repair: true,
        ..Default::default()
    })
}

/// Enumerate every commit order the dependency graph allows and apply the
/// actions in that order.
fn destinations_of_all_orders(plan: &TimedReconfigurationPlan) -> Vec<Configuration> {
    fn explore(
        plan: &TimedReconfigurationPlan,
        deps: &Dependencies,
        order: &mut Vec<usize>,
        out: &mut Vec<Configuration>,
    ) {
        if deps.is_complete() {
            let mut cfg = plan.source().clone();
            for index in order.iter() {
                plan.actions()[*index].apply(&mut cfg).expect("replayable");
            }
            out.push(cfg);
            return;
        }
        for index in deps.ready_set() {
            let mut next = deps.clone();
            assert!(next.commit(index));
            order.push(index);
            explore(plan, &next, order, out);
            order.pop();
        }
    }

    let deps = Dependencies::from_plan(plan);
    let mut out = Vec::new();
    explore(plan, &deps, &mut Vec::new(), &mut out);
    out
}

#[test]
fn every_consistent_order_reaches_the_same_destination() {
    // A boot, a dependent migration, and an unrelated stop: several valid
    // interleavings exist.
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 4, 4096));
    cfg.add_online(Node::new("n2", 2, 2048));
    cfg.add_offline(Node::new("n3", 4, 4096));
    cfg.set_run_on(VirtualMachine::new("vm1", 3, 2048), "n1").unwrap();
    cfg.set_run_on(VirtualMachine::new("vm2", 1, 512), "n2").unwrap();

    let next = NextStateSpec::new()
        .run("vm1")
        .terminate("vm2")
        .set_online("n3");
    let fence = PlacementConstraint::Fence {
        vms: vec!["vm1".into()],
        nodes: vec!["n3".into()],
    };
    let planned = planner().plan(&cfg, &next, &[fence]).unwrap();
    assert!(planned.plan.size() >= 3);

    let reference = planned.plan.destination().unwrap();
    let all = destinations_of_all_orders(&planned.plan);
    assert!(all.len() > 1, "expected more than one consistent order");
    for destination in all {
        assert_eq!(destination, reference);
    }
}

#[test]
fn committing_out_of_order_is_refused() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 2, 2048));
    cfg.add_offline(Node::new("n2", 4, 4096));
    cfg.set_run_on(VirtualMachine::new("vm1", 2, 2048), "n1").unwrap();

    let next = NextStateSpec::new().run("vm1").set_online("n2").set_offline("n1");
    let planned = planner().plan(&cfg, &next, &[]).unwrap();
    let mut deps = Dependencies::from_plan(&planned.plan);

    // The last action in replay order (the shutdown of n1) cannot commit
    // before the migration vacating it.
    let last = planned.plan.size() - 1;
    assert!(!deps.commit(last));
    for ready in deps.ready_set() {
        assert!(deps.commit(ready));
    }
    assert!(deps.commit(last) || !deps.is_complete());
}

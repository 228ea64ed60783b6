//! End-to-end planning scenarios through the public API.

use replan_core::{
    ActionKind, Configuration, FirstFitVJobScheduler, LinearDurationEvaluator, NextStateSpec,
    Node, PlacementConstraint, PlanParams, Planner, VJob, VirtualMachine,
};

fn init_logs() {
    // RUST_LOG controls the verbosity; later calls are no-ops.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn planner() -> Planner<LinearDurationEvaluator> {
    init_logs();
    Planner::new(LinearDurationEvaluator::default()).with_params(PlanParams {
        repair: true,
        ..Default::default()
    })
}

#[test]
fn vm_moves_to_a_node_that_must_boot_first() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 1, 1024));
    cfg.add_offline(Node::new("n2", 1, 1024));
    cfg.set_run_on(VirtualMachine::new("vm1", 1, 512), "n1").unwrap();

    let next = NextStateSpec::new().run("vm1").set_online("n2");
    let fence = PlacementConstraint::Fence {
        vms: vec!["vm1".into()],
        nodes: vec!["n2".into()],
    };
    let planned = planner().plan(&cfg, &next, &[fence]).unwrap();

    assert!(planned.plan.size() >= 2);
    let kinds: Vec<&ActionKind> = planned.plan.actions().iter().map(|a| &a.kind).collect();
    assert!(matches!(kinds[0], ActionKind::Boot { node } if node == "n2"));
    assert!(kinds.iter().any(|k| matches!(
        k,
        ActionKind::Migration { vm, source, destination }
            if vm == "vm1" && source == "n1" && destination == "n2"
    )));

    // The boot completes before the migration may land on n2.
    let boot = &planned.plan.actions()[0];
    let migration = planned
        .plan
        .actions()
        .iter()
        .find(|a| matches!(a.kind, ActionKind::Migration { .. }))
        .unwrap();
    assert!(migration.start >= boot.finish);

    let destination = planned.plan.destination().unwrap();
    assert!(destination.is_online("n2"));
    assert_eq!(destination.location_of("vm1"), Some("n2"));
}

#[test]
fn satisfied_target_yields_an_empty_plan() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 8, 8192));
    cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1").unwrap();
    cfg.set_run_on(VirtualMachine::new("vm2", 2, 1024), "n1").unwrap();

    let next = NextStateSpec::new().run("vm1").run("vm2");
    let planned = planner().plan(&cfg, &next, &[]).unwrap();
    assert_eq!(planned.plan.size(), 0);
    assert_eq!(planned.statistics.objective, 0);
    assert_eq!(planned.plan.destination().unwrap(), cfg);
}

#[test]
fn resume_resolves_remote_when_the_local_node_is_short() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 5, 8192));
    cfg.add_online(Node::new("n2", 8, 8192));
    let sleeper = VirtualMachine::new("vm1", 0, 0).with_demand(6, 1024);
    cfg.set_sleep_on(sleeper, "n1").unwrap();

    let planned = planner()
        .plan(&cfg, &NextStateSpec::new().run("vm1"), &[])
        .unwrap();
    assert_eq!(planned.plan.size(), 1);
    let action = &planned.plan.actions()[0];
    match &action.kind {
        ActionKind::Resume {
            vm,
            source,
            destination,
        } => {
            assert_eq!(vm, "vm1");
            assert_eq!(source, "n1");
            assert_eq!(destination, "n2");
        }
        other => panic!("unexpected action {other:?}"),
    }
    // Remote resume takes the remote duration (default 3), not the local
    // one (default 2).
    assert_eq!(action.finish - action.start, 3);
}

#[test]
fn oversubscribed_job_regresses_whole() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 4, 4096));
    cfg.add_online(Node::new("n2", 4, 4096));
    cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1").unwrap();
    cfg.add_waiting(VirtualMachine::new("vm2", 8, 1024));
    let job = VJob::new("greedy", vec!["vm1".into(), "vm2".into()]);

    let next = FirstFitVJobScheduler::compute(&cfg, &[job]);
    assert!(next.to_run.is_empty());
    assert_eq!(next.to_sleep, vec!["vm1".to_string()]);

    // Planning the regressed spec suspends vm1 in place and leaves vm2
    // waiting.
    let planned = planner().plan(&cfg, &next, &[]).unwrap();
    let destination = planned.plan.destination().unwrap();
    assert!(destination.is_sleeping("vm1"));
    assert!(destination.is_waiting("vm2"));
}

#[test]
fn spread_separates_two_vms() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 8, 8192));
    cfg.add_online(Node::new("n2", 8, 8192));
    cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1").unwrap();
    cfg.set_run_on(VirtualMachine::new("vm2", 2, 1024), "n1").unwrap();

    let spread = PlacementConstraint::Spread {
        vms: vec!["vm1".into(), "vm2".into()],
    };
    let planned = planner()
        .plan(&cfg, &NextStateSpec::new().run("vm1").run("vm2"), &[spread])
        .unwrap();
    let destination = planned.plan.destination().unwrap();
    assert_ne!(
        destination.location_of("vm1"),
        destination.location_of("vm2")
    );
    // Exactly one VM moves.
    assert_eq!(planned.plan.size(), 1);
}

#[test]
fn node_shutdown_evacuates_its_vms() {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("n1", 4, 4096));
    cfg.add_online(Node::new("n2", 4, 4096));
    cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1").unwrap();

    let next = NextStateSpec::new().run("vm1").set_offline("n1");
    let planned = planner().plan(&cfg, &next, &[]).unwrap();
    let destination = planned.plan.destination().unwrap();
    assert!(destination.is_offline("n1"));
    assert_eq!(destination.location_of("vm1"), Some("n2"));

    // The migration away finishes before the shutdown starts.
    let migration = planned
        .plan
        .actions()
        .iter()
        .find(|a| matches!(a.kind, ActionKind::Migration { .. }))
        .unwrap();
    let shutdown = planned
        .plan
        .actions()
        .iter()
        .find(|a| matches!(a.kind, ActionKind::Shutdown { .. }))
        .unwrap();
    assert!(shutdown.start >= migration.finish);
}

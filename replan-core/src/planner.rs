//! Planner entry point: build the problem, post the constraints, search,
//! and package the plan with its statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::configuration::Configuration;
use crate::constraints::{PlacementConstraint, VJob};
use crate::durations::DurationEvaluator;
use crate::error::{PlanError, Result};
use crate::first_fit::FirstFitVJobScheduler;
use crate::heuristics;
use crate::partition;
use crate::plan::TimedReconfigurationPlan;
use crate::problem::{NextStateSpec, ReconfigurationProblem};
use crate::solver::SearchConfig;
use crate::statistics::SolutionStatistics;

/// Planner knobs, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanParams {
    /// Cooperative wall-clock budget for the search, in milliseconds.
    pub time_limit_ms: Option<u64>,
    /// Prefer keeping every VM where it currently runs.
    pub repair: bool,
    /// Override the computed scheduling horizon.
    pub horizon: Option<u32>,
    /// Split the problem along constraint connectivity and solve the parts
    /// on worker threads.
    pub partitioning: bool,
}

impl PlanParams {
    pub fn from_toml(doc: &str) -> Result<Self> {
        toml::from_str(doc).map_err(|e| PlanError::InvalidParams {
            reason: e.to_string(),
        })
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

/// A found plan together with the effort spent finding it.
#[derive(Debug, Clone)]
pub struct PlannedReconfiguration {
    pub plan: TimedReconfigurationPlan,
    pub statistics: SolutionStatistics,
}

/// The planning front door: owns the duration policy and the parameters.
pub struct Planner<E: DurationEvaluator> {
    durations: E,
    params: PlanParams,
}

impl<E: DurationEvaluator> Planner<E> {
    pub fn new(durations: E) -> Self {
        Self {
            durations,
            params: PlanParams::default(),
        }
    }

    pub fn with_params(mut self, params: PlanParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &PlanParams {
        &self.params
    }

    pub fn durations(&self) -> &E {
        &self.durations
    }

    /// Compute a plan turning `source` into a snapshot satisfying `next`
    /// under `constraints`.
    pub fn plan(
        &self,
        source: &Configuration,
        next: &NextStateSpec,
        constraints: &[PlacementConstraint],
    ) -> Result<PlannedReconfiguration> {
        if self.params.partitioning {
            partition::plan_partitioned(self, source, next, constraints, &[])
        } else {
            self.plan_part(source, next, constraints, &[])
        }
    }

    /// Queue mode: derive the wanted states by first-fit over the jobs,
    /// then plan with the jobs' constraints.
    pub fn plan_queue(
        &self,
        source: &Configuration,
        queue: &[VJob],
    ) -> Result<PlannedReconfiguration> {
        let next = FirstFitVJobScheduler::compute(source, queue);
        let constraints: Vec<PlacementConstraint> = queue
            .iter()
            .flat_map(|j| j.constraints.iter().cloned())
            .collect();
        if self.params.partitioning {
            partition::plan_partitioned(self, source, &next, &constraints, queue)
        } else {
            self.plan_part(source, &next, &constraints, queue)
        }
    }

    /// Solve one (sub-)problem end to end.
    pub(crate) fn plan_part(
        &self,
        source: &Configuration,
        next: &NextStateSpec,
        constraints: &[PlacementConstraint],
        jobs: &[VJob],
    ) -> Result<PlannedReconfiguration> {
        let mut problem =
            ReconfigurationProblem::build(source, next, &self.durations, self.params.horizon)?;
        for constraint in constraints {
            constraint.post(&mut problem)?;
        }
        let branchers = heuristics::build_branchers(&problem, jobs, self.params.repair);
        let config = SearchConfig {
            time_limit: self.params.time_limit(),
        };
        debug!(
            nodes = problem.nodes().len(),
            horizon = problem.horizon(),
            "solving reconfiguration problem"
        );
        let outcome = problem.solve(&branchers, &config);
        match outcome.best {
            Some((solution, objective)) => {
                let plan = problem.extract_plan(&solution)?;
                #[cfg(debug_assertions)]
                {
                    // The timed replay and the model results must agree.
                    let replayed = plan.destination()?;
                    let modeled = problem.resulting_configuration(&solution)?;
                    debug_assert_eq!(replayed, modeled);
                }
                if outcome.statistics.timeout {
                    warn!(objective, "time limit hit, plan may be sub-optimal");
                }
                info!(
                    objective,
                    actions = plan.size(),
                    nodes = outcome.statistics.nodes,
                    backtracks = outcome.statistics.backtracks,
                    "plan found"
                );
                Ok(PlannedReconfiguration {
                    plan,
                    statistics: SolutionStatistics::from_solving(objective, &outcome.statistics),
                })
            }
            None => Err(PlanError::NoPlanFound {
                statistics: outcome.statistics,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{Node, VirtualMachine};
    use crate::durations::LinearDurationEvaluator;

    fn planner() -> Planner<LinearDurationEvaluator> {
        Planner::new(LinearDurationEvaluator::default())
    }

    #[test]
    fn params_load_from_toml() {
        let params = PlanParams::from_toml(
            r#"
            time_limit_ms = 250
            repair = true
            "#,
        )
        .unwrap();
        assert_eq!(params.time_limit(), Some(Duration::from_millis(250)));
        assert!(params.repair);
        assert!(!params.partitioning);
    }

    #[test]
    fn infeasible_demand_reports_no_plan_with_statistics() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 2, 1024));
        cfg.add_waiting(VirtualMachine::new("vm1", 4, 512));
        let err = planner()
            .plan(&cfg, &NextStateSpec::new().run("vm1"), &[])
            .unwrap_err();
        match err {
            PlanError::NoPlanFound { statistics } => assert!(!statistics.timeout),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn queue_with_readmitted_member_plans_cleanly() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 4, 4096));
        cfg.add_online(Node::new("n2", 4, 4096));
        cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1").unwrap();
        cfg.add_waiting(VirtualMachine::new("vm2", 8, 1024));
        let greedy = VJob::new("greedy", vec!["vm1".into(), "vm2".into()]);
        let rescue = VJob::new("rescue", vec!["vm1".into()]);
        let planned = planner().plan_queue(&cfg, &[greedy, rescue]).unwrap();
        let destination = planned.plan.destination().unwrap();
        assert!(destination.is_running("vm1"));
        assert!(destination.is_waiting("vm2"));
    }

    #[test]
    fn fence_is_enforced() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 4, 4096));
        cfg.add_online(Node::new("n2", 4, 4096));
        cfg.add_waiting(VirtualMachine::new("vm1", 1, 512));
        let fence = PlacementConstraint::Fence {
            vms: vec!["vm1".into()],
            nodes: vec!["n2".into()],
        };
        let planned = planner()
            .plan(&cfg, &NextStateSpec::new().run("vm1"), &[fence])
            .unwrap();
        let destination = planned.plan.destination().unwrap();
        assert_eq!(destination.location_of("vm1"), Some("n2"));
    }
}

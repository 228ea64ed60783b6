//! Constraint-based datacenter reconfiguration planning.
//!
//! Given a snapshot of nodes and virtual machines, the wanted next states
//! and a set of placement constraints, the planner computes a timed
//! sequence of actions (migrations, runs, stops, suspends, resumes, node
//! boots and shutdowns) that reaches a satisfying snapshot without ever
//! exceeding any node's CPU or memory capacity along the way, minimizing
//! the summed action durations.
//!
//! ```no_run
//! use replan_core::{
//!     Configuration, LinearDurationEvaluator, NextStateSpec, Node, Planner,
//!     VirtualMachine,
//! };
//!
//! # fn main() -> replan_core::Result<()> {
//! let mut cfg = Configuration::new();
//! cfg.add_online(Node::new("n1", 8, 8192));
//! cfg.add_online(Node::new("n2", 8, 8192));
//! cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1")?;
//!
//! let planner = Planner::new(LinearDurationEvaluator::default());
//! let planned = planner.plan(&cfg, &NextStateSpec::new().run("vm1"), &[])?;
//! println!("{}", planned.plan);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod configuration;
pub mod constraints;
pub mod dependencies;
pub mod durations;
pub mod error;
pub mod first_fit;
pub mod heuristics;
pub mod packing;
pub mod partition;
pub mod plan;
pub mod planner;
pub mod problem;
pub mod scheduling;
pub mod slice;
pub mod solver;
pub mod statistics;

pub use configuration::{Configuration, Node, VirtualMachine, VmState};
pub use constraints::{PlacementConstraint, VJob};
pub use dependencies::Dependencies;
pub use durations::{DurationEvaluator, LinearDurationEvaluator, LinearExpr};
pub use error::{PlanError, Result};
pub use first_fit::FirstFitVJobScheduler;
pub use plan::{Action, ActionKind, TimedReconfigurationPlan};
pub use planner::{PlanParams, PlannedReconfiguration, Planner};
pub use problem::{NextStateSpec, ReconfigurationProblem};
pub use statistics::{SolutionStatistics, SolvingStatistics};

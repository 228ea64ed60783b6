//! Duration evaluation policy.
//!
//! Every action kind has an independently configurable minimum duration,
//! evaluated per VM or node attributes. The planner treats an evaluation
//! failure as a build-time modeling error.

use serde::{Deserialize, Serialize};

use crate::configuration::{Node, VirtualMachine};
use crate::error::{PlanError, Result};

/// Per-action-kind duration evaluation.
///
/// Durations are expressed in the planner's abstract time unit (the same
/// unit as slice starts/ends).
pub trait DurationEvaluator: Send + Sync {
    fn migration(&self, vm: &VirtualMachine) -> Result<u32>;
    fn run(&self, vm: &VirtualMachine) -> Result<u32>;
    fn stop(&self, vm: &VirtualMachine) -> Result<u32>;
    fn suspend(&self, vm: &VirtualMachine) -> Result<u32>;
    fn local_resume(&self, vm: &VirtualMachine) -> Result<u32>;
    fn remote_resume(&self, vm: &VirtualMachine) -> Result<u32>;
    fn startup(&self, node: &Node) -> Result<u32>;
    fn shutdown(&self, node: &Node) -> Result<u32>;
}

/// A linear expression `base + per_memory_mb * memory`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearExpr {
    pub base: u32,
    #[serde(default)]
    pub per_memory_mb: f64,
}

impl LinearExpr {
    pub const fn constant(base: u32) -> Self {
        Self {
            base,
            per_memory_mb: 0.0,
        }
    }

    fn eval(&self, memory_mb: u32, entity: &str) -> Result<u32> {
        let extra = self.per_memory_mb * memory_mb as f64;
        if !extra.is_finite() || extra < 0.0 {
            return Err(PlanError::DurationEvaluation {
                entity: entity.to_string(),
                reason: format!("expression yields invalid value {extra}"),
            });
        }
        Ok(self.base.saturating_add(extra as u32))
    }
}

/// Linear duration evaluator, loadable from TOML.
///
/// ```toml
/// [migration]
/// base = 2
/// per_memory_mb = 0.001
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearDurationEvaluator {
    pub migration: LinearExpr,
    pub run: LinearExpr,
    pub stop: LinearExpr,
    pub suspend: LinearExpr,
    pub local_resume: LinearExpr,
    pub remote_resume: LinearExpr,
    pub startup: LinearExpr,
    pub shutdown: LinearExpr,
}

impl Default for LinearDurationEvaluator {
    fn default() -> Self {
        Self {
            migration: LinearExpr::constant(2),
            run: LinearExpr::constant(1),
            stop: LinearExpr::constant(1),
            suspend: LinearExpr::constant(2),
            local_resume: LinearExpr::constant(2),
            remote_resume: LinearExpr::constant(3),
            startup: LinearExpr::constant(1),
            shutdown: LinearExpr::constant(1),
        }
    }
}

impl LinearDurationEvaluator {
    /// Load the policy from a TOML document.
    pub fn from_toml(doc: &str) -> Result<Self> {
        toml::from_str(doc).map_err(|e| PlanError::DurationEvaluation {
            entity: "<policy>".to_string(),
            reason: e.to_string(),
        })
    }
}

impl DurationEvaluator for LinearDurationEvaluator {
    fn migration(&self, vm: &VirtualMachine) -> Result<u32> {
        self.migration.eval(vm.memory_demand, &vm.name)
    }

    fn run(&self, vm: &VirtualMachine) -> Result<u32> {
        self.run.eval(vm.memory_demand, &vm.name)
    }

    fn stop(&self, vm: &VirtualMachine) -> Result<u32> {
        self.stop.eval(vm.memory_consumption, &vm.name)
    }

    fn suspend(&self, vm: &VirtualMachine) -> Result<u32> {
        self.suspend.eval(vm.memory_consumption, &vm.name)
    }

    fn local_resume(&self, vm: &VirtualMachine) -> Result<u32> {
        self.local_resume.eval(vm.memory_demand, &vm.name)
    }

    fn remote_resume(&self, vm: &VirtualMachine) -> Result<u32> {
        self.remote_resume.eval(vm.memory_demand, &vm.name)
    }

    fn startup(&self, node: &Node) -> Result<u32> {
        self.startup.eval(node.memory_capacity, &node.name)
    }

    fn shutdown(&self, node: &Node) -> Result<u32> {
        self.shutdown.eval(node.memory_capacity, &node.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_distinguish_local_and_remote_resume() {
        let eval = LinearDurationEvaluator::default();
        let vm = VirtualMachine::new("vm1", 1, 512);
        assert!(eval.remote_resume(&vm).unwrap() > eval.local_resume(&vm).unwrap());
    }

    #[test]
    fn loads_from_toml() {
        let eval = LinearDurationEvaluator::from_toml(
            r#"
            [migration]
            base = 4
            per_memory_mb = 0.01
            "#,
        )
        .unwrap();
        let vm = VirtualMachine::new("vm1", 1, 1000);
        assert_eq!(eval.migration(&vm).unwrap(), 4 + 10);
        // Unspecified kinds keep their defaults.
        assert_eq!(eval.run(&vm).unwrap(), 1);
    }

    #[test]
    fn rejects_negative_coefficients() {
        let eval = LinearDurationEvaluator {
            migration: LinearExpr {
                base: 1,
                per_memory_mb: -1.0,
            },
            ..Default::default()
        };
        let vm = VirtualMachine::new("vm1", 1, 512);
        assert!(matches!(
            eval.migration(&vm),
            Err(PlanError::DurationEvaluation { .. })
        ));
    }
}

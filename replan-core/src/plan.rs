//! Concrete timed actions and reconfiguration plans.
//!
//! Actions are materialized once the solver commits values and are never
//! mutated. The action kind is a tagged variant; writers and the
//! dependency builder dispatch over it by pattern matching.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::configuration::Configuration;
use crate::error::{PlanError, Result};

/// What an action does, with kind-specific payload. Two actions are "the
/// same operation" when their kinds are equal, regardless of timing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Migration {
        vm: String,
        source: String,
        destination: String,
    },
    Run {
        vm: String,
        node: String,
    },
    Stop {
        vm: String,
        node: String,
    },
    Suspend {
        vm: String,
        node: String,
    },
    Resume {
        vm: String,
        source: String,
        destination: String,
    },
    Boot {
        node: String,
    },
    Shutdown {
        node: String,
    },
}

impl ActionKind {
    /// Node that will host something because of this action.
    pub fn incoming_node(&self) -> Option<&str> {
        match self {
            ActionKind::Migration { destination, .. } | ActionKind::Resume { destination, .. } => {
                Some(destination)
            }
            ActionKind::Run { node, .. } => Some(node),
            // A shutdown needs its node vacated before it can proceed.
            ActionKind::Shutdown { node } => Some(node),
            ActionKind::Stop { .. } | ActionKind::Suspend { .. } | ActionKind::Boot { .. } => None,
        }
    }

    /// Node this action vacates (or stops monopolizing, for a boot).
    pub fn outgoing_node(&self) -> Option<&str> {
        match self {
            ActionKind::Migration { source, .. } | ActionKind::Resume { source, .. } => {
                Some(source)
            }
            ActionKind::Stop { node, .. } | ActionKind::Suspend { node, .. } => Some(node),
            ActionKind::Boot { node } => Some(node),
            ActionKind::Run { .. } | ActionKind::Shutdown { .. } => None,
        }
    }
}

/// A concrete timed action of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub start: u32,
    pub finish: u32,
}

impl Action {
    pub fn new(kind: ActionKind, start: u32, finish: u32) -> Self {
        Self { kind, start, finish }
    }

    /// Timing-free equality, used by dependency bookkeeping.
    pub fn same_operation(&self, other: &Action) -> bool {
        self.kind == other.kind
    }

    /// Replay this action onto a configuration.
    pub fn apply(&self, cfg: &mut Configuration) -> Result<()> {
        match &self.kind {
            ActionKind::Migration {
                vm,
                source,
                destination,
            } => {
                let record = self.running_vm(cfg, vm, source)?;
                cfg.set_run_on(record, destination)
            }
            ActionKind::Run { vm, node } => {
                if !cfg.is_waiting(vm) {
                    return Err(self.replay_error(cfg, vm));
                }
                let record = self.vm_record(cfg, vm)?;
                cfg.set_run_on(record, node)
            }
            ActionKind::Stop { vm, node } => {
                self.running_vm(cfg, vm, node)?;
                cfg.set_terminated(vm);
                Ok(())
            }
            ActionKind::Suspend { vm, node } => {
                let record = self.running_vm(cfg, vm, node)?;
                cfg.set_sleep_on(record, node)
            }
            ActionKind::Resume {
                vm,
                source,
                destination,
            } => {
                if !cfg.is_sleeping(vm) || cfg.location_of(vm) != Some(source) {
                    return Err(self.replay_error(cfg, vm));
                }
                let record = self.vm_record(cfg, vm)?;
                cfg.set_run_on(record, destination)
            }
            ActionKind::Boot { node } => {
                let record = cfg.node(node).cloned().ok_or_else(|| PlanError::UnknownEntity {
                    entity: node.clone(),
                })?;
                if !cfg.is_offline(node) {
                    return Err(PlanError::NonViableConfiguration {
                        details: format!("cannot boot '{node}': not offline"),
                    });
                }
                cfg.add_online(record);
                Ok(())
            }
            ActionKind::Shutdown { node } => {
                let record = cfg.node(node).cloned().ok_or_else(|| PlanError::UnknownEntity {
                    entity: node.clone(),
                })?;
                if cfg.runnings_on(node).next().is_some() || cfg.sleepings_on(node).next().is_some()
                {
                    return Err(PlanError::NonViableConfiguration {
                        details: format!("cannot shut down '{node}': still hosting VMs"),
                    });
                }
                cfg.add_offline(record);
                Ok(())
            }
        }
    }

    fn vm_record(&self, cfg: &Configuration, vm: &str) -> Result<crate::configuration::VirtualMachine> {
        cfg.vm(vm).cloned().ok_or_else(|| PlanError::UnknownEntity {
            entity: vm.to_string(),
        })
    }

    fn running_vm(
        &self,
        cfg: &Configuration,
        vm: &str,
        expected_location: &str,
    ) -> Result<crate::configuration::VirtualMachine> {
        if !cfg.is_running(vm) || cfg.location_of(vm) != Some(expected_location) {
            return Err(self.replay_error(cfg, vm));
        }
        self.vm_record(cfg, vm)
    }

    fn replay_error(&self, cfg: &Configuration, vm: &str) -> PlanError {
        PlanError::NonViableConfiguration {
            details: format!(
                "cannot replay {self}: VM '{vm}' is in state {:?} at {:?}",
                cfg.state_of(vm),
                cfg.location_of(vm)
            ),
        }
    }

    /// Sort rank making a replay in start order valid: boots enable hosts
    /// first, shutdowns leave last.
    fn replay_rank(&self) -> u8 {
        match self.kind {
            ActionKind::Boot { .. } => 0,
            ActionKind::Shutdown { .. } => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ", self.start, self.finish)?;
        match &self.kind {
            ActionKind::Migration {
                vm,
                source,
                destination,
            } => write!(f, "migrate({vm},{source},{destination})"),
            ActionKind::Run { vm, node } => write!(f, "run({vm},{node})"),
            ActionKind::Stop { vm, node } => write!(f, "stop({vm},{node})"),
            ActionKind::Suspend { vm, node } => write!(f, "suspend({vm},{node})"),
            ActionKind::Resume {
                vm,
                source,
                destination,
            } => write!(f, "resume({vm},{source},{destination})"),
            ActionKind::Boot { node } => write!(f, "boot({node})"),
            ActionKind::Shutdown { node } => write!(f, "shutdown({node})"),
        }
    }
}

impl FromStr for Action {
    type Err = PlanError;

    /// Parse the plain line format `start:finish name(params...)`.
    fn from_str(line: &str) -> Result<Self> {
        let bad = |reason: &str| PlanError::PlanParse {
            line: line.to_string(),
            reason: reason.to_string(),
        };
        let (times, rest) = line
            .trim()
            .split_once(' ')
            .ok_or_else(|| bad("expected 'start:finish action'"))?;
        let (start, finish) = times
            .split_once(':')
            .ok_or_else(|| bad("expected 'start:finish'"))?;
        let start: u32 = start.parse().map_err(|_| bad("invalid start"))?;
        let finish: u32 = finish.parse().map_err(|_| bad("invalid finish"))?;

        let (name, args) = rest
            .strip_suffix(')')
            .and_then(|r| r.split_once('('))
            .ok_or_else(|| bad("expected 'name(params)'"))?;
        let args: Vec<&str> = args.split(',').map(str::trim).collect();
        let arg = |i: usize| -> Result<String> {
            args.get(i)
                .map(|s| s.to_string())
                .ok_or_else(|| bad("missing parameter"))
        };
        let kind = match (name, args.len()) {
            ("migrate", 3) => ActionKind::Migration {
                vm: arg(0)?,
                source: arg(1)?,
                destination: arg(2)?,
            },
            ("run", 2) => ActionKind::Run {
                vm: arg(0)?,
                node: arg(1)?,
            },
            ("stop", 2) => ActionKind::Stop {
                vm: arg(0)?,
                node: arg(1)?,
            },
            ("suspend", 2) => ActionKind::Suspend {
                vm: arg(0)?,
                node: arg(1)?,
            },
            ("resume", 3) => ActionKind::Resume {
                vm: arg(0)?,
                source: arg(1)?,
                destination: arg(2)?,
            },
            ("boot", 1) => ActionKind::Boot { node: arg(0)? },
            ("shutdown", 1) => ActionKind::Shutdown { node: arg(0)? },
            _ => return Err(bad("unknown action or wrong arity")),
        };
        Ok(Action::new(kind, start, finish))
    }
}

/// An ordered collection of timed actions plus the source snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedReconfigurationPlan {
    source: Configuration,
    actions: Vec<Action>,
}

impl TimedReconfigurationPlan {
    pub fn new(source: Configuration) -> Self {
        Self {
            source,
            actions: Vec::new(),
        }
    }

    pub fn add(&mut self, action: Action) {
        self.actions.push(action);
        self.actions
            .sort_by(|a, b| (a.start, a.replay_rank()).cmp(&(b.start, b.replay_rank())));
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    /// Actions in replay order (ascending start; boots first, shutdowns
    /// last within an instant).
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn size(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Moment the last action finishes.
    pub fn duration(&self) -> u32 {
        self.actions.iter().map(|a| a.finish).max().unwrap_or(0)
    }

    /// Replay every action onto the source to obtain the destination.
    pub fn destination(&self) -> Result<Configuration> {
        let mut cfg = self.source.clone();
        for action in &self.actions {
            action.apply(&mut cfg)?;
        }
        Ok(cfg)
    }

    /// Compact binary form of the plan.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Self-describing JSON form, source snapshot included.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Plain-text form, one `start:finish action(params)` line per action.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        for action in &self.actions {
            out.push_str(&action.to_string());
            out.push('\n');
        }
        out
    }

    /// Rebuild a plan from its plain-text form and a source snapshot.
    pub fn from_plain_text(source: Configuration, text: &str) -> Result<Self> {
        let mut plan = Self::new(source);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            plan.add(line.parse()?);
        }
        Ok(plan)
    }
}

impl fmt::Display for TimedReconfigurationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{Node, VirtualMachine};
    use pretty_assertions::assert_eq;

    fn sample_cfg() -> Configuration {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 4, 4096));
        cfg.add_offline(Node::new("n2", 4, 4096));
        cfg.set_run_on(VirtualMachine::new("vm1", 2, 1024), "n1")
            .unwrap();
        cfg
    }

    #[test]
    fn line_format_round_trip() {
        let actions = vec![
            Action::new(
                ActionKind::Migration {
                    vm: "vm1".into(),
                    source: "n1".into(),
                    destination: "n2".into(),
                },
                1,
                3,
            ),
            Action::new(ActionKind::Boot { node: "n2".into() }, 0, 1),
            Action::new(
                ActionKind::Resume {
                    vm: "vm2".into(),
                    source: "n1".into(),
                    destination: "n2".into(),
                },
                3,
                6,
            ),
        ];
        for action in actions {
            let parsed: Action = action.to_string().parse().unwrap();
            assert_eq!(parsed, action);
        }
    }

    #[test]
    fn plan_round_trips_through_both_formats() {
        let mut plan = TimedReconfigurationPlan::new(sample_cfg());
        plan.add(Action::new(ActionKind::Boot { node: "n2".into() }, 0, 1));
        plan.add(Action::new(
            ActionKind::Migration {
                vm: "vm1".into(),
                source: "n1".into(),
                destination: "n2".into(),
            },
            1,
            3,
        ));

        let text = plan.to_plain_text();
        let reparsed = TimedReconfigurationPlan::from_plain_text(sample_cfg(), &text).unwrap();
        assert_eq!(reparsed, plan);

        let bytes = plan.to_bytes().unwrap();
        let decoded = TimedReconfigurationPlan::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, plan);

        let json = plan.to_json().unwrap();
        let rehydrated = TimedReconfigurationPlan::from_json(&json).unwrap();
        assert_eq!(rehydrated, plan);
    }

    #[test]
    fn replay_yields_destination() {
        let mut plan = TimedReconfigurationPlan::new(sample_cfg());
        plan.add(Action::new(
            ActionKind::Migration {
                vm: "vm1".into(),
                source: "n1".into(),
                destination: "n2".into(),
            },
            1,
            3,
        ));
        plan.add(Action::new(ActionKind::Boot { node: "n2".into() }, 0, 1));

        let dst = plan.destination().unwrap();
        assert!(dst.is_online("n2"));
        assert_eq!(dst.location_of("vm1"), Some("n2"));
        assert_eq!(plan.duration(), 3);
    }

    #[test]
    fn replay_rejects_impossible_transition() {
        let mut plan = TimedReconfigurationPlan::new(sample_cfg());
        // vm1 is running, not waiting: a Run cannot replay.
        plan.add(Action::new(
            ActionKind::Run {
                vm: "vm1".into(),
                node: "n1".into(),
            },
            0,
            1,
        ));
        assert!(plan.destination().is_err());
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert!("nonsense".parse::<Action>().is_err());
        assert!("0:1 warp(vm1,n1)".parse::<Action>().is_err());
        assert!("0 run(vm1,n1)".parse::<Action>().is_err());
        assert!("0:1 migrate(vm1,n1)".parse::<Action>().is_err());
    }
}

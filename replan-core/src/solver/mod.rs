//! Embedded constraint solver: integer domains, propagation to fixpoint and
//! depth-first branch-and-bound search.
//!
//! The solver is deliberately small: the reconfiguration model only needs
//! bounds/enumerated domains, stateless propagators and a prioritized
//! brancher list. Backtracking restores domain snapshots instead of keeping
//! a trail, which is sound precisely because propagators carry no state
//! between calls.

pub mod domain;
pub mod propagation;
pub mod search;

pub use domain::{Contradiction, DomainStore, VarId};
pub use propagation::{propagate_to_fixpoint, Propagator};
pub use search::{minimize, Brancher, SearchConfig, SearchOutcome, Solution};

//! Slices: the reserved time intervals every action model is built from.
//!
//! A slice binds a hosting-node variable to a time interval with a fixed
//! CPU/memory height. Consuming slices are anchored to the current host and
//! start at the beginning of the horizon; demanding slices end at the
//! horizon and their host may still be open.

use crate::solver::{DomainStore, VarId};

/// Handle to a slice owned by the reconfiguration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SliceId(pub(crate) usize);

impl SliceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a slice occupies resources from the start of the horizon or
/// claims them until its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// Anchored at the current host, starts at 0, releases at `end`.
    Consuming,
    /// Must be satisfied through the end of the horizon, occupies from
    /// `start`.
    Demanding,
}

/// A time interval `[start, end]` with `start + duration = end`, hosted at
/// the node `hoster` resolves to, with constant resource heights.
#[derive(Debug, Clone)]
pub struct Slice {
    pub name: String,
    pub kind: SliceKind,
    pub hoster: VarId,
    pub start: VarId,
    pub duration: VarId,
    pub end: VarId,
    pub cpu_height: u32,
    pub memory_height: u32,
}

impl Slice {
    /// Create a consuming slice fixed to `node` over `[0, end]` with `end`
    /// free in `[0, horizon]`.
    pub fn consuming(
        store: &mut DomainStore,
        name: impl Into<String>,
        node_index: usize,
        horizon: u32,
        cpu_height: u32,
        memory_height: u32,
    ) -> Self {
        let hoster = store.new_fixed(node_index as i64);
        let start = store.new_fixed(0);
        let duration = store.new_bounds(0, horizon as i64);
        let end = store.new_bounds(0, horizon as i64);
        Self {
            name: name.into(),
            kind: SliceKind::Consuming,
            hoster,
            start,
            duration,
            end,
            cpu_height,
            memory_height,
        }
    }

    /// Create a demanding slice over `[start, horizon]` with the hoster
    /// open over the node index range `[0, nb_nodes)`.
    pub fn demanding(
        store: &mut DomainStore,
        name: impl Into<String>,
        nb_nodes: usize,
        horizon: u32,
        cpu_height: u32,
        memory_height: u32,
    ) -> Self {
        let hoster = store.new_enumerated(0, nb_nodes as i64 - 1);
        let start = store.new_bounds(0, horizon as i64);
        let duration = store.new_bounds(0, horizon as i64);
        let end = store.new_fixed(horizon as i64);
        Self {
            name: name.into(),
            kind: SliceKind::Demanding,
            hoster,
            start,
            duration,
            end,
            cpu_height,
            memory_height,
        }
    }

    pub fn is_demanding(&self) -> bool {
        self.kind == SliceKind::Demanding
    }

    /// Administratively pin the hoster (tests and heuristics).
    pub fn fix_hoster(&self, store: &mut DomainStore, node_index: usize) -> bool {
        store.fix(self.hoster, node_index as i64).is_ok()
    }

    /// Administratively pin the start instant (tests and heuristics).
    pub fn fix_start(&self, store: &mut DomainStore, start: u32) -> bool {
        store.fix(self.start, start as i64).is_ok()
    }
}

//! Integer variable store for the embedded solver.
//!
//! Two domain shapes: plain bounds intervals for time variables, and small
//! enumerated bitsets for node-index variables (which need holes when a
//! node is filtered out). Any update that would empty a domain returns
//! [`Contradiction`]; contradictions never escape the search loop.

use smallvec::{smallvec, SmallVec};

/// Handle to a variable owned by a [`DomainStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) u32);

impl VarId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A domain wipe-out. Recoverable: consumed by the search engine's
/// backtracking only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contradiction;

#[derive(Debug, Clone)]
enum Domain {
    Bounds { lo: i64, hi: i64 },
    Bits { offset: i64, words: SmallVec<[u64; 4]> },
}

impl Domain {
    fn lo(&self) -> i64 {
        match self {
            Domain::Bounds { lo, .. } => *lo,
            Domain::Bits { offset, words } => {
                for (w, word) in words.iter().enumerate() {
                    if *word != 0 {
                        return offset + (w as i64) * 64 + word.trailing_zeros() as i64;
                    }
                }
                unreachable!("empty bitset domain")
            }
        }
    }

    fn hi(&self) -> i64 {
        match self {
            Domain::Bounds { hi, .. } => *hi,
            Domain::Bits { offset, words } => {
                for (w, word) in words.iter().enumerate().rev() {
                    if *word != 0 {
                        return offset + (w as i64) * 64 + 63 - word.leading_zeros() as i64;
                    }
                }
                unreachable!("empty bitset domain")
            }
        }
    }

    fn contains(&self, value: i64) -> bool {
        match self {
            Domain::Bounds { lo, hi } => *lo <= value && value <= *hi,
            Domain::Bits { offset, words } => {
                let bit = value - offset;
                if bit < 0 || bit as usize >= words.len() * 64 {
                    return false;
                }
                words[bit as usize / 64] & (1u64 << (bit as usize % 64)) != 0
            }
        }
    }

    fn size(&self) -> u64 {
        match self {
            Domain::Bounds { lo, hi } => (hi - lo + 1) as u64,
            Domain::Bits { words, .. } => words.iter().map(|w| w.count_ones() as u64).sum(),
        }
    }
}

/// Arena of integer variables with snapshot/restore backtracking.
#[derive(Debug, Clone, Default)]
pub struct DomainStore {
    domains: Vec<Domain>,
}

impl DomainStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// New bounds-interval variable over `[lo, hi]`.
    pub fn new_bounds(&mut self, lo: i64, hi: i64) -> VarId {
        assert!(lo <= hi, "empty initial domain [{lo}, {hi}]");
        self.domains.push(Domain::Bounds { lo, hi });
        VarId(self.domains.len() as u32 - 1)
    }

    /// New enumerated variable over `[lo, hi]`, supporting holes.
    pub fn new_enumerated(&mut self, lo: i64, hi: i64) -> VarId {
        assert!(lo <= hi, "empty initial domain [{lo}, {hi}]");
        let span = (hi - lo + 1) as usize;
        let mut words: SmallVec<[u64; 4]> = smallvec![0; span.div_ceil(64)];
        for bit in 0..span {
            words[bit / 64] |= 1u64 << (bit % 64);
        }
        self.domains.push(Domain::Bits { offset: lo, words });
        VarId(self.domains.len() as u32 - 1)
    }

    /// New variable already fixed to `value`.
    pub fn new_fixed(&mut self, value: i64) -> VarId {
        self.new_bounds(value, value)
    }

    pub fn lo(&self, var: VarId) -> i64 {
        self.domains[var.index()].lo()
    }

    pub fn hi(&self, var: VarId) -> i64 {
        self.domains[var.index()].hi()
    }

    pub fn is_fixed(&self, var: VarId) -> bool {
        let d = &self.domains[var.index()];
        d.lo() == d.hi()
    }

    /// The value of a fixed variable; `None` when still open.
    pub fn value(&self, var: VarId) -> Option<i64> {
        let d = &self.domains[var.index()];
        let lo = d.lo();
        (lo == d.hi()).then_some(lo)
    }

    pub fn contains(&self, var: VarId, value: i64) -> bool {
        self.domains[var.index()].contains(value)
    }

    pub fn size(&self, var: VarId) -> u64 {
        self.domains[var.index()].size()
    }

    /// Values of an enumerated (or bounds) domain, ascending.
    pub fn values(&self, var: VarId) -> Vec<i64> {
        let d = &self.domains[var.index()];
        match d {
            Domain::Bounds { lo, hi } => (*lo..=*hi).collect(),
            Domain::Bits { .. } => {
                let (lo, hi) = (d.lo(), d.hi());
                (lo..=hi).filter(|v| d.contains(*v)).collect()
            }
        }
    }

    /// Raise the lower bound. Returns whether the domain changed.
    pub fn set_lo(&mut self, var: VarId, value: i64) -> Result<bool, Contradiction> {
        let d = &mut self.domains[var.index()];
        if value <= d.lo() {
            return Ok(false);
        }
        if value > d.hi() {
            return Err(Contradiction);
        }
        match d {
            Domain::Bounds { lo, .. } => *lo = value,
            Domain::Bits { offset, words } => {
                let cut = value - *offset;
                for bit in 0..cut.max(0) as usize {
                    if bit < words.len() * 64 {
                        words[bit / 64] &= !(1u64 << (bit % 64));
                    }
                }
            }
        }
        Ok(true)
    }

    /// Lower the upper bound. Returns whether the domain changed.
    pub fn set_hi(&mut self, var: VarId, value: i64) -> Result<bool, Contradiction> {
        let d = &mut self.domains[var.index()];
        if value >= d.hi() {
            return Ok(false);
        }
        if value < d.lo() {
            return Err(Contradiction);
        }
        match d {
            Domain::Bounds { hi, .. } => *hi = value,
            Domain::Bits { offset, words } => {
                let first_out = (value - *offset + 1).max(0) as usize;
                for bit in first_out..words.len() * 64 {
                    words[bit / 64] &= !(1u64 << (bit % 64));
                }
            }
        }
        Ok(true)
    }

    /// Fix the variable to `value`.
    pub fn fix(&mut self, var: VarId, value: i64) -> Result<bool, Contradiction> {
        if !self.contains(var, value) {
            return Err(Contradiction);
        }
        let a = self.set_lo(var, value)?;
        let b = self.set_hi(var, value)?;
        Ok(a || b)
    }

    /// Remove a single value. On a bounds domain only boundary values can
    /// be removed; interior removals are ignored (bounds consistency).
    pub fn remove(&mut self, var: VarId, value: i64) -> Result<bool, Contradiction> {
        let d = &mut self.domains[var.index()];
        if !d.contains(value) {
            return Ok(false);
        }
        match d {
            Domain::Bounds { lo, hi } => {
                if *lo == *hi {
                    return Err(Contradiction);
                }
                if value == *lo {
                    *lo += 1;
                } else if value == *hi {
                    *hi -= 1;
                } else {
                    return Ok(false);
                }
                Ok(true)
            }
            Domain::Bits { offset, words } => {
                let bit = (value - *offset) as usize;
                words[bit / 64] &= !(1u64 << (bit % 64));
                if words.iter().all(|w| *w == 0) {
                    return Err(Contradiction);
                }
                Ok(true)
            }
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<DomainSnapshot> {
        self.domains.iter().map(|d| DomainSnapshot(d.clone())).collect()
    }

    pub(crate) fn restore(&mut self, snapshot: &[DomainSnapshot]) {
        debug_assert_eq!(snapshot.len(), self.domains.len());
        for (d, s) in self.domains.iter_mut().zip(snapshot) {
            *d = s.0.clone();
        }
    }
}

/// Opaque saved domain used by the search engine.
#[derive(Debug, Clone)]
pub(crate) struct DomainSnapshot(Domain);

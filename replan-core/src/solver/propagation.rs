//! Propagator trait, fixpoint loop and the arithmetic/channel propagators
//! shared by the reconfiguration model.
//!
//! Propagators are stateless between calls: every call reads the current
//! domains and filters them. Backtracking therefore only has to restore the
//! [`DomainStore`].

use super::domain::{Contradiction, DomainStore, VarId};

/// A constraint filter. `propagate` returns whether any domain changed.
pub trait Propagator {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction>;

    /// Short identifier for tracing.
    fn name(&self) -> &str {
        "propagator"
    }
}

/// Run every propagator until a full pass changes nothing.
pub fn propagate_to_fixpoint(
    propagators: &[Box<dyn Propagator>],
    store: &mut DomainStore,
) -> Result<(), Contradiction> {
    loop {
        let mut changed = false;
        for p in propagators {
            changed |= p.propagate(store)?;
        }
        if !changed {
            return Ok(());
        }
    }
}

/// `a + b = c`, bounds-consistent in all three directions.
pub struct Plus {
    pub a: VarId,
    pub b: VarId,
    pub c: VarId,
}

impl Propagator for Plus {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        changed |= store.set_lo(self.c, store.lo(self.a) + store.lo(self.b))?;
        changed |= store.set_hi(self.c, store.hi(self.a) + store.hi(self.b))?;
        changed |= store.set_lo(self.a, store.lo(self.c) - store.hi(self.b))?;
        changed |= store.set_hi(self.a, store.hi(self.c) - store.lo(self.b))?;
        changed |= store.set_lo(self.b, store.lo(self.c) - store.hi(self.a))?;
        changed |= store.set_hi(self.b, store.hi(self.c) - store.lo(self.a))?;
        Ok(changed)
    }

    fn name(&self) -> &str {
        "plus"
    }
}

/// `out = max(vars)`.
pub struct MaxOf {
    pub vars: Vec<VarId>,
    pub out: VarId,
}

impl Propagator for MaxOf {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        if self.vars.is_empty() {
            return Ok(false);
        }
        let mut changed = false;
        let max_lo = self.vars.iter().map(|v| store.lo(*v)).max().unwrap();
        let max_hi = self.vars.iter().map(|v| store.hi(*v)).max().unwrap();
        changed |= store.set_lo(self.out, max_lo)?;
        changed |= store.set_hi(self.out, max_hi)?;
        let out_hi = store.hi(self.out);
        for v in &self.vars {
            changed |= store.set_hi(*v, out_hi)?;
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "max-of"
    }
}

/// `out = sum(vars)`.
pub struct SumOf {
    pub vars: Vec<VarId>,
    pub out: VarId,
}

impl Propagator for SumOf {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        let sum_lo: i64 = self.vars.iter().map(|v| store.lo(*v)).sum();
        let sum_hi: i64 = self.vars.iter().map(|v| store.hi(*v)).sum();
        changed |= store.set_lo(self.out, sum_lo)?;
        changed |= store.set_hi(self.out, sum_hi)?;
        let out_lo = store.lo(self.out);
        let out_hi = store.hi(self.out);
        for v in &self.vars {
            let others_lo = sum_lo - store.lo(*v);
            let others_hi = sum_hi - store.hi(*v);
            changed |= store.set_hi(*v, out_hi - others_lo)?;
            changed |= store.set_lo(*v, out_lo - others_hi)?;
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "sum-of"
    }
}

/// Channels a selector variable into one of two constant durations:
/// `selector == reference ⟹ out = eq_value`, otherwise `out = ne_value`.
///
/// Used for migration (stay = 0, move = migration duration) and resume
/// (local vs remote duration).
pub struct SelectDuration {
    pub selector: VarId,
    pub reference: i64,
    pub eq_value: i64,
    pub ne_value: i64,
    pub out: VarId,
}

impl Propagator for SelectDuration {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        match store.value(self.selector) {
            Some(v) if v == self.reference => changed |= store.fix(self.out, self.eq_value)?,
            Some(_) => changed |= store.fix(self.out, self.ne_value)?,
            None => {
                if !store.contains(self.selector, self.reference) {
                    changed |= store.fix(self.out, self.ne_value)?;
                } else {
                    if !store.contains(self.out, self.eq_value) {
                        changed |= store.remove(self.selector, self.reference)?;
                    }
                    if !store.contains(self.out, self.ne_value) {
                        changed |= store.fix(self.selector, self.reference)?;
                    }
                }
            }
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "select-duration"
    }
}

/// `a != b`.
pub struct NotEqual {
    pub a: VarId,
    pub b: VarId,
}

impl Propagator for NotEqual {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        if let Some(v) = store.value(self.a) {
            changed |= store.remove(self.b, v)?;
        }
        if let Some(v) = store.value(self.b) {
            changed |= store.remove(self.a, v)?;
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "not-equal"
    }
}

/// The two variable groups never share a committed value.
pub struct DisjointGroups {
    pub left: Vec<VarId>,
    pub right: Vec<VarId>,
}

impl Propagator for DisjointGroups {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let mut changed = false;
        for (owners, others) in [(&self.left, &self.right), (&self.right, &self.left)] {
            for var in owners.iter() {
                if let Some(v) = store.value(*var) {
                    for other in others.iter() {
                        changed |= store.remove(*other, v)?;
                    }
                }
            }
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "disjoint-groups"
    }
}

/// All variables take values inside exactly one of the candidate groups.
pub struct WithinOneGroup {
    pub vars: Vec<VarId>,
    pub groups: Vec<Vec<i64>>,
}

impl WithinOneGroup {
    fn group_alive(&self, store: &DomainStore, group: &[i64]) -> bool {
        self.vars
            .iter()
            .all(|v| group.iter().any(|value| store.contains(*v, *value)))
    }
}

impl Propagator for WithinOneGroup {
    fn propagate(&self, store: &mut DomainStore) -> Result<bool, Contradiction> {
        let alive: Vec<&Vec<i64>> = self
            .groups
            .iter()
            .filter(|g| self.group_alive(store, g))
            .collect();
        if alive.is_empty() {
            return Err(Contradiction);
        }
        let mut changed = false;
        // Prune values covered by no surviving group.
        for var in &self.vars {
            for value in store.values(*var) {
                if !alive.iter().any(|g| g.contains(&value)) {
                    changed |= store.remove(*var, value)?;
                }
            }
        }
        Ok(changed)
    }

    fn name(&self) -> &str {
        "within-one-group"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_filters_all_directions() {
        let mut store = DomainStore::new();
        let a = store.new_bounds(0, 10);
        let b = store.new_bounds(2, 3);
        let c = store.new_bounds(0, 8);
        let p = Plus { a, b, c };
        p.propagate(&mut store).unwrap();
        assert_eq!((store.lo(c), store.hi(c)), (2, 8));
        assert_eq!((store.lo(a), store.hi(a)), (0, 6));
    }

    #[test]
    fn select_duration_channels_both_ways() {
        let mut store = DomainStore::new();
        let sel = store.new_enumerated(0, 3);
        let out = store.new_bounds(0, 5);
        let p = SelectDuration {
            selector: sel,
            reference: 1,
            eq_value: 0,
            ne_value: 5,
            out,
        };

        // Selector resolved away from the reference fixes the remote value.
        store.remove(sel, 1).unwrap();
        p.propagate(&mut store).unwrap();
        assert_eq!(store.value(out), Some(5));
    }

    #[test]
    fn select_duration_forces_reference_when_remote_impossible() {
        let mut store = DomainStore::new();
        let sel = store.new_enumerated(0, 3);
        let out = store.new_bounds(0, 4);
        let p = SelectDuration {
            selector: sel,
            reference: 2,
            eq_value: 0,
            ne_value: 5,
            out,
        };
        p.propagate(&mut store).unwrap();
        assert_eq!(store.value(sel), Some(2));
        assert_eq!(store.value(out), Some(0));
    }

    #[test]
    fn within_one_group_prunes_dead_groups() {
        let mut store = DomainStore::new();
        let a = store.new_enumerated(0, 3);
        let b = store.new_enumerated(0, 3);
        let p = WithinOneGroup {
            vars: vec![a, b],
            groups: vec![vec![0, 1], vec![2, 3]],
        };
        // `a` can no longer sit in the first group, so both variables must
        // use the second one.
        store.set_lo(a, 2).unwrap();
        p.propagate(&mut store).unwrap();
        assert_eq!(store.values(b), vec![2, 3]);
    }

    #[test]
    fn fixpoint_chains_propagators() {
        let mut store = DomainStore::new();
        let a = store.new_bounds(0, 10);
        let b = store.new_bounds(0, 10);
        let c = store.new_fixed(4);
        let d = store.new_bounds(0, 10);
        let props: Vec<Box<dyn Propagator>> = vec![
            Box::new(Plus { a, b, c }),
            Box::new(MaxOf {
                vars: vec![a, b],
                out: d,
            }),
        ];
        propagate_to_fixpoint(&props, &mut store).unwrap();
        assert_eq!(store.hi(d), 4);
    }
}

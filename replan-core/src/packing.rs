//! Dynamic bin-packing propagation for one resource dimension.
//!
//! Items are demanding slices (constant heights), bins are nodes with a
//! load variable in `[0, capacity]`. The CPU and memory instances share the
//! hoster assignment variables. Items must be presented sorted by
//! non-increasing size: the elimination/commitment scan short-circuits at
//! the first inconclusive item, which is only valid under that order, so a
//! violated precondition fails construction instead of being re-sorted.

use tracing::trace;

use crate::error::{PlanError, Result};
use crate::solver::{Contradiction, DomainStore, Propagator, VarId};

/// One item to pack: the shared hoster variable and this dimension's size.
#[derive(Debug, Clone, Copy)]
pub struct PackItem {
    pub hoster: VarId,
    pub size: i64,
}

/// Bin-packing propagator over one dimension (CPU or memory).
pub struct BinPacking {
    dimension: String,
    /// Sorted by non-increasing size.
    items: Vec<PackItem>,
    /// One load variable per bin, indexed by node index.
    loads: Vec<VarId>,
}

impl BinPacking {
    pub fn new(dimension: impl Into<String>, items: Vec<PackItem>, loads: Vec<VarId>) -> Result<Self> {
        let dimension = dimension.into();
        if items.windows(2).any(|w| w[0].size < w[1].size) {
            return Err(PlanError::UnsortedItems { dimension });
        }
        Ok(Self {
            dimension,
            items,
            loads,
        })
    }

    /// Candidate-sum bookkeeping: kernel is the certain load of a bin,
    /// envelope adds every undecided item that may still land there.
    fn sums(&self, store: &DomainStore) -> (Vec<i64>, Vec<i64>) {
        let mut kernel = vec![0i64; self.loads.len()];
        let mut envelope = vec![0i64; self.loads.len()];
        for item in &self.items {
            match store.value(item.hoster) {
                Some(bin) => {
                    kernel[bin as usize] += item.size;
                    envelope[bin as usize] += item.size;
                }
                None => {
                    for bin in store.values(item.hoster) {
                        envelope[bin as usize] += item.size;
                    }
                }
            }
        }
        (kernel, envelope)
    }
}

impl Propagator for BinPacking {
    fn propagate(&self, store: &mut DomainStore) -> std::result::Result<bool, Contradiction> {
        debug_assert!(
            self.items.windows(2).all(|w| w[0].size >= w[1].size),
            "{}: items must stay sorted non-increasing",
            self.dimension
        );
        let total: i64 = self.items.iter().map(|i| i.size).sum();
        let mut changed = false;
        loop {
            let (mut kernel, mut envelope) = self.sums(store);
            let mut filtered = false;

            // Per-bin load bounds from the kernel/envelope sets.
            for (bin, load) in self.loads.iter().enumerate() {
                filtered |= store.set_lo(*load, kernel[bin])?;
                filtered |= store.set_hi(*load, envelope[bin])?;
            }

            // Cross-bin bounds: every item lands somewhere, so the loads
            // sum to the total item size.
            let sum_lo: i64 = self.loads.iter().map(|l| store.lo(*l)).sum();
            let sum_hi: i64 = self.loads.iter().map(|l| store.hi(*l)).sum();
            for load in &self.loads {
                let others_hi = sum_hi - store.hi(*load);
                let others_lo = sum_lo - store.lo(*load);
                filtered |= store.set_lo(*load, total - others_hi)?;
                filtered |= store.set_hi(*load, total - others_lo)?;
            }

            // Single-item elimination/commitment, largest candidates first.
            // The scan stops at the first inconclusive item: by the sorted
            // order every later item is inconclusive too.
            for bin in 0..self.loads.len() {
                let load = self.loads[bin];
                for idx in 0..self.items.len() {
                    let item = self.items[idx];
                    if store.is_fixed(item.hoster)
                        || !store.contains(item.hoster, bin as i64)
                    {
                        continue;
                    }
                    if kernel[bin] + item.size > store.hi(load) {
                        trace!(
                            dimension = %self.dimension,
                            bin,
                            size = item.size,
                            "eliminating item from bin"
                        );
                        let previous = store.values(item.hoster);
                        store.remove(item.hoster, bin as i64)?;
                        envelope[bin] -= item.size;
                        filtered = true;
                        // The removal may have fixed the item elsewhere, in
                        // which case it stops being a candidate anywhere.
                        if let Some(home) = store.value(item.hoster) {
                            kernel[home as usize] += item.size;
                            for value in previous {
                                if value != home && value as usize != bin {
                                    envelope[value as usize] -= item.size;
                                }
                            }
                        }
                    } else if envelope[bin] - item.size < store.lo(load) {
                        trace!(
                            dimension = %self.dimension,
                            bin,
                            size = item.size,
                            "committing item to bin"
                        );
                        let previous = store.values(item.hoster);
                        store.fix(item.hoster, bin as i64)?;
                        kernel[bin] += item.size;
                        for value in previous {
                            if value as usize != bin {
                                envelope[value as usize] -= item.size;
                            }
                        }
                        filtered = true;
                    } else {
                        break;
                    }
                }
            }

            #[cfg(debug_assertions)]
            {
                // The incremental kernel/envelope sums must agree with a
                // recomputation from the domains; divergence is a
                // propagation bug.
                let (fresh_kernel, fresh_envelope) = self.sums(store);
                debug_assert_eq!(
                    kernel, fresh_kernel,
                    "{}: kernel sums diverged from the domains",
                    self.dimension
                );
                debug_assert_eq!(
                    envelope, fresh_envelope,
                    "{}: envelope sums diverged from the domains",
                    self.dimension
                );
            }

            changed |= filtered;
            if !filtered {
                return Ok(changed);
            }
        }
    }

    fn name(&self) -> &str {
        "bin-packing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(sizes: &[i64], caps: &[i64]) -> (DomainStore, Vec<PackItem>, Vec<VarId>) {
        let mut store = DomainStore::new();
        let items: Vec<PackItem> = sizes
            .iter()
            .map(|s| PackItem {
                hoster: store.new_enumerated(0, caps.len() as i64 - 1),
                size: *s,
            })
            .collect();
        let loads: Vec<VarId> = caps.iter().map(|c| store.new_bounds(0, *c)).collect();
        (store, items, loads)
    }

    #[test]
    fn rejects_unsorted_items() {
        let (_, items, loads) = setup(&[2, 5], &[6, 8]);
        assert!(matches!(
            BinPacking::new("cpu", items, loads),
            Err(PlanError::UnsortedItems { .. })
        ));
    }

    #[test]
    fn eliminates_oversized_item_after_commitment() {
        // Items 5,4,3,2 over bins of capacity 6 and 8: once an item of
        // size 2 is committed to bin 0, the size-5 item no longer fits
        // there (5 + 2 > 6) and must be excluded.
        let (mut store, items, loads) = setup(&[5, 4, 3, 2], &[6, 8]);
        store.fix(items[3].hoster, 0).unwrap();
        let packing = BinPacking::new("cpu", items.clone(), loads).unwrap();
        packing.propagate(&mut store).unwrap();
        assert!(!store.contains(items[0].hoster, 0));
        assert_eq!(store.value(items[0].hoster), Some(1));
    }

    #[test]
    fn kernel_never_exceeds_capacity() {
        let (mut store, items, loads) = setup(&[5, 4], &[6, 8]);
        store.fix(items[0].hoster, 0).unwrap();
        let packing = BinPacking::new("cpu", items.clone(), loads.clone()).unwrap();
        packing.propagate(&mut store).unwrap();
        // The size-4 item cannot join bin 0 (5 + 4 > 6).
        assert_eq!(store.value(items[1].hoster), Some(1));
        assert_eq!(store.lo(loads[0]), 5);
        assert_eq!(store.lo(loads[1]), 4);
    }

    #[test]
    fn overloaded_instance_contradicts() {
        let (mut store, items, loads) = setup(&[5, 4], &[4, 4]);
        let packing = BinPacking::new("cpu", items, loads).unwrap();
        assert!(packing.propagate(&mut store).is_err());
    }

    #[test]
    fn commits_item_needed_to_reach_minimum_load() {
        let (mut store, items, loads) = setup(&[5, 3], &[8, 8]);
        // Require bin 0 to carry at least 6: only keeping both items there
        // reaches it, so both must commit.
        store.set_lo(loads[0], 6).unwrap();
        store.fix(items[0].hoster, 0).unwrap();
        let packing = BinPacking::new("cpu", items.clone(), loads).unwrap();
        packing.propagate(&mut store).unwrap();
        assert_eq!(store.value(items[1].hoster), Some(0));
    }
}

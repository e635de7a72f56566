//! Composition tracing — how much of a crate came from each ancestor
//!
//! For a record R of weight w with contribution c_i from parent P_i, the
//! share of R attributable to P_i is c_i / w. Shares multiply along a path
//! and add up across paths, so every ancestor gets the grams of R that
//! originated with it.
//!
//! Attributed grams are `f64`. They are exact for whole-gram weights up to
//! 2^53 g; beyond that the shares are rounded. Record weights themselves
//! stay exact `u64`.

use crate::error::{LedgerError, Result};
use crate::record::{Address, CrateRecord};
use crate::storage::RecordStore;
use std::collections::{HashMap, HashSet};

/// Validated ancestor sub-graph of one record. Iterate it as many times as
/// needed; each pass recomputes from the captured records.
#[derive(Debug, Clone)]
pub struct CompositionTrace {
    target: Address,
    records: HashMap<Address, CrateRecord>,
    /// Target first; every record appears before all of its parents
    order: Vec<Address>,
}

/// Walk the ancestry of `address`, failing rather than looping on cycles or
/// lineages deeper than `max_depth` generations.
pub fn trace_composition<S: RecordStore + ?Sized>(
    store: &S,
    address: &Address,
    max_depth: usize,
) -> Result<CompositionTrace> {
    let target = store.get(address)?;
    let mut walker = Walker {
        store,
        root: address,
        max_depth,
        records: HashMap::new(),
        heights: HashMap::new(),
        on_path: HashSet::new(),
        post_order: Vec::new(),
    };
    walker.run(target)?;
    let mut order = walker.post_order;
    order.reverse();
    Ok(CompositionTrace {
        target: address.clone(),
        records: walker.records,
        order,
    })
}

struct Walker<'a, S: ?Sized> {
    store: &'a S,
    root: &'a Address,
    max_depth: usize,
    records: HashMap<Address, CrateRecord>,
    /// Longest chain of parents above each finished record
    heights: HashMap<Address, usize>,
    on_path: HashSet<Address>,
    post_order: Vec<Address>,
}

/// A record whose parents are still being walked
struct Frame {
    record: CrateRecord,
    depth: usize,
    next_parent: usize,
    height: usize,
}

impl<S: RecordStore + ?Sized> Walker<'_, S> {
    /// Depth-first over `parent_crates` with an explicit stack, so lineage
    /// length is bounded by `max_depth` and not by the thread's stack.
    fn run(&mut self, target: CrateRecord) -> Result<()> {
        self.on_path.insert(target.address().clone());
        let mut stack = vec![Frame {
            record: target,
            depth: 0,
            next_parent: 0,
            height: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(parent) = frame.record.parent_crates().get(frame.next_parent).cloned() else {
                if let Some(done) = stack.pop() {
                    let height = done.height;
                    self.finish(done);
                    if let Some(child) = stack.last_mut() {
                        child.height = child.height.max(height + 1);
                    }
                }
                continue;
            };
            frame.next_parent += 1;
            let depth = frame.depth + 1;
            if depth > self.max_depth {
                return Err(self.too_deep());
            }
            if self.on_path.contains(&parent) {
                return Err(LedgerError::CycleDetected(parent));
            }
            if let Some(&height) = self.heights.get(&parent) {
                if depth + height > self.max_depth {
                    return Err(self.too_deep());
                }
                frame.height = frame.height.max(height + 1);
                continue;
            }

            let record = self.store.get(&parent).map_err(|e| match e {
                LedgerError::NotFound(a) => LedgerError::ParentNotFound(a),
                other => other,
            })?;
            self.on_path.insert(parent);
            stack.push(Frame {
                record,
                depth,
                next_parent: 0,
                height: 0,
            });
        }
        Ok(())
    }

    fn finish(&mut self, frame: Frame) {
        let address = frame.record.address().clone();
        self.on_path.remove(&address);
        self.heights.insert(address.clone(), frame.height);
        self.post_order.push(address.clone());
        self.records.insert(address, frame.record);
    }

    fn too_deep(&self) -> LedgerError {
        LedgerError::DepthExceeded {
            address: self.root.clone(),
            max_depth: self.max_depth,
        }
    }
}

impl CompositionTrace {
    pub fn target(&self) -> &Address {
        &self.target
    }

    /// Number of ancestors (the target itself excluded)
    pub fn len(&self) -> usize {
        self.order.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: &Address) -> bool {
        address != &self.target && self.records.contains_key(address)
    }

    /// Records of the target and every ancestor, target first
    pub fn records(&self) -> impl Iterator<Item = &CrateRecord> {
        self.order.iter().filter_map(|a| self.records.get(a))
    }

    pub fn record(&self, address: &Address) -> Option<&CrateRecord> {
        self.records.get(address)
    }

    /// Lazily yield `(ancestor, grams)` pairs. An ancestor is emitted only
    /// once all of its descendants in the trace have been propagated.
    pub fn iter(&self) -> CompositionIter<'_> {
        CompositionIter {
            trace: self,
            next: 0,
            mass: HashMap::new(),
        }
    }

    /// Only origin crates (those with no parents)
    pub fn roots(&self) -> impl Iterator<Item = (Address, f64)> + '_ {
        self.iter()
            .filter(move |(a, _)| self.records.get(a).is_some_and(|r| r.is_root()))
    }

    /// Grams of the target attributable to `ancestor` (0 if unrelated)
    pub fn weight_from(&self, ancestor: &Address) -> f64 {
        self.iter()
            .find(|(a, _)| a == ancestor)
            .map(|(_, grams)| grams)
            .unwrap_or(0.0)
    }

    pub fn to_map(&self) -> HashMap<Address, f64> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a CompositionTrace {
    type Item = (Address, f64);
    type IntoIter = CompositionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct CompositionIter<'a> {
    trace: &'a CompositionTrace,
    next: usize,
    mass: HashMap<&'a Address, f64>,
}

impl<'a> Iterator for CompositionIter<'a> {
    type Item = (Address, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let trace = self.trace;
        loop {
            let address = trace.order.get(self.next)?;
            self.next += 1;
            let record = trace.records.get(address)?;
            let is_target = address == &trace.target;
            let grams = if is_target {
                record.weight() as f64
            } else {
                self.mass.get(address).copied().unwrap_or(0.0)
            };

            if record.weight() > 0 {
                for (i, parent) in record.parent_crates().iter().enumerate() {
                    let share = record.contribution(i) as f64 / record.weight() as f64;
                    *self.mass.entry(parent).or_insert(0.0) += grams * share;
                }
            }

            if !is_target {
                return Some((address.clone(), grams));
            }
        }
    }
}

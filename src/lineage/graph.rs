//! Supply chain graph — every crate, its depth, and its path to an origin
//!
//! Depth is the number of generations to the nearest origin crate, found by
//! a breadth-first walk outward from the origins along parent links.

use crate::error::{LedgerError, Result};
use crate::record::{Address, CrateRecord};
use crate::storage::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateNode {
    pub record: CrateRecord,
    pub is_root: bool,
    /// Generations from the nearest origin crate (0 for origins)
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyChainGraph {
    pub total_crates: usize,
    pub root_crates: Vec<Address>,
    pub crates: BTreeMap<Address, CrateNode>,
    /// Shortest path from each crate back to an origin, crate first
    pub lineages: BTreeMap<Address, Vec<Address>>,
}

impl SupplyChainGraph {
    pub fn build<S: RecordStore + ?Sized>(store: &S) -> Result<Self> {
        let records = store
            .addresses()
            .iter()
            .map(|a| store.get(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<CrateRecord>) -> Self {
        let mut children: HashMap<Address, Vec<Address>> = HashMap::new();
        for record in &records {
            for parent in record.parent_crates() {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(record.address().clone());
            }
        }

        let mut crates: BTreeMap<Address, CrateNode> = records
            .into_iter()
            .map(|r| {
                let is_root = r.is_root();
                (r.address().clone(), CrateNode { record: r, is_root, depth: 0 })
            })
            .collect();
        let root_crates: Vec<Address> = crates
            .values()
            .filter(|n| n.is_root)
            .map(|n| n.record.address().clone())
            .collect();

        // via[x] = the parent through which x was first reached
        let mut via: HashMap<Address, Option<Address>> = HashMap::new();
        let mut queue: VecDeque<(Address, usize)> = VecDeque::new();
        for root in &root_crates {
            via.insert(root.clone(), None);
            queue.push_back((root.clone(), 0));
        }
        while let Some((address, depth)) = queue.pop_front() {
            if let Some(node) = crates.get_mut(&address) {
                node.depth = depth;
            }
            for child in children.get(&address).into_iter().flatten() {
                if crates.contains_key(child) && !via.contains_key(child) {
                    via.insert(child.clone(), Some(address.clone()));
                    queue.push_back((child.clone(), depth + 1));
                }
            }
        }

        let lineages = crates
            .keys()
            .map(|address| {
                let mut path = vec![address.clone()];
                let mut current = address;
                while let Some(Some(parent)) = via.get(current) {
                    path.push(parent.clone());
                    current = parent;
                }
                (address.clone(), path)
            })
            .collect();

        Self {
            total_crates: crates.len(),
            root_crates,
            crates,
            lineages,
        }
    }

    pub fn node(&self, address: &Address) -> Option<&CrateNode> {
        self.crates.get(address)
    }

    /// Records from the origin crate down to `address`
    pub fn history(&self, address: &Address) -> Result<Vec<CrateRecord>> {
        let path = self
            .lineages
            .get(address)
            .ok_or_else(|| LedgerError::NotFound(address.clone()))?;
        Ok(path
            .iter()
            .rev()
            .filter_map(|a| self.crates.get(a))
            .map(|n| n.record.clone())
            .collect())
    }

    /// Total grams landed across all origin crates
    pub fn landed_mass(&self) -> u64 {
        self.root_crates
            .iter()
            .filter_map(|a| self.crates.get(a))
            .map(|n| n.record.weight())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CreateRequest, MixRequest, TransferRequest, TransitionEngine};
    use crate::record::{Authority, CrateDetails};
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn details(id: &str) -> CrateDetails {
        CrateDetails::new(id, Utc::now(), "h", "ref")
    }

    #[test]
    fn test_graph_depths_and_history() {
        let engine = TransitionEngine::new(MemoryStore::new());
        let owner = Authority::new("fisher");
        let a = Address::new("a");
        let b = Address::new("b");
        let m = Address::new("m");
        let t = Address::new("t");
        engine.create(CreateRequest::new(a.clone(), owner.clone(), details("A"), 300)).unwrap();
        engine.create(CreateRequest::new(b.clone(), owner.clone(), details("B"), 200)).unwrap();
        engine
            .mix(MixRequest::new(m.clone(), owner.clone(), details("M"), vec![a.clone(), b.clone()]))
            .unwrap();
        engine
            .transfer(TransferRequest::new(t.clone(), owner, details("T"), 500, m.clone()))
            .unwrap();

        let graph = SupplyChainGraph::build(engine.store()).unwrap();
        assert_eq!(graph.total_crates, 4);
        assert_eq!(graph.root_crates, vec![a.clone(), b.clone()]);
        assert_eq!(graph.node(&t).unwrap().depth, 2);
        assert_eq!(graph.node(&m).unwrap().depth, 1);
        assert!(graph.node(&a).unwrap().is_root);
        assert_eq!(graph.landed_mass(), 500);

        let path = &graph.lineages[&t];
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], t);
        assert_eq!(path[1], m);

        let history = graph.history(&t).unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[0].is_root());
        assert_eq!(history[2].address(), &t);

        assert!(matches!(
            graph.history(&Address::new("nope")),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_graph() {
        let graph = SupplyChainGraph::build(&MemoryStore::new()).unwrap();
        assert_eq!(graph.total_crates, 0);
        assert!(graph.root_crates.is_empty());
        assert!(graph.lineages.is_empty());
    }
}

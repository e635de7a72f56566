//! In-memory record store
//!
//! The address map lock is held only long enough to insert or look up a
//! slot. Appends then serialise on the record's own lock, so operations on
//! disjoint addresses never wait on each other.

use super::RecordStore;
use crate::error::{LedgerError, Result};
use crate::guard::AuthorityGuard;
use crate::record::{Address, Authority, CrateRecord};
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type Slot = Arc<RwLock<CrateRecord>>;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<Address, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from already committed records
    pub fn from_records(records: Vec<CrateRecord>) -> Result<Self> {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                let address = record.address().clone();
                if map.contains_key(&address) {
                    return Err(LedgerError::DuplicateAddress(address));
                }
                map.insert(address, Arc::new(RwLock::new(record)));
            }
        }
        Ok(store)
    }

    /// All records, ordered by creation time then address
    pub fn snapshot(&self) -> Vec<CrateRecord> {
        let slots: Vec<Slot> = self.records.read().values().cloned().collect();
        let mut records: Vec<CrateRecord> = slots.iter().map(|s| s.read().clone()).collect();
        records.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.address().cmp(b.address()))
        });
        records
    }

    fn slot(&self, address: &Address) -> Result<Slot> {
        self.records
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(address.clone()))
    }
}

impl RecordStore for MemoryStore {
    fn create(&self, record: CrateRecord) -> Result<CrateRecord> {
        let mut map = self.records.write();
        let address = record.address().clone();
        if map.contains_key(&address) {
            return Err(LedgerError::DuplicateAddress(address));
        }
        map.insert(address, Arc::new(RwLock::new(record.clone())));
        debug!("Stored record {}", record.address());
        Ok(record)
    }

    fn get(&self, address: &Address) -> Result<CrateRecord> {
        let slot = self.slot(address)?;
        let record = slot.read().clone();
        Ok(record)
    }

    fn contains(&self, address: &Address) -> bool {
        self.records.read().contains_key(address)
    }

    fn append_parent_link(
        &self,
        address: &Address,
        parent: &Address,
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let slot = self.slot(address)?;
        let mut record = slot.write();
        AuthorityGuard::authorize(&record, caller)?;
        if record.push_parent(parent) {
            info!("Linked parent {} -> {}", address, parent);
        } else {
            debug!("Parent link {} -> {} already present", address, parent);
        }
        Ok(record.clone())
    }

    fn append_child_links(
        &self,
        address: &Address,
        children: &[Address],
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let slot = self.slot(address)?;
        let mut record = slot.write();
        AuthorityGuard::authorize(&record, caller)?;
        let added = record.push_children(children);
        if added > 0 {
            info!("Linked {} children to {}", added, address);
        } else {
            debug!("Child links of {} already present", address);
        }
        Ok(record.clone())
    }

    fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.records.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}

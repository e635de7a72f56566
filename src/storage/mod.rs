//! Record Store — durable keyed storage of crate records
//!
//! Records are created once at a fresh address and never deleted. The only
//! mutations are authorised, deduplicated appends to the link lists.
//! Implementations must never expose a half-applied commit to readers.

mod file;
mod memory;
pub mod snapshot;

pub use file::{FileStore, StoreMetadata};
pub use memory::MemoryStore;

use crate::error::Result;
use crate::record::{Address, Authority, CrateRecord};

/// Any conforming store the transition engine can commit to
pub trait RecordStore: Send + Sync {
    /// Insert a record at its address; fails `DuplicateAddress` if taken
    fn create(&self, record: CrateRecord) -> Result<CrateRecord>;

    /// Snapshot of the committed record; fails `NotFound`
    fn get(&self, address: &Address) -> Result<CrateRecord>;

    fn contains(&self, address: &Address) -> bool;

    /// Compare-and-append `parent` to the record's `parent_crates`.
    /// Only the record's authority may do this; a link already present is a no-op.
    fn append_parent_link(
        &self,
        address: &Address,
        parent: &Address,
        caller: &Authority,
    ) -> Result<CrateRecord>;

    /// Compare-and-append `children` to the record's `child_crates`
    fn append_child_links(
        &self,
        address: &Address,
        children: &[Address],
        caller: &Authority,
    ) -> Result<CrateRecord>;

    fn addresses(&self) -> Vec<Address>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

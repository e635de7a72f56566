//! Lineage Query Engine — read-only traversal of the parent/child graph
//!
//! Nothing here mutates the store. Every query works on snapshots of
//! committed records, so it may see a record before or after a concurrent
//! append, never halfway through one.

mod composition;
mod graph;
mod verify;

pub use composition::{trace_composition, CompositionIter, CompositionTrace};
pub use graph::{CrateNode, SupplyChainGraph};
pub use verify::verify_lineage;

//! Nautilink — crate lineage and mass-conservation ledger
//!
//! Tracks physical batches (e.g. fishing catches) as they are created, mixed,
//! split and handed off along a supply chain. Every operation conserves
//! recorded mass, and lineage can only point at records that already exist.

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod lineage;
pub mod record;
pub mod storage;

pub use config::LedgerConfig;
pub use engine::{
    CreateRequest, MixRequest, OperationRequest, SplitRequest, TransferRequest, TransitionEngine,
};
pub use error::{LedgerError, Result};
pub use guard::AuthorityGuard;
pub use lineage::{trace_composition, verify_lineage, CompositionTrace, SupplyChainGraph};
pub use record::{Address, Authority, CrateDetails, CrateRecord, OriginKind, Provenance};
pub use storage::{FileStore, MemoryStore, RecordStore};

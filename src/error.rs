//! Ledger errors
//!
//! Every failure is terminal for the requested operation: nothing is
//! committed, and the variant names the violated invariant so the caller
//! can correct the request and resubmit it deliberately.

use crate::record::{Address, Authority};

/// Errors raised by the record store, transition engine and lineage queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("A record already exists at address {0}")]
    DuplicateAddress(Address),

    #[error("Record not found: {0}")]
    NotFound(Address),

    #[error("Parent record not found: {0}")]
    ParentNotFound(Address),

    #[error("Caller {caller} is not the authority of record {address}")]
    Unauthorized { address: Address, caller: Authority },

    #[error("Invalid weight: {0}")]
    InvalidWeight(String),

    #[error("Split weight mismatch: {0}")]
    SplitWeightMismatch(String),

    #[error("Transfer weight {declared}g does not match parent {parent} weight {expected}g")]
    WeightMismatchOnTransfer {
        parent: Address,
        expected: u64,
        declared: u64,
    },

    #[error("Linking would make {0} its own ancestor")]
    CycleDetected(Address),

    #[error("Lineage of {address} is deeper than the limit of {max_depth}")]
    DepthExceeded { address: Address, max_depth: usize },

    #[error("Mix requires at least 2 parents, got {0}")]
    TooFewParents(usize),

    #[error("Parent {0} named more than once in a single mix")]
    DuplicateParent(Address),

    #[error("Integrity check failed for record {0}")]
    IntegrityViolation(Address),

    #[error("Ledger rejected the transaction: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

//! Operation requests — the boundary contract of the transition engine
//!
//! A request carries the verified caller identity, the address the new
//! record will live at, and the fields the operation needs. The response
//! is the committed record or a `LedgerError`.

use crate::record::{Address, Authority, CrateDetails};
use serde::{Deserialize, Serialize};

/// Register a freshly landed batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub address: Address,
    pub authority: Authority,
    pub details: CrateDetails,
    /// Grams
    pub weight: u64,
}

impl CreateRequest {
    pub fn new(address: Address, authority: Authority, details: CrateDetails, weight: u64) -> Self {
        Self {
            address,
            authority,
            details,
            weight,
        }
    }
}

/// Combine two or more parent crates into one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixRequest {
    pub address: Address,
    pub authority: Authority,
    pub details: CrateDetails,
    pub parents: Vec<Address>,
}

impl MixRequest {
    pub fn new(
        address: Address,
        authority: Authority,
        details: CrateDetails,
        parents: Vec<Address>,
    ) -> Self {
        Self {
            address,
            authority,
            details,
            parents,
        }
    }
}

/// Divide one parent among pre-registered siblings; each sibling is
/// committed by its own split request carrying the same siblings and
/// distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRequest {
    pub address: Address,
    pub authority: Authority,
    pub details: CrateDetails,
    /// Grams this sibling receives
    pub declared_weight: u64,
    pub parent: Address,
    pub siblings: Vec<Address>,
    /// Grams per sibling, parallel to `siblings`
    pub distribution: Vec<u64>,
}

/// Hand a crate to a new custodian, weight unchanged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub address: Address,
    pub authority: Authority,
    pub details: CrateDetails,
    pub weight: u64,
    pub parent: Address,
}

impl TransferRequest {
    pub fn new(
        address: Address,
        authority: Authority,
        details: CrateDetails,
        weight: u64,
        parent: Address,
    ) -> Self {
        Self {
            address,
            authority,
            details,
            weight,
            parent,
        }
    }
}

/// Any request the engine accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationRequest {
    Create(CreateRequest),
    Mix(MixRequest),
    Split(SplitRequest),
    Transfer(TransferRequest),
    /// Back-fill a parent link on `child`, authorised by the child's authority
    LinkParent {
        child: Address,
        parent: Address,
        caller: Authority,
    },
    /// Back-fill child links on `parent`, authorised by the parent's authority
    LinkChildren {
        parent: Address,
        children: Vec<Address>,
        caller: Authority,
    },
}

impl OperationRequest {
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::Create(_) => "create",
            OperationRequest::Mix(_) => "mix",
            OperationRequest::Split(_) => "split",
            OperationRequest::Transfer(_) => "transfer",
            OperationRequest::LinkParent { .. } => "link_parent",
            OperationRequest::LinkChildren { .. } => "link_children",
        }
    }
}

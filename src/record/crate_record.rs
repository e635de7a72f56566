//! CrateRecord — a physical batch and its provenance on the ledger
//!
//! Everything except the two link lists is fixed when the record is born.
//! `parent_crates` and `child_crates` only ever grow, and only through the
//! record store's authorised append operations.

use super::{seal, Address, Authority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which creation operation produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OriginKind {
    Create,
    Mix,
    Split,
    Transfer,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::Create => "Created",
            OriginKind::Mix => "Mixed",
            OriginKind::Split => "Split",
            OriginKind::Transfer => "Transferred",
        }
    }
}

/// Decentralised identifiers and capture location attached at creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub crate_did: Option<String>,
    pub owner_did: Option<String>,
    pub device_did: Option<String>,
    pub location: Option<String>,
}

/// Descriptive fields every creation operation supplies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateDetails {
    /// Human label, not guaranteed globally unique
    pub crate_id: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the off-chain artifact bytes
    pub content_hash: String,
    /// Locator of the off-chain artifact (e.g. an IPFS CID)
    pub artifact_ref: String,
    #[serde(default)]
    pub provenance: Provenance,
}

impl CrateDetails {
    pub fn new(
        crate_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        content_hash: impl Into<String>,
        artifact_ref: impl Into<String>,
    ) -> Self {
        Self {
            crate_id: crate_id.into(),
            timestamp,
            content_hash: content_hash.into(),
            artifact_ref: artifact_ref.into(),
            provenance: Provenance::default(),
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// A committed crate record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateRecord {
    address: Address,
    crate_id: String,
    /// Grams
    weight: u64,
    created_at: DateTime<Utc>,
    content_hash: String,
    artifact_ref: String,
    authority: Authority,
    #[serde(default)]
    provenance: Provenance,
    parent_crates: Vec<Address>,
    parent_weights: Vec<u64>,
    child_crates: Vec<Address>,
    split_distribution: Vec<u64>,
    origin_kind: OriginKind,
    seal: String,
}

/// Everything needed to mint a record, before it is sealed
#[derive(Debug, Clone)]
pub(crate) struct RecordDraft {
    pub address: Address,
    pub details: CrateDetails,
    pub authority: Authority,
    pub weight: u64,
    pub origin_kind: OriginKind,
    pub parent_crates: Vec<Address>,
    pub parent_weights: Vec<u64>,
    pub child_crates: Vec<Address>,
    pub split_distribution: Vec<u64>,
}

impl RecordDraft {
    /// Seal the draft. `parent_seals` must follow the order of `parent_crates`.
    pub fn seal(self, parent_seals: &[&str]) -> CrateRecord {
        let mut record = CrateRecord {
            address: self.address,
            crate_id: self.details.crate_id,
            weight: self.weight,
            created_at: self.details.timestamp,
            content_hash: self.details.content_hash,
            artifact_ref: self.details.artifact_ref,
            authority: self.authority,
            provenance: self.details.provenance,
            parent_crates: self.parent_crates,
            parent_weights: self.parent_weights,
            child_crates: self.child_crates,
            split_distribution: self.split_distribution,
            origin_kind: self.origin_kind,
            seal: String::new(),
        };
        record.seal = seal::compute(&record, parent_seals);
        record
    }
}

impl CrateRecord {
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn crate_id(&self) -> &str {
        &self.crate_id
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn artifact_ref(&self) -> &str {
        &self.artifact_ref
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn parent_crates(&self) -> &[Address] {
        &self.parent_crates
    }

    pub fn parent_weights(&self) -> &[u64] {
        &self.parent_weights
    }

    pub fn child_crates(&self) -> &[Address] {
        &self.child_crates
    }

    pub fn split_distribution(&self) -> &[u64] {
        &self.split_distribution
    }

    pub fn origin_kind(&self) -> OriginKind {
        self.origin_kind
    }

    pub fn seal(&self) -> &str {
        &self.seal
    }

    /// Origin crates have no parents
    pub fn is_root(&self) -> bool {
        self.parent_crates.is_empty()
    }

    /// Parents named when the record was created. Back-filled parent links
    /// come after these and carry no mass.
    pub fn creation_parents(&self) -> &[Address] {
        let n = self.parent_weights.len().min(self.parent_crates.len());
        &self.parent_crates[..n]
    }

    /// Siblings pre-registered by a split, parallel to `split_distribution`
    pub fn creation_siblings(&self) -> &[Address] {
        let n = self.split_distribution.len().min(self.child_crates.len());
        &self.child_crates[..n]
    }

    /// Mass (grams) this record received from the parent at `index`
    pub fn contribution(&self, index: usize) -> u64 {
        self.parent_weights.get(index).copied().unwrap_or(0)
    }

    /// Recompute the seal against the parents' current seals
    pub fn verify_seal(&self, parent_seals: &[&str]) -> bool {
        seal::compute(self, parent_seals) == self.seal
    }

    /// Append a parent link. Returns false if the link is already present.
    pub(crate) fn push_parent(&mut self, parent: &Address) -> bool {
        if self.parent_crates.contains(parent) {
            return false;
        }
        self.parent_crates.push(parent.clone());
        true
    }

    /// Append child links, skipping ones already present. Returns how many were added.
    pub(crate) fn push_children(&mut self, children: &[Address]) -> usize {
        let mut added = 0;
        for child in children {
            if !self.child_crates.contains(child) {
                self.child_crates.push(child.clone());
                added += 1;
            }
        }
        added
    }

    pub fn summary(&self) -> String {
        format!(
            "CrateRecord '{}' @ {} | {}g | {} | parents={} | children={} | authority={}",
            self.crate_id,
            self.address,
            self.weight,
            self.origin_kind.as_str(),
            self.parent_crates.len(),
            self.child_crates.len(),
            self.authority
        )
    }
}

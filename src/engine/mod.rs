//! Transition Engine — validates and commits crate operations
//!
//! Creation operations (create, mix, split, transfer) mint a new record that
//! points at its parents. Parents are never touched by the same call: the
//! reverse direction is completed later by separate, independently
//! authorised link operations. A record can only name parents that already
//! exist, which is what keeps the lineage graph acyclic.
//!
//! Nothing is retried here. A ledger failure is surfaced unchanged and the
//! caller decides whether to resubmit with a fresh address.
//!
//! Two checks read more than the record being written and so are held
//! together with their commit: sibling agreement for a split is serialised
//! per parent, and the ancestry check for a back-filled parent link is
//! serialised across all parent back-fills of this engine. Both locks are
//! local to one engine; processes sharing a store need the store's own
//! ordering for the same guarantee.

mod request;

pub use request::{CreateRequest, MixRequest, OperationRequest, SplitRequest, TransferRequest};

use crate::config::{LedgerConfig, DEFAULT_MAX_TRACE_DEPTH};
use crate::error::{LedgerError, Result};
use crate::guard::AuthorityGuard;
use crate::lineage::trace_composition;
use crate::record::{Address, Authority, CrateRecord, OriginKind, RecordDraft};
use crate::storage::RecordStore;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct TransitionEngine<S: RecordStore> {
    store: S,
    max_depth: usize,
    /// One lock per parent with a split in flight
    split_locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
    link_lock: Mutex<()>,
}

impl<S: RecordStore> TransitionEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_max_depth(store, DEFAULT_MAX_TRACE_DEPTH)
    }

    pub fn with_config(store: S, config: &LedgerConfig) -> Self {
        Self::with_max_depth(store, config.max_trace_depth)
    }

    pub fn with_max_depth(store: S, max_depth: usize) -> Self {
        Self {
            store,
            max_depth,
            split_locks: Mutex::new(HashMap::new()),
            link_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Dispatch a boundary request
    pub fn submit(&self, request: OperationRequest) -> Result<CrateRecord> {
        match request {
            OperationRequest::Create(req) => self.create(req),
            OperationRequest::Mix(req) => self.mix(req),
            OperationRequest::Split(req) => self.split(req),
            OperationRequest::Transfer(req) => self.transfer(req),
            OperationRequest::LinkParent {
                child,
                parent,
                caller,
            } => self.update_child_parent(&child, &parent, &caller),
            OperationRequest::LinkChildren {
                parent,
                children,
                caller,
            } => self.update_parent_children(&parent, &children, &caller),
        }
    }

    pub fn create(&self, req: CreateRequest) -> Result<CrateRecord> {
        let address = req.address.clone();
        let result = ensure_positive(req.weight, "create").and_then(|_| {
            let draft = RecordDraft {
                address: req.address,
                details: req.details,
                authority: req.authority,
                weight: req.weight,
                origin_kind: OriginKind::Create,
                parent_crates: Vec::new(),
                parent_weights: Vec::new(),
                child_crates: Vec::new(),
                split_distribution: Vec::new(),
            };
            self.commit(draft, &[])
        });
        report("create", &address, result)
    }

    pub fn mix(&self, req: MixRequest) -> Result<CrateRecord> {
        let address = req.address.clone();
        let result = self.try_mix(req);
        report("mix", &address, result)
    }

    fn try_mix(&self, req: MixRequest) -> Result<CrateRecord> {
        if req.parents.len() < 2 {
            return Err(LedgerError::TooFewParents(req.parents.len()));
        }
        let mut seen = HashSet::new();
        for parent in &req.parents {
            if parent == &req.address {
                return Err(LedgerError::CycleDetected(parent.clone()));
            }
            if !seen.insert(parent) {
                return Err(LedgerError::DuplicateParent(parent.clone()));
            }
        }

        let parents = req
            .parents
            .iter()
            .map(|p| self.fetch_parent(p))
            .collect::<Result<Vec<_>>>()?;
        let parent_weights: Vec<u64> = parents.iter().map(|p| p.weight()).collect();
        let weight = parent_weights
            .iter()
            .try_fold(0u64, |acc, w| acc.checked_add(*w))
            .ok_or_else(|| LedgerError::InvalidWeight("mixed weight overflows".into()))?;
        ensure_positive(weight, "mix")?;

        let seals: Vec<&str> = parents.iter().map(|p| p.seal()).collect();
        let draft = RecordDraft {
            address: req.address,
            details: req.details,
            authority: req.authority,
            weight,
            origin_kind: OriginKind::Mix,
            parent_crates: req.parents,
            parent_weights,
            child_crates: Vec::new(),
            split_distribution: Vec::new(),
        };
        self.commit(draft, &seals)
    }

    pub fn split(&self, req: SplitRequest) -> Result<CrateRecord> {
        let address = req.address.clone();
        let result = self.try_split(req);
        report("split", &address, result)
    }

    fn try_split(&self, req: SplitRequest) -> Result<CrateRecord> {
        let parent = req.parent.clone();
        let lock = self.split_lock(&parent);
        let result = {
            let _held = lock.lock();
            self.validate_and_commit_split(req)
        };
        self.release_split_lock(&parent, lock);
        result
    }

    fn split_lock(&self, parent: &Address) -> Arc<Mutex<()>> {
        self.split_locks
            .lock()
            .entry(parent.clone())
            .or_default()
            .clone()
    }

    /// Handles are only cloned or dropped under the map lock, so a count of
    /// one means no other split of this parent is in flight.
    fn release_split_lock(&self, parent: &Address, lock: Arc<Mutex<()>>) {
        let mut locks = self.split_locks.lock();
        drop(lock);
        if locks.get(parent).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(parent);
            debug!("Released split lock for {}", parent);
        }
    }

    fn validate_and_commit_split(&self, req: SplitRequest) -> Result<CrateRecord> {
        ensure_positive(req.declared_weight, "split")?;
        if req.parent == req.address {
            return Err(LedgerError::CycleDetected(req.parent));
        }
        let parent = self.fetch_parent(&req.parent)?;

        if req.siblings.is_empty() {
            return Err(LedgerError::SplitWeightMismatch("no siblings registered".into()));
        }
        if req.siblings.len() != req.distribution.len() {
            return Err(LedgerError::SplitWeightMismatch(format!(
                "{} siblings but {} distribution entries",
                req.siblings.len(),
                req.distribution.len()
            )));
        }
        if req.distribution.contains(&0) {
            return Err(LedgerError::InvalidWeight(
                "split distribution contains a zero share".into(),
            ));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = req.siblings.iter().find(|s| !seen.insert(*s)) {
            return Err(LedgerError::SplitWeightMismatch(format!(
                "sibling {} registered twice",
                dup
            )));
        }
        let total = req
            .distribution
            .iter()
            .try_fold(0u64, |acc, w| acc.checked_add(*w));
        if total != Some(parent.weight()) {
            let total = total.map_or_else(|| "an overflowing total".to_string(), |t| format!("{}g", t));
            return Err(LedgerError::SplitWeightMismatch(format!(
                "distribution sums to {}, parent {} weighs {}g",
                total,
                parent.address(),
                parent.weight()
            )));
        }
        let position = req
            .siblings
            .iter()
            .position(|s| s == &req.address)
            .ok_or_else(|| {
                LedgerError::SplitWeightMismatch(format!(
                    "{} is not among the registered siblings",
                    req.address
                ))
            })?;
        if req.distribution[position] != req.declared_weight {
            return Err(LedgerError::SplitWeightMismatch(format!(
                "declared {}g but distribution assigns {}g",
                req.declared_weight, req.distribution[position]
            )));
        }
        self.ensure_consistent_siblings(&req)?;

        let draft = RecordDraft {
            address: req.address,
            details: req.details,
            authority: req.authority,
            weight: req.declared_weight,
            origin_kind: OriginKind::Split,
            parent_crates: vec![req.parent],
            parent_weights: vec![req.declared_weight],
            child_crates: req.siblings,
            split_distribution: req.distribution,
        };
        self.commit(draft, &[parent.seal()])
    }

    /// Siblings already committed must describe the same split of the same
    /// parent. This only covers overlapping sibling sets: a second split of
    /// the parent into unrelated siblings, or a transfer of it, is not
    /// checked against earlier ones.
    fn ensure_consistent_siblings(&self, req: &SplitRequest) -> Result<()> {
        for sibling in req.siblings.iter().filter(|s| *s != &req.address) {
            let existing = match self.store.get(sibling) {
                Ok(record) => record,
                Err(LedgerError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let same_split = existing.origin_kind() == OriginKind::Split
                && existing.creation_parents() == [req.parent.clone()].as_slice()
                && existing.creation_siblings() == req.siblings.as_slice()
                && existing.split_distribution() == req.distribution.as_slice();
            if !same_split {
                return Err(LedgerError::SplitWeightMismatch(format!(
                    "sibling {} was committed with a different split",
                    sibling
                )));
            }
        }
        Ok(())
    }

    pub fn transfer(&self, req: TransferRequest) -> Result<CrateRecord> {
        let address = req.address.clone();
        let result = self.try_transfer(req);
        report("transfer", &address, result)
    }

    fn try_transfer(&self, req: TransferRequest) -> Result<CrateRecord> {
        ensure_positive(req.weight, "transfer")?;
        if req.parent == req.address {
            return Err(LedgerError::CycleDetected(req.parent));
        }
        let parent = self.fetch_parent(&req.parent)?;
        if req.weight != parent.weight() {
            return Err(LedgerError::WeightMismatchOnTransfer {
                parent: req.parent,
                expected: parent.weight(),
                declared: req.weight,
            });
        }
        let draft = RecordDraft {
            address: req.address,
            details: req.details,
            authority: req.authority,
            weight: req.weight,
            origin_kind: OriginKind::Transfer,
            parent_crates: vec![req.parent],
            parent_weights: vec![req.weight],
            child_crates: Vec::new(),
            split_distribution: Vec::new(),
        };
        self.commit(draft, &[parent.seal()])
    }

    /// Back-fill a parent link on `child`. Only the child's authority may do
    /// this. The link carries no mass; weights are fixed at creation.
    pub fn update_child_parent(
        &self,
        child: &Address,
        parent: &Address,
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let result = self.try_link_parent(child, parent, caller);
        report("link_parent", child, result)
    }

    fn try_link_parent(
        &self,
        child: &Address,
        parent: &Address,
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let record = self.store.get(child)?;
        AuthorityGuard::authorize(&record, caller)?;
        if child == parent {
            return Err(LedgerError::CycleDetected(child.clone()));
        }
        self.fetch_parent(parent)?;
        // the ancestry read below must not go stale before the append lands
        let _held = self.link_lock.lock();
        let ancestry = trace_composition(&self.store, parent, self.max_depth)?;
        if ancestry.contains(child) {
            return Err(LedgerError::CycleDetected(child.clone()));
        }
        self.store.append_parent_link(child, parent, caller)
    }

    /// Back-fill child links on `parent`. Only the parent's authority may do
    /// this. Children may be pre-registered addresses not committed yet.
    pub fn update_parent_children(
        &self,
        parent: &Address,
        children: &[Address],
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let result = self.try_link_children(parent, children, caller);
        report("link_children", parent, result)
    }

    fn try_link_children(
        &self,
        parent: &Address,
        children: &[Address],
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let record = self.store.get(parent)?;
        AuthorityGuard::authorize(&record, caller)?;
        if children.contains(parent) {
            return Err(LedgerError::CycleDetected(parent.clone()));
        }
        self.store.append_child_links(parent, children, caller)
    }

    fn fetch_parent(&self, address: &Address) -> Result<CrateRecord> {
        self.store.get(address).map_err(|e| match e {
            LedgerError::NotFound(a) => LedgerError::ParentNotFound(a),
            other => other,
        })
    }

    fn commit(&self, draft: RecordDraft, parent_seals: &[&str]) -> Result<CrateRecord> {
        let record = draft.seal(parent_seals);
        self.store.create(record)
    }
}

fn ensure_positive(weight: u64, op: &str) -> Result<()> {
    if weight == 0 {
        return Err(LedgerError::InvalidWeight(format!("{} requires a weight above 0g", op)));
    }
    Ok(())
}

fn report(op: &str, address: &Address, result: Result<CrateRecord>) -> Result<CrateRecord> {
    match &result {
        Ok(record) => info!("Committed {}: {}", op, record.summary()),
        Err(e) => warn!("Rejected {} on {}: {}", op, address, e),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::CrateDetails;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn details(id: &str) -> CrateDetails {
        CrateDetails::new(id, Utc::now(), format!("sha256-{}", id), format!("ipfs://{}", id))
    }

    fn fisher() -> Authority {
        Authority::new("fisher")
    }

    fn engine() -> TransitionEngine<MemoryStore> {
        TransitionEngine::new(MemoryStore::new())
    }

    fn create(engine: &TransitionEngine<MemoryStore>, addr: &str, weight: u64) -> Address {
        let address = Address::new(addr);
        engine
            .create(CreateRequest::new(address.clone(), fisher(), details(addr), weight))
            .unwrap();
        address
    }

    fn split_req(address: &Address, parent: &Address, siblings: &[Address], distribution: &[u64], declared: u64) -> SplitRequest {
        SplitRequest {
            address: address.clone(),
            authority: fisher(),
            details: details(address.as_str()),
            declared_weight: declared,
            parent: parent.clone(),
            siblings: siblings.to_vec(),
            distribution: distribution.to_vec(),
        }
    }

    #[test]
    fn test_create_crate() {
        let engine = engine();
        let a = create(&engine, "a", 1000);
        let record = engine.store().get(&a).unwrap();
        assert_eq!(record.weight(), 1000);
        assert_eq!(record.origin_kind(), OriginKind::Create);
        assert!(record.parent_crates().is_empty());
        assert!(record.child_crates().is_empty());
        assert!(record.parent_weights().is_empty());
        assert!(record.split_distribution().is_empty());
    }

    #[test]
    fn test_create_zero_weight_rejected() {
        let engine = engine();
        let err = engine
            .create(CreateRequest::new(Address::new("z"), fisher(), details("z"), 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidWeight(_)));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_duplicate_address() {
        let engine = engine();
        create(&engine, "dup", 10);
        let err = engine
            .create(CreateRequest::new(Address::new("dup"), fisher(), details("dup"), 10))
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateAddress(_)));
    }

    #[test]
    fn test_mix_conserves_weight_in_order() {
        let engine = engine();
        let a = create(&engine, "a", 1000);
        let b = create(&engine, "b", 1500);
        let c = create(&engine, "c", 250);
        let mixed = engine
            .mix(MixRequest::new(Address::new("m"), fisher(), details("m"), vec![b.clone(), a.clone(), c.clone()]))
            .unwrap();
        assert_eq!(mixed.weight(), 2750);
        assert_eq!(mixed.parent_weights(), &[1500, 1000, 250]);
        assert_eq!(mixed.parent_crates(), &[b, a, c]);
        assert_eq!(mixed.origin_kind(), OriginKind::Mix);
    }

    #[test]
    fn test_mix_needs_two_distinct_existing_parents() {
        let engine = engine();
        let a = create(&engine, "a", 1000);

        let err = engine
            .mix(MixRequest::new(Address::new("m1"), fisher(), details("m1"), vec![a.clone()]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::TooFewParents(1)));

        let err = engine
            .mix(MixRequest::new(Address::new("m2"), fisher(), details("m2"), vec![a.clone(), a.clone()]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateParent(_)));

        let err = engine
            .mix(MixRequest::new(Address::new("m3"), fisher(), details("m3"), vec![a, Address::new("ghost")]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParentNotFound(_)));
        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn test_split_conserves_weight() {
        let engine = engine();
        let c = create(&engine, "c", 2500);
        let d = Address::new("d");
        let e = Address::new("e");
        let siblings = vec![d.clone(), e.clone()];

        let rd = engine.split(split_req(&d, &c, &siblings, &[1000, 1500], 1000)).unwrap();
        let re = engine.split(split_req(&e, &c, &siblings, &[1000, 1500], 1500)).unwrap();

        assert_eq!(rd.weight(), 1000);
        assert_eq!(re.weight(), 1500);
        assert_eq!(rd.parent_crates(), &[c.clone()]);
        assert_eq!(rd.child_crates(), siblings.as_slice());
        assert_eq!(rd.split_distribution(), &[1000, 1500]);
        assert_eq!(rd.origin_kind(), OriginKind::Split);
        assert_eq!(rd.weight() + re.weight(), 2500);
    }

    #[test]
    fn test_split_rejections() {
        let engine = engine();
        let c = create(&engine, "c", 2500);
        let d = Address::new("d");
        let e = Address::new("e");
        let siblings = vec![d.clone(), e.clone()];

        // distribution does not add up to the parent
        let err = engine.split(split_req(&d, &c, &siblings, &[1000, 1400], 1000)).unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));

        // declared weight differs from this sibling's share
        let err = engine.split(split_req(&d, &c, &siblings, &[1000, 1500], 1500)).unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));

        // not a registered sibling
        let x = Address::new("x");
        let err = engine.split(split_req(&x, &c, &siblings, &[1000, 1500], 1000)).unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));

        // lengths differ
        let err = engine.split(split_req(&d, &c, &siblings, &[2500], 2500)).unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));

        // listed twice
        let err = engine
            .split(split_req(&d, &c, &[d.clone(), d.clone()], &[1000, 1500], 1000))
            .unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));

        // zero share
        let err = engine.split(split_req(&d, &c, &siblings, &[0, 2500], 0)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidWeight(_)));

        let err = engine
            .split(split_req(&d, &Address::new("ghost"), &siblings, &[1000, 1500], 1000))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParentNotFound(_)));

        assert_eq!(engine.store().len(), 1);
    }

    #[test]
    fn test_split_sibling_must_agree_with_committed_sibling() {
        let engine = engine();
        let c = create(&engine, "c", 2500);
        let d = Address::new("d");
        let e = Address::new("e");
        let f = Address::new("f");
        engine
            .split(split_req(&d, &c, &[d.clone(), e.clone()], &[1000, 1500], 1000))
            .unwrap();
        // e tries to claim a different split of the same parent
        let err = engine
            .split(split_req(&e, &c, &[d.clone(), e.clone(), f], &[1000, 1000, 500], 1000))
            .unwrap_err();
        assert!(matches!(err, LedgerError::SplitWeightMismatch(_)));
    }

    #[test]
    fn test_transfer_equal_weight() {
        let engine = engine();
        let original = create(&engine, "original", 500);
        let transferred = engine
            .transfer(TransferRequest::new(
                Address::new("transferred"),
                Authority::new("buyer"),
                details("transferred"),
                500,
                original.clone(),
            ))
            .unwrap();
        assert_eq!(transferred.weight(), 500);
        assert_eq!(transferred.parent_crates(), &[original]);
        assert_eq!(transferred.authority().as_str(), "buyer");
        assert_eq!(transferred.origin_kind(), OriginKind::Transfer);
    }

    #[test]
    fn test_transfer_weight_mismatch() {
        let engine = engine();
        let original = create(&engine, "original2", 500);
        let err = engine
            .transfer(TransferRequest::new(
                Address::new("transferred2"),
                fisher(),
                details("transferred2"),
                450,
                original,
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::WeightMismatchOnTransfer { expected: 500, declared: 450, .. }
        ));
        assert!(!engine.store().contains(&Address::new("transferred2")));
    }

    #[test]
    fn test_link_completion_requires_authority() {
        let engine = engine();
        let a = create(&engine, "a", 1000);
        let b = create(&engine, "b", 1500);
        let m = engine
            .mix(MixRequest::new(Address::new("m"), Authority::new("processor"), details("m"), vec![a.clone(), b.clone()]))
            .unwrap();

        let err = engine
            .update_parent_children(&a, &[m.address().clone()], &Authority::new("processor"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));

        let updated = engine
            .update_parent_children(&a, &[m.address().clone()], &fisher())
            .unwrap();
        assert_eq!(updated.child_crates(), &[m.address().clone()]);
        // idempotent
        let again = engine
            .update_parent_children(&a, &[m.address().clone()], &fisher())
            .unwrap();
        assert_eq!(again.child_crates().len(), 1);
    }

    #[test]
    fn test_link_parent_rejects_cycles() {
        let engine = engine();
        let a = create(&engine, "a", 500);
        let t = engine
            .transfer(TransferRequest::new(Address::new("t"), fisher(), details("t"), 500, a.clone()))
            .unwrap();

        // a is an ancestor of t, so t cannot become a parent of a
        let err = engine
            .update_child_parent(&a, t.address(), &fisher())
            .unwrap_err();
        assert!(matches!(err, LedgerError::CycleDetected(_)));

        let err = engine.update_child_parent(&a, &a, &fisher()).unwrap_err();
        assert!(matches!(err, LedgerError::CycleDetected(_)));

        let err = engine
            .update_child_parent(&a, &Address::new("ghost"), &fisher())
            .unwrap_err();
        assert!(matches!(err, LedgerError::ParentNotFound(_)));
    }

    #[test]
    fn test_link_parent_is_massless_and_keeps_weights() {
        let engine = engine();
        let a = create(&engine, "a", 500);
        let b = create(&engine, "b", 700);
        let before = engine.store().get(&b).unwrap();
        let after = engine.update_child_parent(&b, &a, &fisher()).unwrap();
        assert_eq!(after.parent_crates(), &[a]);
        assert_eq!(after.weight(), before.weight());
        assert_eq!(after.parent_weights(), before.parent_weights());
        assert_eq!(after.split_distribution(), before.split_distribution());
        assert_eq!(after.seal(), before.seal());
    }

    #[test]
    fn test_submit_dispatches_json_requests() {
        let engine = engine();
        let json = r#"{
            "operation": "create",
            "address": "lot-1",
            "authority": "fisher",
            "details": {
                "crate_id": "CRATE_001",
                "timestamp": "2024-05-01T06:30:00Z",
                "content_hash": "abc",
                "artifact_ref": "ipfs://bafy"
            },
            "weight": 1200
        }"#;
        let request: OperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.name(), "create");
        let record = engine.submit(request).unwrap();
        assert_eq!(record.weight(), 1200);
        assert_eq!(record.crate_id(), "CRATE_001");

        let link = OperationRequest::LinkChildren {
            parent: Address::new("lot-1"),
            children: vec![Address::new("lot-2")],
            caller: fisher(),
        };
        let record = engine.submit(link).unwrap();
        assert_eq!(record.child_crates(), &[Address::new("lot-2")]);
    }

    #[test]
    fn test_concurrent_creates_on_same_address_commit_once() {
        let engine = engine();
        let successes = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..8 {
                let engine = &engine;
                let successes = &successes;
                s.spawn(move || {
                    let req = CreateRequest::new(Address::new("race"), fisher(), details(&format!("r{}", i)), 100);
                    if engine.create(req).is_ok() {
                        successes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(successes.into_inner(), 1);
        assert_eq!(engine.store().len(), 1);
    }

    /// Holds the write for `gate` at a barrier, so another thread can run a
    /// conflicting operation while that write is between check and commit.
    struct GatedStore {
        inner: MemoryStore,
        gate: Address,
        gate_appends: bool,
        barrier: std::sync::Barrier,
    }

    impl GatedStore {
        fn on_create(gate: &Address) -> Self {
            Self {
                inner: MemoryStore::new(),
                gate: gate.clone(),
                gate_appends: false,
                barrier: std::sync::Barrier::new(2),
            }
        }

        fn on_append(gate: &Address) -> Self {
            Self {
                gate_appends: true,
                ..Self::on_create(gate)
            }
        }

        fn hold(&self, address: &Address, appending: bool) {
            if appending == self.gate_appends && address == &self.gate {
                self.barrier.wait();
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
        }
    }

    impl RecordStore for GatedStore {
        fn create(&self, record: CrateRecord) -> Result<CrateRecord> {
            self.hold(record.address(), false);
            self.inner.create(record)
        }

        fn get(&self, address: &Address) -> Result<CrateRecord> {
            self.inner.get(address)
        }

        fn contains(&self, address: &Address) -> bool {
            self.inner.contains(address)
        }

        fn append_parent_link(&self, address: &Address, parent: &Address, caller: &Authority) -> Result<CrateRecord> {
            self.hold(address, true);
            self.inner.append_parent_link(address, parent, caller)
        }

        fn append_child_links(&self, address: &Address, children: &[Address], caller: &Authority) -> Result<CrateRecord> {
            self.inner.append_child_links(address, children, caller)
        }

        fn addresses(&self) -> Vec<Address> {
            self.inner.addresses()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    fn seed(engine: &TransitionEngine<GatedStore>, addr: &str, weight: u64) -> Address {
        let address = Address::new(addr);
        engine
            .create(CreateRequest::new(address.clone(), fisher(), details(addr), weight))
            .unwrap();
        address
    }

    #[test]
    fn test_concurrent_conflicting_splits_cannot_overdraw_parent() {
        let d = Address::new("d");
        let e = Address::new("e");
        let engine = TransitionEngine::new(GatedStore::on_create(&d));
        let c = seed(&engine, "c", 2500);
        let siblings = [d.clone(), e.clone()];

        let (first, second) = std::thread::scope(|s| {
            let first = s.spawn(|| engine.split(split_req(&d, &c, &siblings, &[1000, 1500], 1000)));
            let second = s.spawn(|| {
                engine.store().barrier.wait();
                engine.split(split_req(&e, &c, &siblings, &[500, 2000], 2000))
            });
            (first.join().unwrap(), second.join().unwrap())
        });

        assert_eq!(first.unwrap().weight(), 1000);
        assert!(matches!(second, Err(LedgerError::SplitWeightMismatch(_))));
        let landed: u64 = siblings
            .iter()
            .filter_map(|s| engine.store().get(s).ok())
            .map(|r| r.weight())
            .sum();
        assert!(landed <= 2500);
        assert!(engine.split_locks.lock().is_empty());
    }

    #[test]
    fn test_concurrent_reverse_links_cannot_form_cycle() {
        let a = Address::new("a");
        let engine = TransitionEngine::new(GatedStore::on_append(&a));
        seed(&engine, "a", 100);
        let b = seed(&engine, "b", 200);

        let (alice, bob) = std::thread::scope(|s| {
            let alice = s.spawn(|| engine.update_child_parent(&a, &b, &fisher()));
            let bob = s.spawn(|| {
                engine.store().barrier.wait();
                engine.update_child_parent(&b, &a, &fisher())
            });
            (alice.join().unwrap(), bob.join().unwrap())
        });

        assert!(alice.is_ok());
        assert!(matches!(bob, Err(LedgerError::CycleDetected(_))));
        assert!(trace_composition(engine.store(), &a, 8).is_ok());
        assert!(trace_composition(engine.store(), &b, 8).is_ok());
    }

    #[test]
    fn test_mix_weight_overflow_rejected() {
        let engine = engine();
        let a = create(&engine, "a", u64::MAX);
        let b = create(&engine, "b", 1);
        let err = engine
            .mix(MixRequest::new(Address::new("m"), fisher(), details("m"), vec![a, b]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidWeight(_)));
        assert!(!engine.store().contains(&Address::new("m")));
    }

    #[test]
    fn test_link_parent_over_deep_lineage() {
        let engine = TransitionEngine::with_max_depth(MemoryStore::new(), 1_000_000);
        let mut tip = create(&engine, "t0", 500);
        for i in 1..=5_000 {
            let next = Address::new(format!("t{}", i));
            engine
                .transfer(TransferRequest::new(next.clone(), fisher(), details("t"), 500, tip))
                .unwrap();
            tip = next;
        }
        let origin = Address::new("t0");
        let err = engine.update_child_parent(&origin, &tip, &fisher()).unwrap_err();
        assert!(matches!(err, LedgerError::CycleDetected(_)));
    }
}

//! Record seal — tamper evidence for immutable fields
//!
//! A seal is a SHA-256 over every field fixed at creation, chained onto the
//! seals of the creation-time parents. Altering a record, or any of its
//! ancestors, changes the seal that its descendants were built on.

use super::CrateRecord;
use sha2::{Digest, Sha256};

const SEAL_DOMAIN: &[u8] = b"nautilink-crate-seal-v1";

pub(crate) fn compute(record: &CrateRecord, parent_seals: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(SEAL_DOMAIN);
    update_str(&mut hasher, record.address().as_str());
    update_str(&mut hasher, record.crate_id());
    hasher.update(record.weight().to_le_bytes());
    hasher.update(record.created_at().timestamp_micros().to_le_bytes());
    update_str(&mut hasher, record.content_hash());
    update_str(&mut hasher, record.artifact_ref());
    update_str(&mut hasher, record.authority().as_str());
    update_str(&mut hasher, record.origin_kind().as_str());

    let provenance = record.provenance();
    for field in [
        &provenance.crate_did,
        &provenance.owner_did,
        &provenance.device_did,
        &provenance.location,
    ] {
        update_opt(&mut hasher, field.as_deref());
    }

    update_len(&mut hasher, record.creation_parents().len());
    for (parent, parent_seal) in record.creation_parents().iter().zip(parent_seals) {
        update_str(&mut hasher, parent.as_str());
        update_str(&mut hasher, parent_seal);
    }
    update_len(&mut hasher, record.parent_weights().len());
    for w in record.parent_weights() {
        hasher.update(w.to_le_bytes());
    }
    update_len(&mut hasher, record.creation_siblings().len());
    for sibling in record.creation_siblings() {
        update_str(&mut hasher, sibling.as_str());
    }
    update_len(&mut hasher, record.split_distribution().len());
    for w in record.split_distribution() {
        hasher.update(w.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

fn update_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn update_str(hasher: &mut Sha256, value: &str) {
    update_len(hasher, value.len());
    hasher.update(value.as_bytes());
}

fn update_opt(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            update_str(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}

//! Lineage verification — re-derive every seal up to the origins

use super::trace_composition;
use crate::error::{LedgerError, Result};
use crate::record::Address;
use crate::storage::RecordStore;
use log::debug;

/// Check the seal of `address` and of every ancestor. Returns how many
/// records were verified, or `IntegrityViolation` naming the first record
/// whose contents no longer match its seal.
pub fn verify_lineage<S: RecordStore + ?Sized>(
    store: &S,
    address: &Address,
    max_depth: usize,
) -> Result<usize> {
    let trace = trace_composition(store, address, max_depth)?;
    let mut verified = 0;
    for record in trace.records() {
        let parent_seals = record
            .creation_parents()
            .iter()
            .map(|p| trace.record(p).map(|r| r.seal()))
            .collect::<Option<Vec<&str>>>()
            .ok_or_else(|| LedgerError::IntegrityViolation(record.address().clone()))?;
        if !record.verify_seal(&parent_seals) {
            return Err(LedgerError::IntegrityViolation(record.address().clone()));
        }
        verified += 1;
    }
    debug!("Verified {} seals in the lineage of {}", verified, address);
    Ok(verified)
}

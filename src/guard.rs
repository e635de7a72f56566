//! Authority Guard — single-authority ownership of records
//!
//! Stateless: a mutation is allowed only when the caller identity equals the
//! authority recorded on the target record. Every append-link path in the
//! record stores goes through here before touching a record.

use crate::error::{LedgerError, Result};
use crate::record::{Authority, CrateRecord};

pub struct AuthorityGuard;

impl AuthorityGuard {
    /// Allow/deny without building an error
    pub fn allows(record: &CrateRecord, caller: &Authority) -> bool {
        record.authority() == caller
    }

    pub fn authorize(record: &CrateRecord, caller: &Authority) -> Result<()> {
        if Self::allows(record, caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                address: record.address().clone(),
                caller: caller.clone(),
            })
        }
    }
}

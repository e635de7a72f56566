//! Crate records — the sole entity of the ledger
//!
//! A record encodes: a physical batch (weight, artifact) + who may mutate it
//! (authority) + where its mass came from (parents, weights, distribution).

mod address;
mod crate_record;
mod seal;

pub use address::{Address, Authority};
pub(crate) use crate_record::RecordDraft;
pub use crate_record::{CrateDetails, CrateRecord, OriginKind, Provenance};

//! Durable ledger file
//!
//! JSON-backed store. Every commit writes the complete next state to disk
//! first and only then becomes visible in memory, so a failed write leaves
//! nothing half-applied.
//!
//! This backend is a single JSON file, so every commit takes one store-wide
//! lock and rewrites the whole file. Disjoint records do not commit in
//! parallel here as they do in `MemoryStore`; reads still go straight to
//! memory without taking that lock.

use super::{MemoryStore, RecordStore};
use crate::error::{LedgerError, Result};
use crate::guard::AuthorityGuard;
use crate::record::{Address, Authority, CrateRecord, OriginKind};
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub owner: String,
    pub created_at: String,
    pub total_created: u64,
    pub total_mixed: u64,
    pub total_split: u64,
    pub total_transferred: u64,
    pub total_link_appends: u64,
}

impl StoreMetadata {
    fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            total_created: 0,
            total_mixed: 0,
            total_split: 0,
            total_transferred: 0,
            total_link_appends: 0,
        }
    }

    fn count(&mut self, kind: OriginKind) {
        match kind {
            OriginKind::Create => self.total_created += 1,
            OriginKind::Mix => self.total_mixed += 1,
            OriginKind::Split => self.total_split += 1,
            OriginKind::Transfer => self.total_transferred += 1,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    metadata: StoreMetadata,
    records: Vec<CrateRecord>,
}

pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    metadata: Mutex<StoreMetadata>,
}

impl FileStore {
    /// Open the ledger file at `path`, or start an empty ledger if it does
    /// not exist yet. Every record's seal is checked on load.
    pub fn open(path: impl AsRef<Path>, owner: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            info!("No ledger at {}, starting fresh", path.display());
            return Ok(Self {
                path,
                inner: MemoryStore::new(),
                metadata: Mutex::new(StoreMetadata::new(owner)),
            });
        }
        let data = std::fs::read_to_string(&path)?;
        let store = Self::from_json(path, &data)?;
        info!("Loaded {} records from {}", store.len(), store.path.display());
        Ok(store)
    }

    /// Replace the ledger file with `data` after verifying it
    pub fn restore(path: impl AsRef<Path>, data: &str) -> Result<Self> {
        let store = Self::from_json(path.as_ref().to_path_buf(), data)?;
        let records = store.inner.snapshot();
        store.persist(&records, &store.metadata())?;
        info!("Restored {} records into {}", records.len(), store.path.display());
        Ok(store)
    }

    fn from_json(path: PathBuf, data: &str) -> Result<Self> {
        let file: LedgerFile = serde_json::from_str(data)?;
        verify_records(&file.records)?;
        Ok(Self {
            path,
            inner: MemoryStore::from_records(file.records)?,
            metadata: Mutex::new(file.metadata),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> StoreMetadata {
        self.metadata.lock().clone()
    }

    pub fn records(&self) -> Vec<CrateRecord> {
        self.inner.snapshot()
    }

    /// Current ledger contents as pretty JSON, the same format as the file
    pub fn to_json(&self) -> Result<String> {
        let file = LedgerFile {
            metadata: self.metadata(),
            records: self.inner.snapshot(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn summary(&self) -> String {
        let meta = self.metadata();
        let records = self.inner.snapshot();
        let roots = records.iter().filter(|r| r.is_root()).count();
        let mass: u64 = records.iter().filter(|r| r.is_root()).map(|r| r.weight()).sum();
        format!(
            "Ledger '{}' | {} records | {} origin crates ({}g landed) | created={} mixed={} split={} transferred={}",
            meta.owner,
            records.len(),
            roots,
            mass,
            meta.total_created,
            meta.total_mixed,
            meta.total_split,
            meta.total_transferred
        )
    }

    fn persist(&self, records: &[CrateRecord], metadata: &StoreMetadata) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = LedgerFile {
            metadata: metadata.clone(),
            records: records.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Snapshot with `next` in place of the committed version of the same record
    fn snapshot_replacing(&self, next: &CrateRecord) -> Vec<CrateRecord> {
        self.inner
            .snapshot()
            .into_iter()
            .map(|r| if r.address() == next.address() { next.clone() } else { r })
            .collect()
    }
}

impl RecordStore for FileStore {
    fn create(&self, record: CrateRecord) -> Result<CrateRecord> {
        let mut meta = self.metadata.lock();
        if self.inner.contains(record.address()) {
            return Err(LedgerError::DuplicateAddress(record.address().clone()));
        }
        let mut next_meta = meta.clone();
        next_meta.count(record.origin_kind());
        let mut records = self.inner.snapshot();
        records.push(record.clone());
        self.persist(&records, &next_meta)?;
        *meta = next_meta;
        self.inner.create(record)
    }

    fn get(&self, address: &Address) -> Result<CrateRecord> {
        self.inner.get(address)
    }

    fn contains(&self, address: &Address) -> bool {
        self.inner.contains(address)
    }

    fn append_parent_link(
        &self,
        address: &Address,
        parent: &Address,
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let mut meta = self.metadata.lock();
        let current = self.inner.get(address)?;
        AuthorityGuard::authorize(&current, caller)?;
        let mut next = current.clone();
        if !next.push_parent(parent) {
            return Ok(current);
        }
        let mut next_meta = meta.clone();
        next_meta.total_link_appends += 1;
        self.persist(&self.snapshot_replacing(&next), &next_meta)?;
        *meta = next_meta;
        self.inner.append_parent_link(address, parent, caller)
    }

    fn append_child_links(
        &self,
        address: &Address,
        children: &[Address],
        caller: &Authority,
    ) -> Result<CrateRecord> {
        let mut meta = self.metadata.lock();
        let current = self.inner.get(address)?;
        AuthorityGuard::authorize(&current, caller)?;
        let mut next = current.clone();
        let added = next.push_children(children);
        if added == 0 {
            return Ok(current);
        }
        let mut next_meta = meta.clone();
        next_meta.total_link_appends += added as u64;
        self.persist(&self.snapshot_replacing(&next), &next_meta)?;
        *meta = next_meta;
        self.inner.append_child_links(address, children, caller)
    }

    fn addresses(&self) -> Vec<Address> {
        self.inner.addresses()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Records of a ledger file, after every seal has been checked
pub(crate) fn parse_records(data: &str) -> Result<Vec<CrateRecord>> {
    let file: LedgerFile = serde_json::from_str(data)?;
    verify_records(&file.records)?;
    Ok(file.records)
}

/// Check every seal against its creation-time parents' seals
fn verify_records(records: &[CrateRecord]) -> Result<()> {
    let seals: HashMap<&Address, &str> = records.iter().map(|r| (r.address(), r.seal())).collect();
    for record in records {
        let parent_seals = record
            .creation_parents()
            .iter()
            .map(|p| seals.get(p).copied())
            .collect::<Option<Vec<&str>>>()
            .ok_or_else(|| LedgerError::IntegrityViolation(record.address().clone()))?;
        if !record.verify_seal(&parent_seals) {
            return Err(LedgerError::IntegrityViolation(record.address().clone()));
        }
    }
    Ok(())
}

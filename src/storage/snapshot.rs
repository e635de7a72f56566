//! Ledger snapshots
//!
//! A snapshot is the ledger file of a live `FileStore`, catalogued with what
//! it held: record count, landed mass and a digest over every record seal.
//! Restoring re-reads the file, rebuilds a store from it (which re-checks
//! every seal against its parents) and then compares the result with the
//! catalogue entry before handing the store back.

use super::file::parse_records;
use super::{FileStore, RecordStore};
use crate::error::{LedgerError, Result};
use crate::record::CrateRecord;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub version: u64,
    pub taken_at: DateTime<Utc>,
    pub file: String,
    /// SHA-256 of the snapshot file bytes
    pub file_sha256: String,
    pub records: usize,
    /// Grams across all origin crates
    pub landed_grams: u64,
    /// SHA-256 over (address, seal) of every record, in address order
    pub seal_digest: String,
    pub note: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Catalog {
    next_version: u64,
    entries: Vec<SnapshotEntry>,
}

pub struct SnapshotVault {
    dir: PathBuf,
    catalog: Catalog,
}

impl SnapshotVault {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let path = dir.join(CATALOG_FILE);
        let catalog = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            Catalog {
                next_version: 1,
                entries: Vec::new(),
            }
        };
        Ok(Self { dir, catalog })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.catalog.entries
    }

    pub fn latest(&self) -> Option<&SnapshotEntry> {
        self.catalog.entries.last()
    }

    /// Copy the current contents of `store` into the vault
    pub fn take(&mut self, store: &FileStore, note: &str) -> Result<SnapshotEntry> {
        let data = store.to_json()?;
        let records = parse_records(&data)?;

        let version = self.catalog.next_version;
        let taken_at = Utc::now();
        let file = format!("ledger_v{:04}_{}.json", version, taken_at.format("%Y%m%d_%H%M%S"));
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(&file), &data)?;

        let entry = SnapshotEntry {
            version,
            taken_at,
            file,
            file_sha256: hex::encode(Sha256::digest(data.as_bytes())),
            records: records.len(),
            landed_grams: landed_grams(&records),
            seal_digest: seal_digest(&records),
            note: note.to_string(),
        };
        self.catalog.entries.push(entry.clone());
        self.catalog.next_version += 1;
        self.save()?;
        info!(
            "Snapshot v{} of {}: {} records, {}g landed",
            version,
            store.path().display(),
            entry.records,
            entry.landed_grams
        );
        Ok(entry)
    }

    /// Snapshot file contents, if the file still matches its checksum
    pub fn read(&self, version: u64) -> Result<String> {
        let entry = self.entry(version)?;
        let data = std::fs::read_to_string(self.dir.join(&entry.file))?;
        if hex::encode(Sha256::digest(data.as_bytes())) != entry.file_sha256 {
            return Err(LedgerError::Snapshot(format!("v{} file checksum mismatch", version)));
        }
        Ok(data)
    }

    /// Check file checksum, every record seal and the catalogued contents
    pub fn check(&self, version: u64) -> Result<()> {
        let records = parse_records(&self.read(version)?)?;
        self.matches_entry(version, &records)
    }

    /// `check` for every catalogued snapshot
    pub fn check_all(&self) -> Vec<(u64, Result<()>)> {
        self.catalog
            .entries
            .iter()
            .map(|e| (e.version, self.check(e.version)))
            .collect()
    }

    /// Rebuild the ledger at `target` from snapshot `version` (latest if
    /// `None`). Nothing is written unless every check passes.
    pub fn restore(&self, version: Option<u64>, target: impl AsRef<Path>) -> Result<FileStore> {
        let version = match version {
            Some(v) => v,
            None => {
                self.latest()
                    .ok_or_else(|| LedgerError::Snapshot("vault is empty".into()))?
                    .version
            }
        };
        let data = self.read(version)?;
        self.matches_entry(version, &parse_records(&data)?)?;
        let store = FileStore::restore(target, &data)?;
        info!(
            "Restored v{} into {} ({} records)",
            version,
            store.path().display(),
            store.len()
        );
        Ok(store)
    }

    /// Keep the newest `keep` snapshots and delete the rest
    pub fn prune(&mut self, keep: usize) -> Result<usize> {
        let excess = self.catalog.entries.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(0);
        }
        for entry in &self.catalog.entries[..excess] {
            match std::fs::remove_file(self.dir.join(&entry.file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Snapshot file {} already gone", entry.file);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.catalog.entries.drain(..excess);
        self.save()?;
        info!("Pruned {} snapshots, {} kept", excess, self.catalog.entries.len());
        Ok(excess)
    }

    fn entry(&self, version: u64) -> Result<&SnapshotEntry> {
        self.catalog
            .entries
            .iter()
            .find(|e| e.version == version)
            .ok_or_else(|| LedgerError::Snapshot(format!("no snapshot v{}", version)))
    }

    fn matches_entry(&self, version: u64, records: &[CrateRecord]) -> Result<()> {
        let entry = self.entry(version)?;
        if records.len() != entry.records
            || landed_grams(records) != entry.landed_grams
            || seal_digest(records) != entry.seal_digest
        {
            return Err(LedgerError::Snapshot(format!(
                "v{} no longer matches its catalogue entry",
                version
            )));
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", CATALOG_FILE));
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.catalog)?)?;
        std::fs::rename(&tmp, self.dir.join(CATALOG_FILE))?;
        Ok(())
    }
}

fn landed_grams(records: &[CrateRecord]) -> u64 {
    records.iter().filter(|r| r.is_root()).map(|r| r.weight()).sum()
}

fn seal_digest(records: &[CrateRecord]) -> String {
    let mut sorted: Vec<&CrateRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.address().cmp(b.address()));
    let mut hasher = Sha256::new();
    for record in sorted {
        for part in [record.address().as_str(), record.seal()] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

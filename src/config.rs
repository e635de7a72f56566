//! Ledger configuration
//!
//! Defaults, optionally overridden by a JSON file and then by
//! `NAUTILINK_*` environment variables.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default bound on lineage traversal depth
pub const DEFAULT_MAX_TRACE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How many generations a lineage walk may go back before failing
    pub max_trace_depth: usize,
    /// Ledger file used by `FileStore`
    pub store_path: PathBuf,
    /// Directory for versioned snapshots
    pub backup_dir: PathBuf,
    /// Caller identity when no identity provider is wired in
    pub authority: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_trace_depth: DEFAULT_MAX_TRACE_DEPTH,
            store_path: PathBuf::from("nautilink-ledger.json"),
            backup_dir: PathBuf::from("nautilink-backups"),
            authority: "local".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: LedgerConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults (or `NAUTILINK_CONFIG` if set) overlaid with environment variables
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("NAUTILINK_CONFIG") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        base.overlay(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (environment in production)
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(depth) = lookup("NAUTILINK_MAX_TRACE_DEPTH") {
            self.max_trace_depth = depth.trim().parse().map_err(|_| {
                LedgerError::Config(format!("NAUTILINK_MAX_TRACE_DEPTH is not a number: {}", depth))
            })?;
        }
        if let Some(path) = lookup("NAUTILINK_STORE") {
            self.store_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("NAUTILINK_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(authority) = lookup("NAUTILINK_AUTHORITY") {
            self.authority = authority;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_trace_depth == 0 {
            return Err(LedgerError::Config("max_trace_depth must be at least 1".into()));
        }
        if self.authority.trim().is_empty() {
            return Err(LedgerError::Config("authority must not be empty".into()));
        }
        Ok(())
    }
}

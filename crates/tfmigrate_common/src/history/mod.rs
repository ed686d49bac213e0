//! The record of which migration files have been applied.
//!
//! Persisted as a single JSON blob through the storage façade:
//!
//! ```json
//! { "version": 1,
//!   "records": { "<filename>": { "type": "state", "name": "…",
//!                 "applied_at": "RFC3339", "md5_hash": "<hex>" } } }
//! ```
//!
//! Ordering is derived at read time from the lexicographic sort of filenames.
//! `md5_hash` is optional: records written by earlier versions have none and
//! skip content-integrity checks.

mod controller;

pub use controller::HistoryController;

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// The only history format version this build reads and writes.
pub const HISTORY_VERSION: u64 = 1;

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "type")]
    pub migration_type: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5_hash: Option<String>,
}

impl HistoryRecord {
    /// The content hash, treating an empty string the same as absent.
    pub fn content_hash(&self) -> Option<&str> {
        self.md5_hash.as_deref().filter(|h| !h.is_empty())
    }
}

/// The full applied-migration record, keyed by migration filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    version: u64,
    #[serde(default)]
    records: BTreeMap<String, HistoryRecord>,
}

impl Default for History {
    fn default() -> Self {
        Self { version: HISTORY_VERSION, records: BTreeMap::new() }
    }
}

impl History {
    /// Parse a history blob. Empty input is a fresh history; unknown JSON
    /// fields are tolerated; an unsupported version is rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(History::default());
        }
        let history: History =
            serde_json::from_slice(bytes).context("failed to parse history JSON")?;
        if history.version != HISTORY_VERSION {
            bail!("unsupported history version: {}", history.version);
        }
        Ok(history)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).context("failed to serialize history JSON")
    }

    pub fn records(&self) -> &BTreeMap<String, HistoryRecord> {
        &self.records
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.records.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_record(&mut self, filename: &str, record: HistoryRecord) {
        self.records.insert(filename.to_string(), record);
    }

    /// Fill in `md5_hash` for records that have none, using the hash
    /// supplied by `hash_for` (typically the current file content). Records
    /// whose file no longer exists are skipped; a non-empty hash is never
    /// overwritten.
    pub fn update_missing_md5_hashes<F>(&mut self, mut hash_for: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for (filename, record) in self.records.iter_mut() {
            if record.content_hash().is_some() {
                continue;
            }
            if let Some(hash) = hash_for(filename) {
                record.md5_hash = Some(hash);
            }
        }
    }
}

/// Hex MD5 of migration file contents, as stored in `md5_hash`.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

//! Ordered detection and integrity checking of unapplied migrations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{md5_hex, History, HistoryRecord};
use crate::config::parse_migration_file;
use crate::storage::Storage;

/// Holds the migration directory, the storage backend, and the loaded
/// history. The history is authoritative for "applied": a filename present
/// in history but missing on disk is tolerated.
pub struct HistoryController {
    migration_dir: PathBuf,
    storage: Box<dyn Storage>,
    history: History,
}

impl HistoryController {
    /// Load the history blob from storage.
    pub async fn load(migration_dir: impl Into<PathBuf>, storage: Box<dyn Storage>) -> Result<Self> {
        let bytes = storage.read().await.context("failed to read history from storage")?;
        let history = History::parse(&bytes)?;
        Ok(Self { migration_dir: migration_dir.into(), storage, history })
    }

    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// All `*.hcl` files in the migration directory, lexicographically sorted.
    pub fn migration_files(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.migration_dir).with_context(|| {
            format!("failed to read migration directory: {}", self.migration_dir.display())
        })?;

        let mut filenames = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to read migration directory: {}", self.migration_dir.display())
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("hcl") && path.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    filenames.push(name.to_string());
                }
            }
        }
        filenames.sort();
        Ok(filenames)
    }

    /// Migration files not yet recorded in history, in application order.
    pub fn unapplied_migrations(&self) -> Result<Vec<String>> {
        Ok(self
            .migration_files()?
            .into_iter()
            .filter(|f| !self.history.contains(f))
            .collect())
    }

    pub fn already_applied(&self, filename: &str) -> bool {
        self.history.contains(filename)
    }

    /// Record a successful apply. `applied_at` defaults to now.
    pub fn add_record(
        &mut self,
        filename: &str,
        migration_type: &str,
        name: &str,
        applied_at: Option<DateTime<Utc>>,
        md5_hash: Option<String>,
    ) {
        self.history.add_record(
            filename,
            HistoryRecord {
                migration_type: migration_type.to_string(),
                name: name.to_string(),
                applied_at: applied_at.unwrap_or_else(Utc::now),
                md5_hash,
            },
        );
    }

    /// Persist the history through the storage backend.
    pub async fn save(&self) -> Result<()> {
        let bytes = self.history.serialize()?;
        self.storage.write(&bytes).await.context("failed to write history to storage")
    }

    /// Integrity checks run before planning or applying a whole directory:
    /// no duplicate migration names locally, none in the history, no
    /// duplicate content hashes in the history, and every local file whose
    /// record carries a hash still hashes to it.
    pub fn validate_migrations(&self) -> Result<()> {
        let local_names = self.load_local_migration_names()?;

        let duplicates = find_duplicates(local_names.values().map(String::as_str));
        if !duplicates.is_empty() {
            bail!("duplicate migration names found locally: {}", duplicates.join(", "));
        }

        let duplicates =
            find_duplicates(self.history.records().values().map(|r| r.name.as_str()));
        if !duplicates.is_empty() {
            bail!("duplicate migration names found in remote state: {}", duplicates.join(", "));
        }

        let duplicates =
            find_duplicates(self.history.records().values().filter_map(|r| r.content_hash()));
        if !duplicates.is_empty() {
            bail!("duplicate migration content found in history: {}", duplicates.join(", "));
        }

        self.verify_file_integrity()
    }

    /// Fill missing `md5_hash` fields from files still present on disk.
    pub fn update_missing_md5_hashes(&mut self) {
        let dir = self.migration_dir.clone();
        self.history.update_missing_md5_hashes(|filename| {
            match std::fs::read(dir.join(filename)) {
                Ok(bytes) => Some(md5_hex(&bytes)),
                Err(_) => {
                    debug!("skipping md5 backfill for missing migration file: {filename}");
                    None
                }
            }
        });
    }

    /// Filename → declared migration name for every local migration file.
    fn load_local_migration_names(&self) -> Result<BTreeMap<String, String>> {
        let mut names = BTreeMap::new();
        for filename in self.migration_files()? {
            let path = self.migration_dir.join(&filename);
            let source = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read migration file: {}", path.display()))?;
            let config = parse_migration_file(&filename, &source)?;
            names.insert(filename, config.name);
        }
        Ok(names)
    }

    /// Compare each local file's MD5 with the hash recorded at apply time.
    /// Records without a hash (older history formats) are skipped.
    fn verify_file_integrity(&self) -> Result<()> {
        let mut mismatches = Vec::new();
        for (filename, record) in self.history.records() {
            let Some(expected) = record.content_hash() else {
                continue;
            };
            let path = self.migration_dir.join(filename);
            let Ok(bytes) = std::fs::read(&path) else {
                // History is authoritative; a deleted applied file is fine.
                continue;
            };
            let actual = md5_hex(&bytes);
            if actual != expected {
                mismatches.push(format!("{filename} (recorded {expected}, current {actual})"));
            }
        }
        if !mismatches.is_empty() {
            bail!("migration file integrity check failed: {}", mismatches.join(", "));
        }
        Ok(())
    }
}

/// Every value that occurs more than once, each reported once, in first-seen
/// order.
fn find_duplicates<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut order = Vec::new();
    for value in values {
        let count = counts.entry(value).or_insert(0);
        *count += 1;
        if *count == 2 {
            order.push(value.to_string());
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_duplicates_reports_every_offender_once() {
        let values = ["a", "b", "a", "c", "b", "a"];
        assert_eq!(find_duplicates(values.into_iter()), vec!["a".to_string(), "b".to_string()]);
        assert!(find_duplicates(["x", "y"].into_iter()).is_empty());
    }
}

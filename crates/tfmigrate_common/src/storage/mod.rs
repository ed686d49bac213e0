//! Storage façade for the migration history blob.
//!
//! A backend reads and writes a single opaque byte blob; the engine assumes
//! the medium provides at-most-one-writer replace semantics (filesystem
//! rename, object overwrite). Cloud backends live behind the same trait in
//! their own integrations; this crate ships the file backend and an
//! in-memory backend for tests.

pub mod local;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Opaque read/write of the history blob.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the whole blob. A backend with nothing stored yet returns empty.
    async fn read(&self) -> Result<Vec<u8>>;

    /// Replace the whole blob.
    async fn write(&self, data: &[u8]) -> Result<()>;
}

/// One `storage "<kind>" { … }` block. The kind label dispatches to the
/// concrete backend config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageConfig {
    Local(local::Config),
    Mock(mock::Config),
}

impl StorageConfig {
    /// Build the backend this config describes.
    pub fn new_storage(&self) -> Result<Box<dyn Storage>> {
        match self {
            StorageConfig::Local(config) => Ok(Box::new(local::LocalStorage::new(config.clone()))),
            StorageConfig::Mock(config) => Ok(Box::new(mock::MockStorage::from_config(config))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_storage_dispatches_on_kind() {
        let config = StorageConfig::Local(local::Config { path: "tmp/history.json".to_string() });
        assert!(config.new_storage().is_ok());

        let config = StorageConfig::Mock(mock::Config::default());
        assert!(config.new_storage().is_ok());
    }
}

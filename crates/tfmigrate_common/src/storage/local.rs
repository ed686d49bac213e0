//! Local-file history storage.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::Storage;

/// `storage "local" { path = "…" }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Path of the history file, relative to the current directory.
    pub path: String,
}

#[derive(Debug)]
pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(config: Config) -> Self {
        Self { path: PathBuf::from(config.path) }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn read(&self) -> Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to read history file: {}", self.path.display())
            }),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create history directory: {}", parent.display())
                })?;
            }
        }

        // Write-then-rename so readers never observe a half-written blob.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("failed to write history file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace history file: {}", self.path.display()))?;
        Ok(())
    }
}

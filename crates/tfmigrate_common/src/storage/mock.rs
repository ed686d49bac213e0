//! In-memory history storage for tests.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::Storage;

/// `storage "mock" { data = "…" read_error = false write_error = false }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub read_error: bool,
    #[serde(default)]
    pub write_error: bool,
}

/// Cloneable handle over shared bytes, so a test can keep one clone and
/// inspect what the engine wrote through another.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    data: Arc<Mutex<Vec<u8>>>,
    read_error: bool,
    write_error: bool,
}

impl MockStorage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data.into())),
            read_error: false,
            write_error: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            data: Arc::new(Mutex::new(config.data.clone().into_bytes())),
            read_error: config.read_error,
            write_error: config.write_error,
        }
    }

    pub fn with_read_error(mut self) -> Self {
        self.read_error = true;
        self
    }

    pub fn with_write_error(mut self) -> Self {
        self.write_error = true;
        self
    }

    /// Current contents, for assertions.
    pub fn data(&self) -> Vec<u8> {
        self.data.lock().expect("mock storage lock").clone()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn read(&self) -> Result<Vec<u8>> {
        if self.read_error {
            bail!("mock storage read error");
        }
        Ok(self.data())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if self.write_error {
            bail!("mock storage write error");
        }
        *self.data.lock().expect("mock storage lock") = data.to_vec();
        Ok(())
    }
}

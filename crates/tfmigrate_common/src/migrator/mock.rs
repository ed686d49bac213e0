//! A migrator that never touches terraform, driven by error switches.
//!
//! Backs the `migration "mock" "<name>"` type used by the history-runner
//! test suites.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Migrator, MigratorOption};

/// `migration "mock" "<name>" { plan_error = … apply_error = … }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MockMigratorConfig {
    #[serde(default)]
    pub plan_error: bool,
    #[serde(default)]
    pub apply_error: bool,
}

impl MockMigratorConfig {
    pub fn new_migrator(&self, _o: &MigratorOption) -> Result<MockMigrator> {
        Ok(MockMigrator { plan_error: self.plan_error, apply_error: self.apply_error })
    }
}

pub struct MockMigrator {
    plan_error: bool,
    apply_error: bool,
}

#[async_trait]
impl Migrator for MockMigrator {
    async fn plan(&self, _ctx: &CancellationToken) -> Result<()> {
        info!("[migrator] mock plan (plan_error={})", self.plan_error);
        if self.plan_error {
            bail!("mock plan error");
        }
        Ok(())
    }

    async fn apply(&self, ctx: &CancellationToken) -> Result<()> {
        self.plan(ctx).await?;
        info!("[migrator] mock apply (apply_error={})", self.apply_error);
        if self.apply_error {
            bail!("mock apply error");
        }
        Ok(())
    }
}

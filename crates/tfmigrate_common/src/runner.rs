//! Drivers that load migration files and run them.
//!
//! [`MigrationRunner`] handles one file: parse, build the migrator, plan or
//! apply. [`HistoryRunner`] handles a directory: cross-reference the files
//! with the persisted history, validate integrity, execute unapplied
//! migrations in lexicographic order, and commit a history record after each
//! successful apply.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{parse_migration_file, MigrationConfig, TfmigrateConfig};
use crate::history::{md5_hex, HistoryController};
use crate::migrator::{Migrator, MigratorOption};

/// Loads and runs a single migration file.
pub struct MigrationRunner {
    path: PathBuf,
    config: MigrationConfig,
    source: Vec<u8>,
    migrator: Box<dyn Migrator>,
}

impl MigrationRunner {
    pub fn load(path: impl Into<PathBuf>, option: &MigratorOption) -> Result<Self> {
        let path = path.into();
        let source = std::fs::read(&path)
            .with_context(|| format!("failed to read migration file: {}", path.display()))?;
        let text = String::from_utf8_lossy(&source);
        let config = parse_migration_file(&path.display().to_string(), &text)?;
        let migrator = config.migrator.new_migrator(option)?;
        Ok(Self { path, config, source, migrator })
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Hex MD5 of the file contents, as recorded in history.
    pub fn content_hash(&self) -> String {
        md5_hex(&self.source)
    }

    pub async fn plan(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[runner] plan migration {} ({})", self.config.name, self.path.display());
        self.migrator.plan(ctx).await
    }

    pub async fn apply(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[runner] apply migration {} ({})", self.config.name, self.path.display());
        self.migrator.apply(ctx).await
    }
}

/// Drives unapplied migrations in order and keeps the history current.
pub struct HistoryRunner {
    migration_dir: PathBuf,
    option: MigratorOption,
    controller: HistoryController,
}

impl std::fmt::Debug for HistoryRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRunner")
            .field("migration_dir", &self.migration_dir)
            .field("option", &self.option)
            .finish_non_exhaustive()
    }
}

impl HistoryRunner {
    /// Build from the top-level configuration. Requires a `history` block.
    pub async fn new(config: &TfmigrateConfig, option: MigratorOption) -> Result<Self> {
        let history = config
            .history
            .as_ref()
            .ok_or_else(|| anyhow!("history storage is not configured"))?;
        let storage = history.storage.new_storage()?;
        let migration_dir = PathBuf::from(&config.migration_dir);
        let controller = HistoryController::load(migration_dir.clone(), storage).await?;
        Ok(Self { migration_dir, option, controller })
    }

    /// Unapplied migration filenames, in application order.
    pub fn list_unapplied(&self) -> Result<Vec<String>> {
        self.controller.unapplied_migrations()
    }

    /// Plan one migration (validation skipped) or every unapplied migration
    /// in order. Directory mode keeps going after a failure so the operator
    /// sees the full picture, then reports every file that failed.
    pub async fn plan(&mut self, ctx: &CancellationToken, filename: Option<&str>) -> Result<()> {
        if let Some(filename) = filename {
            return self.plan_file(ctx, filename).await;
        }

        self.controller.validate_migrations()?;
        self.controller.update_missing_md5_hashes();

        let unapplied = self.controller.unapplied_migrations()?;
        if unapplied.is_empty() {
            info!("[runner] no unapplied migrations");
            return Ok(());
        }

        let mut failed = Vec::new();
        for filename in unapplied {
            if let Err(err) = self.plan_file(ctx, &filename).await {
                error!("[runner] plan failed for {filename}: {err:#}");
                failed.push(filename);
            }
        }

        if !failed.is_empty() {
            bail!("plan failed for {} migration(s): {}", failed.len(), failed.join(", "));
        }
        Ok(())
    }

    /// Apply one migration (must be unapplied) or every unapplied migration
    /// in order, persisting a history record after each success. A failing
    /// apply stops the run; records for earlier successes are already saved.
    pub async fn apply(&mut self, ctx: &CancellationToken, filename: Option<&str>) -> Result<()> {
        if let Some(filename) = filename {
            if self.controller.already_applied(filename) {
                bail!("the migration has already been applied: {filename}");
            }
            return self.apply_file(ctx, filename).await;
        }

        self.controller.validate_migrations()?;
        self.controller.update_missing_md5_hashes();

        let unapplied = self.controller.unapplied_migrations()?;
        if unapplied.is_empty() {
            info!("[runner] no unapplied migrations");
            return Ok(());
        }

        for filename in unapplied {
            self.apply_file(ctx, &filename).await?;
        }
        Ok(())
    }

    async fn plan_file(&self, ctx: &CancellationToken, filename: &str) -> Result<()> {
        let runner = MigrationRunner::load(self.migration_path(filename), &self.option)?;
        runner.plan(ctx).await
    }

    async fn apply_file(&mut self, ctx: &CancellationToken, filename: &str) -> Result<()> {
        let runner = MigrationRunner::load(self.migration_path(filename), &self.option)?;
        runner
            .apply(ctx)
            .await
            .with_context(|| format!("failed to apply migration: {filename}"))?;

        let config = runner.config();
        self.controller.add_record(
            filename,
            &config.migration_type,
            &config.name,
            None,
            Some(runner.content_hash()),
        );

        if let Err(err) = self.controller.save().await {
            // The state push cannot be undone, so losing the bookkeeping is
            // its own, louder failure class.
            error!(
                "[runner] the migration {filename} was applied, but saving the history FAILED: {err:#}"
            );
            error!(
                "[runner] re-running would apply {filename} a second time; reconstruct its history record by hand before running apply again"
            );
            return Err(err).with_context(|| {
                format!("the migration was applied but the history update failed: {filename}")
            });
        }

        info!("[runner] recorded applied migration: {filename}");
        Ok(())
    }

    fn migration_path(&self, filename: &str) -> PathBuf {
        self.migration_dir.join(filename)
    }
}

/// Plan a single migration file without consulting any history.
pub async fn plan_file_without_history(
    ctx: &CancellationToken,
    migration_dir: &Path,
    filename: &str,
    option: &MigratorOption,
) -> Result<()> {
    let runner = MigrationRunner::load(migration_dir.join(filename), option)?;
    runner.plan(ctx).await
}

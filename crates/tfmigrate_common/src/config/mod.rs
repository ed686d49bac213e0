//! HCL configuration: the top-level `tfmigrate` block and migration files.
//!
//! Both file kinds are parsed with an evaluation context that exposes the
//! process environment as the `env` object, so attribute values may
//! interpolate `${env.NAME}`.

mod migration;

pub use migration::{parse_migration_file, MigrationConfig, MigratorConfig};

use anyhow::{Context as _, Result};
use hcl::eval::Context;
use hcl::value::Map;
use hcl::Value;
use serde::Deserialize;

/// Default configuration file path, relative to the current directory.
pub const DEFAULT_CONFIG_PATH: &str = ".tfmigrate.hcl";

use crate::storage::StorageConfig;

/// Parsed top-level configuration:
///
/// ```hcl
/// tfmigrate {
///   migration_dir = "migrations"
///   history {
///     storage "local" { path = "tmp/history.json" }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfmigrateConfig {
    /// Directory the migration files live in.
    pub migration_dir: String,
    /// History settings; directory-mode plan/apply and `list` need them.
    pub history: Option<HistoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryConfig {
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    tfmigrate: TfmigrateBlock,
}

#[derive(Debug, Deserialize)]
struct TfmigrateBlock {
    #[serde(default = "default_migration_dir")]
    migration_dir: String,
    #[serde(default)]
    history: Option<HistoryBlock>,
}

#[derive(Debug, Deserialize)]
struct HistoryBlock {
    storage: StorageConfig,
}

fn default_migration_dir() -> String {
    ".".to_string()
}

/// Parse a configuration file. `label` names the file in error messages.
pub fn parse_config(label: &str, source: &str) -> Result<TfmigrateConfig> {
    let ctx = eval_context();
    let file: ConfigFile = hcl::eval::from_str(source, &ctx)
        .with_context(|| format!("failed to parse configuration file: {label}"))?;
    Ok(TfmigrateConfig {
        migration_dir: file.tfmigrate.migration_dir,
        history: file.tfmigrate.history.map(|h| HistoryConfig { storage: h.storage }),
    })
}

/// Read and parse a configuration file from disk.
pub fn load_config(path: &std::path::Path) -> Result<TfmigrateConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file: {}", path.display()))?;
    parse_config(&path.display().to_string(), &source)
}

/// Evaluation context exposing the process environment as `env.NAME`.
pub(crate) fn eval_context() -> Context<'static> {
    let vars: Map<String, Value> = std::env::vars().map(|(k, v)| (k, Value::from(v))).collect();
    let mut ctx = Context::new();
    ctx.declare_var("env", Value::Object(vars));
    ctx
}

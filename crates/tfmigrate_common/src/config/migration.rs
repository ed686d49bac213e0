//! Parsing of migration files.
//!
//! A migration file declares exactly one `migration "<type>" "<name>"`
//! block; the type label selects the migrator config the block body is
//! decoded into.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use super::eval_context;
use crate::migrator::{
    Migrator, MigratorOption, MockMigratorConfig, MultiStateMigratorConfig, StateMigratorConfig,
};

/// One parsed `migration` block.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    /// The type label: `state`, `multi_state`, or `mock`.
    pub migration_type: String,
    /// The name label; must be unique across a migration directory.
    pub name: String,
    pub migrator: MigratorConfig,
}

/// Factory for the migrator a migration block describes.
#[derive(Debug, Clone, PartialEq)]
pub enum MigratorConfig {
    State(StateMigratorConfig),
    MultiState(MultiStateMigratorConfig),
    Mock(MockMigratorConfig),
}

impl MigratorConfig {
    pub fn new_migrator(&self, o: &MigratorOption) -> Result<Box<dyn Migrator>> {
        match self {
            MigratorConfig::State(config) => Ok(Box::new(config.new_migrator(o)?)),
            MigratorConfig::MultiState(config) => Ok(Box::new(config.new_migrator(o)?)),
            MigratorConfig::Mock(config) => Ok(Box::new(config.new_migrator(o)?)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MigrationFile {
    migration: MigrationBlock,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum MigrationBlock {
    State(BTreeMap<String, StateMigratorConfig>),
    MultiState(BTreeMap<String, MultiStateMigratorConfig>),
    Mock(BTreeMap<String, MockMigratorConfig>),
}

/// Parse a migration file. `label` names the file in error messages.
pub fn parse_migration_file(label: &str, source: &str) -> Result<MigrationConfig> {
    let ctx = eval_context();
    let file: MigrationFile = hcl::eval::from_str(source, &ctx)
        .with_context(|| format!("failed to parse migration file: {label}"))?;

    let (migration_type, name, migrator) = match file.migration {
        MigrationBlock::State(named) => {
            let (name, config) = single(named, label)?;
            ("state", name, MigratorConfig::State(config))
        }
        MigrationBlock::MultiState(named) => {
            let (name, config) = single(named, label)?;
            ("multi_state", name, MigratorConfig::MultiState(config))
        }
        MigrationBlock::Mock(named) => {
            let (name, config) = single(named, label)?;
            ("mock", name, MigratorConfig::Mock(config))
        }
    };

    Ok(MigrationConfig { migration_type: migration_type.to_string(), name, migrator })
}

fn single<T>(mut named: BTreeMap<String, T>, label: &str) -> Result<(String, T)> {
    if named.len() != 1 {
        bail!("a migration file must declare exactly one migration block: {label}");
    }
    let name = named.keys().next().cloned().expect("checked non-empty");
    let config = named.remove(&name).expect("checked present");
    Ok((name, config))
}

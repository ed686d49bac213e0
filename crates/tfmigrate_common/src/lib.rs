//! State migration engine for Terraform and OpenTofu.
//!
//! Lets operators refactor infrastructure state (rename resources, move
//! them between modules or between separate state files) without touching
//! real resources. A migration is a declarative list of actions (`mv`, `rm`,
//! `import`, `xmv`) stored as an HCL file; the engine applies it to an
//! ephemeral local copy of the remote state, verifies with `terraform plan`
//! that nothing real would change, and force-pushes the rewritten state. A
//! persisted history applies the files in a directory in lexicographic
//! order, each exactly once.
//!
//! Layering, leaves first: [`tfexec`] (subprocess executor, typed terraform
//! wrappers, plan-JSON classifier) → [`action`] (the instruction set) →
//! [`migrator`] (single-/multi-state plan-apply lifecycle) → [`config`] /
//! [`history`] / [`storage`] → [`runner`] (directory-mode driver).

pub mod action;
pub mod config;
pub mod history;
pub mod migrator;
pub mod runner;
pub mod storage;
pub mod tfexec;

pub use config::{load_config, parse_config, TfmigrateConfig, DEFAULT_CONFIG_PATH};
pub use migrator::{Migrator, MigratorOption};
pub use runner::{HistoryRunner, MigrationRunner};

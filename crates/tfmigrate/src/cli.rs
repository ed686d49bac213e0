//! Command-line argument parsing.
//!
//! Keeps the clap surface separate from execution logic.

use clap::{Parser, Subcommand};

/// tfmigrate - refactor Terraform/OpenTofu state without touching real
/// resources.
#[derive(Debug, Parser)]
#[command(name = "tfmigrate")]
#[command(about = "Declarative state migrations for Terraform and OpenTofu", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = tfmigrate_common::DEFAULT_CONFIG_PATH)]
    pub config: String,

    /// -backend-config option passed when re-initializing the remote
    /// backend (repeatable).
    #[arg(long = "backend-config", global = true, value_name = "KEY=VALUE")]
    pub backend_config: Vec<String>,

    /// The remote backend is Terraform Cloud (workspaces travel in
    /// TF_WORKSPACE instead of `terraform workspace select`).
    #[arg(long, global = true)]
    pub backend_terraform_cloud: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compute new state(s) and check them against real resources without
    /// pushing anything.
    Plan {
        /// A single migration file to plan. Without it, every unapplied
        /// migration is planned in order.
        file: Option<String>,

        /// Also save the verified plan file to this path.
        #[arg(long)]
        out: Option<String>,
    },

    /// Plan, then push the new state(s) and record the migration in history.
    Apply {
        /// A single unapplied migration file to apply. Without it, every
        /// unapplied migration is applied in order.
        file: Option<String>,
    },

    /// List unapplied migration files.
    List,
}

//! Command dispatch: load the configuration, build the migrator options,
//! and drive the engine.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tfmigrate_common::runner::plan_file_without_history;
use tfmigrate_common::{load_config, HistoryRunner, MigratorOption, TfmigrateConfig};

use crate::cli::{Cli, Commands};

/// Environment variable overriding how the terraform binary is executed.
/// A multi-word value injects a wrapper; `tofu` selects OpenTofu.
const EXEC_PATH_ENV: &str = "TFMIGRATE_EXEC_PATH";
/// Per-side overrides for multi-state migrations.
const SOURCE_EXEC_PATH_ENV: &str = "TFMIGRATE_SOURCE_EXEC_PATH";
const DESTINATION_EXEC_PATH_ENV: &str = "TFMIGRATE_DESTINATION_EXEC_PATH";

pub async fn run(cli: Cli, ctx: CancellationToken) -> Result<()> {
    let config = load_config(Path::new(&cli.config))?;

    match &cli.command {
        Commands::Plan { file, out } => {
            let option = migrator_option(&cli, out.clone());
            match file {
                Some(file) if config.history.is_none() => {
                    // No history storage configured; plan the one file directly.
                    plan_file_without_history(
                        &ctx,
                        Path::new(&config.migration_dir),
                        file,
                        &option,
                    )
                    .await?;
                }
                file => {
                    let mut runner = HistoryRunner::new(&config, option).await?;
                    runner.plan(&ctx, file.as_deref()).await?;
                }
            }
            println!("{}", "plan successful".green());
        }
        Commands::Apply { file } => {
            let option = migrator_option(&cli, None);
            let mut runner = HistoryRunner::new(&config, option).await?;
            runner.apply(&ctx, file.as_deref()).await?;
            println!("{}", "apply successful".green());
        }
        Commands::List => {
            list_unapplied(&config, migrator_option(&cli, None)).await?;
        }
    }

    Ok(())
}

async fn list_unapplied(config: &TfmigrateConfig, option: MigratorOption) -> Result<()> {
    let runner = HistoryRunner::new(config, option).await?;
    let unapplied = runner.list_unapplied().context("failed to list unapplied migrations")?;
    for filename in unapplied {
        println!("{filename}");
    }
    Ok(())
}

/// Build the shared migrator options from CLI flags and environment.
fn migrator_option(cli: &Cli, plan_out: Option<String>) -> MigratorOption {
    let exec_path = env_non_empty(EXEC_PATH_ENV);
    let source_exec_path = env_non_empty(SOURCE_EXEC_PATH_ENV);
    let destination_exec_path = env_non_empty(DESTINATION_EXEC_PATH_ENV);

    for exec in [&exec_path, &source_exec_path, &destination_exec_path]
        .into_iter()
        .flatten()
    {
        preflight_exec_path(exec);
    }
    if exec_path.is_none() && source_exec_path.is_none() && destination_exec_path.is_none() {
        preflight_exec_path(tfmigrate_common::tfexec::DEFAULT_EXEC_PATH);
    }

    MigratorOption {
        exec_path,
        source_exec_path,
        destination_exec_path,
        plan_out,
        is_backend_terraform_cloud: cli.backend_terraform_cloud,
        backend_config: cli.backend_config.clone(),
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Warn early when the configured binary is not on PATH. Only a warning: a
/// wrapper command may make it resolvable at run time.
fn preflight_exec_path(exec_path: &str) {
    let Some(program) = exec_path.split_whitespace().next() else {
        return;
    };
    match which::which(program) {
        Ok(path) => debug!("resolved {program} to {}", path.display()),
        Err(_) => warn!("{program} not found on PATH; terraform invocations are likely to fail"),
    }
}

//! The plan/apply lifecycle shared by all migrators.
//!
//! A migrator runs against ephemeral local copies of remote state: the
//! working directory is prepared (init, workspace, state pull, backend
//! override to local), the action list folds over the pulled state, a
//! `terraform plan` verifies the rewritten state still matches real
//! infrastructure, and on apply the new state is force-pushed. The
//! backend override is restored on every exit path, with cleanup failures
//! joined into the returned error.

mod mock;
mod multi_state;
mod state;

pub use mock::{MockMigrator, MockMigratorConfig};
pub use multi_state::{MultiStateMigrator, MultiStateMigratorConfig};
pub use state::{StateMigrator, StateMigratorConfig};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::tfexec::{BackendOverride, Executor, PlanOutcome, State, TerraformCli};

/// Name of the backend override file written into a working directory while
/// it is detached from its remote backend.
pub const BACKEND_OVERRIDE_FILENAME: &str = "_tfmigrate_override.tf";

/// The capability set every migration executes through.
#[async_trait]
pub trait Migrator: Send + Sync {
    /// Compute the new state(s) and verify them against real infrastructure
    /// without pushing anything.
    async fn plan(&self, ctx: &CancellationToken) -> Result<()>;

    /// Plan, then push the new state(s) to the remote backend(s).
    async fn apply(&self, ctx: &CancellationToken) -> Result<()>;
}

/// Process-wide knobs shared across migrator instances.
#[derive(Debug, Clone, Default)]
pub struct MigratorOption {
    /// How the terraform command is executed; a multi-word value injects a
    /// wrapper (`direnv exec . terraform`). Defaults to `terraform`.
    pub exec_path: Option<String>,
    /// Overrides `exec_path` for the source side of a multi-state migration.
    pub source_exec_path: Option<String>,
    /// Overrides `exec_path` for the destination side.
    pub destination_exec_path: Option<String>,
    /// When set, the verified plan file is also written to this path.
    pub plan_out: Option<String>,
    /// The remote backend is Terraform Cloud: workspaces travel in
    /// `TF_WORKSPACE` rather than `workspace select`.
    pub is_backend_terraform_cloud: bool,
    /// `-backend-config` values for re-initializing the remote backend.
    pub backend_config: Vec<String>,
}

impl MigratorOption {
    fn source_exec_path(&self) -> Option<&str> {
        self.source_exec_path.as_deref().or(self.exec_path.as_deref())
    }

    fn destination_exec_path(&self) -> Option<&str> {
        self.destination_exec_path.as_deref().or(self.exec_path.as_deref())
    }
}

/// Which side's exec-path override applies to a working directory.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Side {
    Source,
    Destination,
}

/// Build the terraform runner for one working directory, honoring the
/// per-side exec path and the Terraform Cloud workspace convention.
pub(crate) fn new_terraform_cli(
    dir: &str,
    workspace: &str,
    side: Side,
    o: &MigratorOption,
) -> TerraformCli {
    let mut executor = Executor::new(dir);
    let exec_path = match side {
        Side::Source => o.source_exec_path(),
        Side::Destination => o.destination_exec_path(),
    };
    if let Some(exec_path) = exec_path {
        executor = executor.with_exec_path(exec_path);
    }
    if o.is_backend_terraform_cloud {
        executor = executor.with_env("TF_WORKSPACE", workspace);
    }
    TerraformCli::new(executor)
}

/// Prepare a working directory: init, select the workspace, pull the remote
/// state, then detach the directory from its remote backend. Returns the
/// pulled state and the restore guard the caller must invoke on every exit
/// path.
pub(crate) async fn setup_work_dir(
    ctx: &CancellationToken,
    tf: &TerraformCli,
    workspace: &str,
    o: &MigratorOption,
) -> Result<(State, BackendOverride)> {
    let version = tf.version(ctx).await?;
    info!("[migrator@{}] {}", tf.dir().display(), version);

    tf.init(ctx, &[]).await?;

    if !o.is_backend_terraform_cloud && workspace != "default" {
        tf.workspace_select_or_new(ctx, workspace).await?;
    }

    let state = tf.state_pull(ctx).await?;

    let overridden = tf
        .override_backend_to_local(
            ctx,
            BACKEND_OVERRIDE_FILENAME,
            workspace,
            o.is_backend_terraform_cloud,
            &o.backend_config,
        )
        .await?;

    Ok((state, overridden))
}

/// Classify a plan taken against a rewritten state. Returns whether the plan
/// is acceptable and a human-readable reason; the rendered change report
/// goes to the log.
pub(crate) async fn check_plan(
    ctx: &CancellationToken,
    tf: &TerraformCli,
    outcome: &PlanOutcome,
    allow_create: bool,
    state_label: &str,
) -> (bool, String) {
    if !outcome.has_changes {
        return (true, format!("✅ ACCEPTED: {state_label} state plan has no changes"));
    }

    let plan_json = match tf.show_plan_json(ctx, &outcome.plan).await {
        Ok(plan_json) => plan_json,
        Err(err) => return (false, format!("failed to parse plan JSON: {err:#}")),
    };

    if !plan_json.has_changes() {
        info!(
            "[migrator@{}] output changes:\n{}",
            tf.dir().display(),
            plan_json.render_output_changes()
        );
        return (
            true,
            format!("✅ ACCEPTED: {state_label} state plan has only output changes (no resource changes)"),
        );
    }

    info!(
        "[migrator@{}] resource changes:\n{}",
        tf.dir().display(),
        plan_json.render_resource_changes(allow_create, state_label)
    );

    if allow_create && plan_json.has_only_safe_actions() {
        return (
            true,
            format!("✅ ACCEPTED: {state_label} state plan has only safe actions (create or tag-only changes)"),
        );
    }

    if allow_create {
        (
            false,
            format!("❌ REJECTED: {state_label} state plan has changes other than safe actions (create or tag-only changes)"),
        )
    } else {
        (false, format!("❌ REJECTED: {state_label} state plan has unexpected resource changes"))
    }
}

/// Restore a backend override and merge any cleanup failure into the primary
/// result, so that errors on the unwind path are reported, never swallowed.
///
/// The restore runs on a detached token: even when the run was cancelled,
/// the working directory must be put back on its remote backend.
pub(crate) async fn restore_and_join<T>(
    result: Result<T>,
    overridden: BackendOverride,
) -> Result<T> {
    let restore_ctx = CancellationToken::new();
    let restore_result = overridden.restore(&restore_ctx).await;
    match (result, restore_result) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(restore_err)) => Err(restore_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(restore_err)) => {
            error!("failed to restore the backend during error unwind: {restore_err:#}");
            Err(anyhow!("{err:#}; additionally failed to restore the backend: {restore_err:#}"))
        }
    }
}

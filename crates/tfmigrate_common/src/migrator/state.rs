//! Migrator for actions confined to a single working directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    check_plan, new_terraform_cli, restore_and_join, setup_work_dir, Migrator, MigratorOption, Side,
};
use crate::action::StateAction;
use crate::tfexec::{State, TerraformCli};

fn default_workspace() -> String {
    "default".to_string()
}

/// `migration "state" "<name>" { … }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StateMigratorConfig {
    /// Working directory the migration runs in.
    pub dir: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// One action per entry, e.g. `"mv aws_iam_role.a aws_iam_role.b"`.
    pub actions: Vec<String>,
    /// Apply even when the verification plan shows unexpected diffs.
    #[serde(default)]
    pub force: bool,
    /// Skip the verification plan entirely.
    #[serde(default)]
    pub skip_plan: bool,
    /// Optional `-target` for the verification plan.
    #[serde(default)]
    pub tf_target: Option<String>,
}

impl StateMigratorConfig {
    pub fn new_migrator(&self, o: &MigratorOption) -> Result<StateMigrator> {
        if self.actions.is_empty() {
            bail!("failed to build a migrator with no actions");
        }
        let actions = self
            .actions
            .iter()
            .map(|line| StateAction::parse(line))
            .collect::<Result<Vec<_>>>()?;

        Ok(StateMigrator {
            tf: new_terraform_cli(&self.dir, &self.workspace, Side::Source, o),
            workspace: self.workspace.clone(),
            actions,
            o: o.clone(),
            force: self.force,
            skip_plan: self.skip_plan,
            tf_target: self.tf_target.clone(),
        })
    }
}

/// Applies a list of single-state actions to one directory/workspace,
/// verifies the result with `terraform plan`, and pushes it on apply.
#[derive(Debug)]
pub struct StateMigrator {
    tf: TerraformCli,
    workspace: String,
    actions: Vec<StateAction>,
    o: MigratorOption,
    force: bool,
    skip_plan: bool,
    tf_target: Option<String>,
}

impl StateMigrator {
    /// Prepare the directory, fold the actions over the pulled state, and
    /// verify the final state. The backend is restored on every exit path.
    async fn plan_state(&self, ctx: &CancellationToken) -> Result<State> {
        let (state, overridden) = setup_work_dir(ctx, &self.tf, &self.workspace, &self.o).await?;
        let result = self.compute_and_check(ctx, state).await;
        restore_and_join(result, overridden).await
    }

    async fn compute_and_check(&self, ctx: &CancellationToken, state: State) -> Result<State> {
        info!("[migrator@{}] compute a new state", self.tf.dir().display());
        let mut current = state;
        for action in &self.actions {
            let next = action.state_update(ctx, &self.tf, &current).await?;
            // Defensive copy: no action may observe a buffer shared with the
            // previous iteration's result.
            current = State::new(next.bytes().to_vec());
        }

        if self.skip_plan {
            info!("[migrator@{}] skipping check diffs", self.tf.dir().display());
            return Ok(current);
        }

        let mut opts = vec![
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-detailed-exitcode".to_string(),
        ];
        if let Some(target) = &self.tf_target {
            opts.push(format!("-target={target}"));
        }

        info!("[migrator@{}] check diffs", self.tf.dir().display());
        let outcome = self.tf.plan(ctx, Some(&current), &opts).await?;
        let (clean, reason) = check_plan(ctx, &self.tf, &outcome, false, "source").await;
        if clean {
            info!("[migrator@{}] {}", self.tf.dir().display(), reason);
        } else if self.force {
            warn!("[migrator@{}] {}", self.tf.dir().display(), reason);
            warn!(
                "[migrator@{}] plan has unexpected diffs, but the force option is set, continuing",
                self.tf.dir().display()
            );
        } else {
            error!("[migrator@{}] {}", self.tf.dir().display(), reason);
            bail!(
                "terraform plan command returns unexpected diffs in {}: {}",
                self.tf.dir().display(),
                reason
            );
        }

        if let Some(plan_out) = &self.o.plan_out {
            std::fs::write(plan_out, outcome.plan.bytes())
                .with_context(|| format!("failed to save plan file: {plan_out}"))?;
            info!("[migrator@{}] saved plan file to {}", self.tf.dir().display(), plan_out);
        }

        Ok(current)
    }
}

#[async_trait]
impl Migrator for StateMigrator {
    async fn plan(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[migrator] start state migrator plan");
        self.plan_state(ctx).await?;
        info!("[migrator] state migrator plan success!");
        Ok(())
    }

    async fn apply(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[migrator] start state migrator plan phase for apply");
        let state = self.plan_state(ctx).await?;
        info!("[migrator] state migrator plan phase for apply success!");

        info!("[migrator@{}] push the new state to remote", self.tf.dir().display());
        if let Err(err) = self.tf.state_push(ctx, &state).await {
            error!(
                "[migrator@{}] failed to push the new state to remote: {err:#}",
                self.tf.dir().display()
            );
            error!(
                "[migrator@{}] the remote state still matches real resources, but the local copy has diverged. Do NOT run 'terraform apply' in this directory until the migration has been re-run successfully, it would break the state and DELETE RESOURCES!",
                self.tf.dir().display()
            );
            return Err(err);
        }

        info!("[migrator] state migrator apply success!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(actions: &[&str]) -> StateMigratorConfig {
        StateMigratorConfig {
            dir: "foo".to_string(),
            workspace: default_workspace(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            force: false,
            skip_plan: false,
            tf_target: None,
        }
    }

    #[test]
    fn new_migrator_requires_actions() {
        let err = config(&[]).new_migrator(&MigratorOption::default()).unwrap_err();
        assert!(err.to_string().contains("no actions"));
    }

    #[test]
    fn new_migrator_parses_every_action() {
        let migrator = config(&[
            "mv aws_iam_role.a aws_iam_role.b",
            "rm aws_iam_role.c",
            "import aws_iam_role.d role-d",
            r"xmv ^aws_instance\.x(\d+)$ aws_instance.y$1",
        ])
        .new_migrator(&MigratorOption::default())
        .unwrap();
        assert_eq!(migrator.actions.len(), 4);

        assert!(config(&["mv only_one"]).new_migrator(&MigratorOption::default()).is_err());
    }
}

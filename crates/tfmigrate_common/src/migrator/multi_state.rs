//! Migrator for actions that move resources between two working directories.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    check_plan, new_terraform_cli, restore_and_join, setup_work_dir, Migrator, MigratorOption, Side,
};
use crate::action::MultiStateAction;
use crate::tfexec::{State, TerraformCli};

fn default_workspace() -> String {
    "default".to_string()
}

/// `migration "multi_state" "<name>" { … }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultiStateMigratorConfig {
    /// Working directory resources move from.
    pub from_dir: String,
    /// Working directory resources move to.
    pub to_dir: String,
    #[serde(default = "default_workspace")]
    pub from_workspace: String,
    #[serde(default = "default_workspace")]
    pub to_workspace: String,
    /// One multi-state action per entry: `"mv <src-in-from> <dst-in-to>"`.
    pub actions: Vec<String>,
    /// Apply even when the destination plan shows non-safe diffs.
    #[serde(default)]
    pub force: bool,
    /// Skip the verification plan in `from_dir`.
    #[serde(default)]
    pub from_skip_plan: bool,
    /// Skip the verification plan in `to_dir`.
    #[serde(default)]
    pub to_skip_plan: bool,
    /// Optional `-target` for the source-side plan only.
    #[serde(default)]
    pub from_tf_target: Option<String>,
}

impl MultiStateMigratorConfig {
    pub fn new_migrator(&self, o: &MigratorOption) -> Result<MultiStateMigrator> {
        if self.actions.is_empty() {
            bail!("failed to build a migrator with no actions");
        }
        let actions = self
            .actions
            .iter()
            .map(|line| MultiStateAction::parse(line))
            .collect::<Result<Vec<_>>>()?;

        Ok(MultiStateMigrator {
            from_tf: new_terraform_cli(&self.from_dir, &self.from_workspace, Side::Source, o),
            to_tf: new_terraform_cli(&self.to_dir, &self.to_workspace, Side::Destination, o),
            from_workspace: self.from_workspace.clone(),
            to_workspace: self.to_workspace.clone(),
            actions,
            o: o.clone(),
            force: self.force,
            from_skip_plan: self.from_skip_plan,
            to_skip_plan: self.to_skip_plan,
            from_tf_target: self.from_tf_target.clone(),
        })
    }
}

/// Applies multi-state actions across two prepared directories and verifies
/// both sides: the source must come out clean, the destination may show the
/// moved resources as safe (create or tag-only) changes.
#[derive(Debug)]
pub struct MultiStateMigrator {
    from_tf: TerraformCli,
    to_tf: TerraformCli,
    from_workspace: String,
    to_workspace: String,
    actions: Vec<MultiStateAction>,
    o: MigratorOption,
    force: bool,
    from_skip_plan: bool,
    to_skip_plan: bool,
    from_tf_target: Option<String>,
}

impl MultiStateMigrator {
    /// Prepare both directories, fold the actions over the state pair, and
    /// verify both sides. Both backends are restored on every exit path.
    async fn plan_states(&self, ctx: &CancellationToken) -> Result<(State, State)> {
        let (from_state, from_override) =
            setup_work_dir(ctx, &self.from_tf, &self.from_workspace, &self.o).await?;

        let result = async {
            let (to_state, to_override) =
                setup_work_dir(ctx, &self.to_tf, &self.to_workspace, &self.o).await?;
            let inner = self.compute_and_check(ctx, from_state, to_state).await;
            restore_and_join(inner, to_override).await
        }
        .await;

        restore_and_join(result, from_override).await
    }

    async fn compute_and_check(
        &self,
        ctx: &CancellationToken,
        from_state: State,
        to_state: State,
    ) -> Result<(State, State)> {
        info!(
            "[migrator] compute new states ({} => {})",
            self.from_tf.dir().display(),
            self.to_tf.dir().display()
        );
        let mut from_current = from_state;
        let mut to_current = to_state;
        for action in &self.actions {
            let (from_next, to_next) = action
                .multi_state_update(ctx, &self.from_tf, &self.to_tf, &from_current, &to_current)
                .await?;
            // Defensive copies between iterations, as for the single-state
            // migrator.
            from_current = State::new(from_next.bytes().to_vec());
            to_current = State::new(to_next.bytes().to_vec());
        }

        let base_opts = vec![
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-detailed-exitcode".to_string(),
        ];

        if self.from_skip_plan {
            info!("[migrator@{}] skipping check diffs", self.from_tf.dir().display());
        } else {
            let mut from_opts = base_opts.clone();
            if let Some(target) = &self.from_tf_target {
                from_opts.push(format!("-target={target}"));
            }

            info!("[migrator@{}] check diffs", self.from_tf.dir().display());
            let outcome = self.from_tf.plan(ctx, Some(&from_current), &from_opts).await?;
            let (clean, reason) = check_plan(ctx, &self.from_tf, &outcome, false, "source").await;
            if !clean {
                error!("[migrator@{}] {}", self.from_tf.dir().display(), reason);
                bail!(
                    "terraform plan command returns unexpected diffs in from_dir {}: {}",
                    self.from_tf.dir().display(),
                    reason
                );
            }
            info!("[migrator@{}] {}", self.from_tf.dir().display(), reason);
            self.save_plan(&self.from_tf, &outcome)?;
        }

        if self.to_skip_plan {
            info!("[migrator@{}] skipping check diffs", self.to_tf.dir().display());
        } else {
            info!("[migrator@{}] check diffs", self.to_tf.dir().display());
            let outcome = self.to_tf.plan(ctx, Some(&to_current), &base_opts).await?;
            let (clean, reason) = check_plan(ctx, &self.to_tf, &outcome, true, "destination").await;
            if clean {
                info!("[migrator@{}] {}", self.to_tf.dir().display(), reason);
            } else if self.force {
                warn!("[migrator@{}] {}", self.to_tf.dir().display(), reason);
                warn!(
                    "[migrator@{}] plan has unexpected diffs, but the force option is set, continuing",
                    self.to_tf.dir().display()
                );
            } else {
                error!("[migrator@{}] {}", self.to_tf.dir().display(), reason);
                bail!(
                    "terraform plan command returns unexpected diffs in to_dir {}: {}",
                    self.to_tf.dir().display(),
                    reason
                );
            }
            self.save_plan(&self.to_tf, &outcome)?;
        }

        Ok((from_current, to_current))
    }

    /// Save a side's verified plan file under its working directory when
    /// `plan_out` is set, so both sides of the migration keep their own copy.
    fn save_plan(&self, tf: &TerraformCli, outcome: &crate::tfexec::PlanOutcome) -> Result<()> {
        let Some(plan_out) = &self.o.plan_out else {
            return Ok(());
        };
        let path = tf.dir().join(plan_out);
        std::fs::write(&path, outcome.plan.bytes())
            .with_context(|| format!("failed to save plan file: {}", path.display()))?;
        info!("[migrator@{}] saved plan file to {}", tf.dir().display(), path.display());
        Ok(())
    }
}

#[async_trait]
impl Migrator for MultiStateMigrator {
    async fn plan(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[migrator] start multi-state migrator plan");
        self.plan_states(ctx).await?;
        info!("[migrator] multi-state migrator plan success!");
        Ok(())
    }

    /// Push order is destination first, then source: resources are written
    /// to their new home before being removed from their old one, so a
    /// mid-apply failure never leaves a resource untracked by any state.
    async fn apply(&self, ctx: &CancellationToken) -> Result<()> {
        info!("[migrator] start multi-state migrator plan phase for apply");
        let (from_state, to_state) = self.plan_states(ctx).await?;
        info!("[migrator] multi-state migrator plan phase for apply success!");

        info!("[migrator@{}] push the new state to remote", self.to_tf.dir().display());
        if let Err(err) = self.to_tf.state_push(ctx, &to_state).await {
            error!(
                "[migrator@{}] failed to push the new state to remote: {err:#}",
                self.to_tf.dir().display()
            );
            error!(
                "[migrator] no remote state has been modified. Do NOT run 'terraform apply' in {} or {} until the migration has been re-run successfully, it would break the state and DELETE RESOURCES!",
                self.from_tf.dir().display(),
                self.to_tf.dir().display()
            );
            return Err(err).context("failed to push the destination state");
        }

        info!("[migrator@{}] push the new state to remote", self.from_tf.dir().display());
        if let Err(err) = self.from_tf.state_push(ctx, &from_state).await {
            error!(
                "[migrator@{}] failed to push the new state to remote: {err:#}",
                self.from_tf.dir().display()
            );
            error!(
                "[migrator] the destination state ({}) was pushed, so the moved resources are now tracked by BOTH states. Do NOT run 'terraform apply' in {}. To recover, either re-run the migration, or remove the moved resources from the source state by hand with 'terraform state rm'.",
                self.to_tf.dir().display(),
                self.from_tf.dir().display()
            );
            return Err(err).context("failed to push the source state");
        }

        info!("[migrator] multi-state migrator apply success!");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(actions: &[&str]) -> MultiStateMigratorConfig {
        MultiStateMigratorConfig {
            from_dir: "from".to_string(),
            to_dir: "to".to_string(),
            from_workspace: default_workspace(),
            to_workspace: default_workspace(),
            actions: actions.iter().map(|s| s.to_string()).collect(),
            force: false,
            from_skip_plan: false,
            to_skip_plan: false,
            from_tf_target: None,
        }
    }

    #[test]
    fn new_migrator_requires_actions() {
        let err = config(&[]).new_migrator(&MigratorOption::default()).unwrap_err();
        assert!(err.to_string().contains("no actions"));
    }

    #[test]
    fn new_migrator_rejects_single_state_only_actions() {
        assert!(config(&["mv aws_iam_role.a aws_iam_role.a"])
            .new_migrator(&MigratorOption::default())
            .is_ok());
        assert!(config(&["rm aws_iam_role.a"]).new_migrator(&MigratorOption::default()).is_err());
    }
}

//! Typed wrappers around terraform subcommands.
//!
//! Every state-mutating wrapper follows the same contract: the input state is
//! written to a scratch file, the subcommand runs against that file with
//! `-state=`, and the rewritten file is read back as a fresh [`State`]. The
//! remote backend is never touched except by `state_pull` / `state_push` and
//! the backend override used to detach a working directory from its remote.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::executor::{ExecError, Executor};
use super::plan_json::PlanJson;
use super::state::{Plan, State};

/// `terraform plan -detailed-exitcode` exit status meaning "diff present".
const PLAN_EXIT_CODE_CHANGES: i32 = 2;

/// Result of a `plan -detailed-exitcode` invocation. The plan file is always
/// read back; `has_changes` records whether terraform exited with status 2.
#[derive(Debug)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub has_changes: bool,
}

/// A typed terraform command runner bound to one working directory.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    executor: Executor,
}

impl TerraformCli {
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }

    pub fn dir(&self) -> &Path {
        self.executor.dir()
    }

    /// First line of `terraform version` (e.g. `Terraform v1.6.2`).
    pub async fn version(&self, ctx: &CancellationToken) -> Result<String> {
        let out = self.run(ctx, &["version"]).await?;
        Ok(out.lines().next().unwrap_or_default().to_string())
    }

    /// `terraform init`. Idempotent; safe to call on an initialized directory.
    pub async fn init(&self, ctx: &CancellationToken, opts: &[String]) -> Result<()> {
        let mut args = strings(&["init", "-input=false", "-no-color"]);
        args.extend(opts.iter().cloned());
        self.executor
            .run(ctx, &args)
            .await
            .with_context(|| format!("terraform init failed in {}", self.dir().display()))?;
        Ok(())
    }

    /// `terraform plan -detailed-exitcode` against the given state, loading
    /// the produced plan file back into memory. Exit code 2 is not an error
    /// here: the caller inspects the plan.
    pub async fn plan(
        &self,
        ctx: &CancellationToken,
        state: Option<&State>,
        opts: &[String],
    ) -> Result<PlanOutcome> {
        if opts.iter().any(|o| o.starts_with("-state=") || o.starts_with("-out=")) {
            bail!("-state and -out plan options are managed internally and cannot be overridden");
        }

        let mut args = strings(&["plan"]);

        let _state_file = match state {
            Some(state) => {
                let file = write_scratch(state.bytes()).context("failed to write scratch state")?;
                args.push(format!("-state={}", file.path().display()));
                Some(file)
            }
            None => None,
        };

        let plan_file = NamedTempFile::new().context("failed to create scratch plan file")?;
        args.push(format!("-out={}", plan_file.path().display()));
        args.extend(opts.iter().cloned());

        let has_changes = match self.executor.run(ctx, &args).await {
            Ok(_) => false,
            Err(err) if err.exit_code() == Some(PLAN_EXIT_CODE_CHANGES) => true,
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("terraform plan failed in {}", self.dir().display())
                })
            }
        };

        let bytes = std::fs::read(plan_file.path()).context("failed to read back plan file")?;
        Ok(PlanOutcome { plan: Plan::new(bytes), has_changes })
    }

    /// `terraform apply` of a previously saved plan, streaming output.
    pub async fn apply(&self, ctx: &CancellationToken, plan: &Plan, opts: &[String]) -> Result<()> {
        let plan_file = write_scratch(plan.bytes()).context("failed to write scratch plan")?;
        let mut args = strings(&["apply", "-input=false", "-no-color"]);
        args.extend(opts.iter().cloned());
        args.push(plan_file.path().display().to_string());
        self.executor
            .run_streaming(ctx, &args)
            .await
            .with_context(|| format!("terraform apply failed in {}", self.dir().display()))?;
        Ok(())
    }

    /// `terraform state pull`: the raw remote state blob.
    pub async fn state_pull(&self, ctx: &CancellationToken) -> Result<State> {
        let out = self
            .executor
            .run(ctx, &strings(&["state", "pull"]))
            .await
            .with_context(|| format!("terraform state pull failed in {}", self.dir().display()))?;
        Ok(State::new(out.stdout))
    }

    /// `terraform state push -force`. Force is deliberate: the local copy is
    /// intentionally divergent from what the backend last saw.
    pub async fn state_push(&self, ctx: &CancellationToken, state: &State) -> Result<()> {
        let state_file = write_scratch(state.bytes()).context("failed to write scratch state")?;
        let args = vec![
            "state".to_string(),
            "push".to_string(),
            "-force".to_string(),
            state_file.path().display().to_string(),
        ];
        self.executor
            .run(ctx, &args)
            .await
            .with_context(|| format!("terraform state push failed in {}", self.dir().display()))?;
        Ok(())
    }

    /// `terraform state list` against the given state.
    pub async fn state_list(
        &self,
        ctx: &CancellationToken,
        state: Option<&State>,
        addresses: &[String],
    ) -> Result<Vec<String>> {
        let mut args = strings(&["state", "list"]);
        let _state_file = match state {
            Some(state) => {
                let file = write_scratch(state.bytes()).context("failed to write scratch state")?;
                args.push(format!("-state={}", file.path().display()));
                Some(file)
            }
            None => None,
        };
        args.extend(addresses.iter().cloned());

        let out = self
            .executor
            .run(ctx, &args)
            .await
            .with_context(|| format!("terraform state list failed in {}", self.dir().display()))?;
        Ok(out
            .stdout_str()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `terraform state mv` within one state. Returns the rewritten state.
    pub async fn state_mv(
        &self,
        ctx: &CancellationToken,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State> {
        let state_file = write_scratch(state.bytes()).context("failed to write scratch state")?;
        let args = vec![
            "state".to_string(),
            "mv".to_string(),
            format!("-state={}", state_file.path().display()),
            source.to_string(),
            destination.to_string(),
        ];
        self.executor.run(ctx, &args).await.with_context(|| {
            format!("terraform state mv {source} {destination} failed in {}", self.dir().display())
        })?;
        let bytes = std::fs::read(state_file.path()).context("failed to read back state")?;
        Ok(State::new(bytes))
    }

    /// `terraform state mv -state= -state-out=` across two states. Runs in
    /// this (source-side) working directory; returns both rewritten states.
    pub async fn state_mv_between(
        &self,
        ctx: &CancellationToken,
        from_state: &State,
        to_state: &State,
        source: &str,
        destination: &str,
    ) -> Result<(State, State)> {
        let from_file = write_scratch(from_state.bytes()).context("failed to write scratch state")?;
        let to_file = write_scratch(to_state.bytes()).context("failed to write scratch state")?;
        let args = vec![
            "state".to_string(),
            "mv".to_string(),
            format!("-state={}", from_file.path().display()),
            format!("-state-out={}", to_file.path().display()),
            source.to_string(),
            destination.to_string(),
        ];
        self.executor.run(ctx, &args).await.with_context(|| {
            format!("terraform state mv {source} {destination} failed in {}", self.dir().display())
        })?;
        let from_bytes = std::fs::read(from_file.path()).context("failed to read back state")?;
        let to_bytes = std::fs::read(to_file.path()).context("failed to read back state")?;
        Ok((State::new(from_bytes), State::new(to_bytes)))
    }

    /// `terraform state rm` of one or more addresses.
    pub async fn state_rm(
        &self,
        ctx: &CancellationToken,
        state: &State,
        addresses: &[String],
    ) -> Result<State> {
        let state_file = write_scratch(state.bytes()).context("failed to write scratch state")?;
        let mut args = vec![
            "state".to_string(),
            "rm".to_string(),
            format!("-state={}", state_file.path().display()),
        ];
        args.extend(addresses.iter().cloned());
        self.executor.run(ctx, &args).await.with_context(|| {
            format!(
                "terraform state rm {} failed in {}",
                addresses.join(" "),
                self.dir().display()
            )
        })?;
        let bytes = std::fs::read(state_file.path()).context("failed to read back state")?;
        Ok(State::new(bytes))
    }

    /// `terraform import` of an existing real resource into the given state.
    pub async fn import(
        &self,
        ctx: &CancellationToken,
        state: &State,
        address: &str,
        id: &str,
    ) -> Result<State> {
        let state_file = write_scratch(state.bytes()).context("failed to write scratch state")?;
        let args = vec![
            "import".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            format!("-state={}", state_file.path().display()),
            address.to_string(),
            id.to_string(),
        ];
        self.executor.run(ctx, &args).await.with_context(|| {
            format!("terraform import {address} {id} failed in {}", self.dir().display())
        })?;
        let bytes = std::fs::read(state_file.path()).context("failed to read back state")?;
        Ok(State::new(bytes))
    }

    /// `terraform show -json` of a plan, parsed into [`PlanJson`].
    pub async fn show_plan_json(&self, ctx: &CancellationToken, plan: &Plan) -> Result<PlanJson> {
        let plan_file = write_scratch(plan.bytes()).context("failed to write scratch plan")?;
        let args = vec![
            "show".to_string(),
            "-json".to_string(),
            plan_file.path().display().to_string(),
        ];
        let out = self
            .executor
            .run(ctx, &args)
            .await
            .with_context(|| format!("terraform show -json failed in {}", self.dir().display()))?;
        PlanJson::parse(&out.stdout).context("failed to parse plan JSON")
    }

    pub async fn workspace_show(&self, ctx: &CancellationToken) -> Result<String> {
        let out = self.run(ctx, &["workspace", "show"]).await?;
        Ok(out.trim().to_string())
    }

    pub async fn workspace_list(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let out = self.run(ctx, &["workspace", "list"]).await?;
        Ok(out
            .lines()
            .map(|l| l.trim_start_matches('*').trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub async fn workspace_select(&self, ctx: &CancellationToken, workspace: &str) -> Result<()> {
        self.run(ctx, &["workspace", "select", workspace]).await?;
        Ok(())
    }

    pub async fn workspace_new(&self, ctx: &CancellationToken, workspace: &str) -> Result<()> {
        self.run(ctx, &["workspace", "new", workspace]).await?;
        Ok(())
    }

    pub async fn workspace_delete(&self, ctx: &CancellationToken, workspace: &str) -> Result<()> {
        self.run(ctx, &["workspace", "delete", workspace]).await?;
        Ok(())
    }

    /// Select the workspace, creating it when it does not exist yet.
    pub async fn workspace_select_or_new(
        &self,
        ctx: &CancellationToken,
        workspace: &str,
    ) -> Result<()> {
        if self.workspace_select(ctx, workspace).await.is_ok() {
            return Ok(());
        }
        info!(
            "[terraform@{}] workspace {} not found, creating it",
            self.dir().display(),
            workspace
        );
        self.workspace_new(ctx, workspace).await
    }

    /// `terraform providers lock` for the given platforms, keeping
    /// multi-platform dependency lock files consistent during setup.
    pub async fn providers_lock(&self, ctx: &CancellationToken, platforms: &[String]) -> Result<()> {
        let mut args = strings(&["providers", "lock"]);
        for platform in platforms {
            args.push(format!("-platform={platform}"));
        }
        self.executor
            .run(ctx, &args)
            .await
            .with_context(|| format!("terraform providers lock failed in {}", self.dir().display()))?;
        Ok(())
    }

    /// Detach this working directory from its remote backend by writing an
    /// override file that redirects the backend to local, then re-initializing.
    /// The returned guard restores the remote backend; it must be invoked on
    /// every exit path.
    ///
    /// With a Terraform Cloud backend the workspace cannot be selected with
    /// `workspace select`; it travels in `TF_WORKSPACE` on the executor
    /// instead, so the local workspace step is skipped here.
    pub async fn override_backend_to_local(
        &self,
        ctx: &CancellationToken,
        filename: &str,
        workspace: &str,
        is_backend_terraform_cloud: bool,
        backend_config: &[String],
    ) -> Result<BackendOverride> {
        let path = self.dir().join(filename);
        if path.exists() {
            bail!(
                "backend override file already exists: {} (a previous run may not have been restored; remove it and re-run `terraform init` before retrying)",
                path.display()
            );
        }

        info!("[terraform@{}] switch backend to local", self.dir().display());
        std::fs::write(&path, LOCAL_BACKEND_OVERRIDE)
            .with_context(|| format!("failed to write backend override file: {}", path.display()))?;

        let guard = BackendOverride {
            tf: self.clone(),
            path: path.clone(),
            backend_config: backend_config.to_vec(),
        };

        let switched: Result<()> = async {
            self.init(ctx, &strings(&["-reconfigure"]))
                .await
                .context("failed to re-initialize with the local backend")?;
            if !is_backend_terraform_cloud && workspace != "default" {
                self.workspace_select_or_new(ctx, workspace).await?;
            }
            Ok(())
        }
        .await;

        match switched {
            Ok(()) => Ok(guard),
            Err(err) => {
                // Put the directory back on its remote backend before
                // surfacing, on a detached token so a cancelled run still
                // restores.
                let restore_ctx = CancellationToken::new();
                if let Err(restore_err) = guard.restore(&restore_ctx).await {
                    return Err(err.context(format!(
                        "additionally failed to restore the remote backend: {restore_err:#}"
                    )));
                }
                Err(err)
            }
        }
    }

    async fn run(&self, ctx: &CancellationToken, args: &[&str]) -> Result<String, ExecError> {
        let out = self.executor.run(ctx, &strings(args)).await?;
        Ok(out.stdout_str())
    }
}

/// Undo guard returned by [`TerraformCli::override_backend_to_local`].
#[must_use = "the backend override must be restored on every exit path"]
pub struct BackendOverride {
    tf: TerraformCli,
    path: PathBuf,
    backend_config: Vec<String>,
}

impl BackendOverride {
    /// Remove the override file and re-initialize against the remote backend.
    pub async fn restore(self, ctx: &CancellationToken) -> Result<()> {
        info!("[terraform@{}] switch backend back to remote", self.tf.dir().display());
        std::fs::remove_file(&self.path).with_context(|| {
            format!("failed to remove backend override file: {}", self.path.display())
        })?;
        let mut opts = strings(&["-reconfigure"]);
        for config in &self.backend_config {
            opts.push(format!("-backend-config={config}"));
        }
        self.tf
            .init(ctx, &opts)
            .await
            .context("failed to re-initialize with the remote backend")?;
        Ok(())
    }
}

const LOCAL_BACKEND_OVERRIDE: &str = "terraform {\n  backend \"local\" {\n  }\n}\n";

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

fn write_scratch(bytes: &[u8]) -> std::io::Result<NamedTempFile> {
    let file = NamedTempFile::new()?;
    std::fs::write(file.path(), bytes)?;
    debug!("wrote {} bytes to scratch file {}", bytes.len(), file.path().display());
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plan_rejects_managed_options() {
        let tf = TerraformCli::new(Executor::new("."));
        let ctx = CancellationToken::new();
        let err = tf
            .plan(&ctx, None, &["-state=elsewhere".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("managed internally"));
    }

    #[test]
    fn local_backend_override_is_valid_hcl() {
        let body: hcl::Body = hcl::from_str(LOCAL_BACKEND_OVERRIDE).unwrap();
        assert_eq!(body.blocks().count(), 1);
    }
}

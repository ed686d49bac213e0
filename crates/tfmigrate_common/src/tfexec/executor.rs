//! Subprocess executor for the terraform binary.
//!
//! An [`Executor`] is immutable after construction: it is bound to a working
//! directory, an environment snapshot, and a command line (the binary plus an
//! optional wrapper prefix such as `direnv exec .`). Cancelling the token
//! passed to [`Executor::run`] terminates the child promptly.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default terraform binary. Override with a multi-word command line to use
/// a wrapper (`direnv exec . terraform`) or OpenTofu (`tofu`).
pub const DEFAULT_EXEC_PATH: &str = "terraform";

/// Errors from running the terraform binary.
///
/// `Failed` keeps the exit code so callers can match on terraform's
/// `plan -detailed-exitcode` convention (2 = changes present).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with code {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` cancelled")]
    Cancelled { command: String },
}

impl ExecError {
    /// Exit code of the child, when it ran and exited.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Failed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Captured output of a completed command.
#[derive(Debug, Default)]
pub struct ExecOutput {
    /// Raw stdout. Kept as bytes because `state pull` output is a state blob.
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ExecOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// A handle bound to `(dir, env, command line)`.
#[derive(Debug, Clone)]
pub struct Executor {
    dir: PathBuf,
    env: Vec<(String, String)>,
    /// Program plus wrapper-prefix arguments; terraform subcommand args are
    /// appended at run time.
    command_line: Vec<String>,
}

impl Executor {
    /// New executor in `dir` with a snapshot of the current process
    /// environment and the default `terraform` binary.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            env: std::env::vars().collect(),
            command_line: vec![DEFAULT_EXEC_PATH.to_string()],
        }
    }

    /// Replace the command line. A multi-word value is split on whitespace:
    /// the first word is the program, the rest become prefix arguments.
    pub fn with_exec_path(mut self, exec_path: &str) -> Self {
        let words: Vec<String> = exec_path.split_whitespace().map(str::to_string).collect();
        if !words.is_empty() {
            self.command_line = words;
        }
        self
    }

    /// Add an environment variable (e.g. `TF_WORKSPACE` for Terraform Cloud).
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.retain(|(k, _)| k != key);
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn command_string(&self, args: &[String]) -> String {
        let mut words = self.command_line.clone();
        words.extend(args.iter().cloned());
        words.join(" ")
    }

    fn build_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.command_line[0]);
        cmd.args(&self.command_line[1..])
            .args(args)
            .current_dir(&self.dir)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run and capture output. Non-zero exit becomes [`ExecError::Failed`]
    /// carrying the exit code and captured stderr.
    pub async fn run(&self, ctx: &CancellationToken, args: &[String]) -> Result<ExecOutput, ExecError> {
        let command = self.command_string(args);
        debug!("[exec@{}] run: {}", self.dir.display(), command);

        let child = self
            .build_command(args)
            .spawn()
            .map_err(|source| ExecError::Spawn { command: command.clone(), source })?;

        let output = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                // Dropping the wait future drops the child; kill_on_drop reaps it.
                warn!("[exec@{}] cancelled: {}", self.dir.display(), command);
                return Err(ExecError::Cancelled { command });
            }
            out = child.wait_with_output() => {
                out.map_err(|source| ExecError::Io { command: command.clone(), source })?
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(ExecError::Failed {
                command,
                code: output.status.code(),
                stderr,
            });
        }

        Ok(ExecOutput { stdout: output.stdout, stderr })
    }

    /// Run with child stdout/stderr pumped line-by-line into the log as they
    /// arrive. Used for long operations (`apply`) where buffering the output
    /// until exit would hide progress.
    pub async fn run_streaming(&self, ctx: &CancellationToken, args: &[String]) -> Result<(), ExecError> {
        let command = self.command_string(args);
        debug!("[exec@{}] run (streaming): {}", self.dir.display(), command);

        let mut child = self
            .build_command(args)
            .spawn()
            .map_err(|source| ExecError::Spawn { command: command.clone(), source })?;

        let stdout = child.stdout.take().ok_or_else(|| ExecError::Io {
            command: command.clone(),
            source: std::io::Error::other("failed to capture stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ExecError::Io {
            command: command.clone(),
            source: std::io::Error::other("failed to capture stderr"),
        })?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stderr_buf = String::new();

        let mut stdout_done = false;
        let mut stderr_done = false;

        while !stdout_done || !stderr_done {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    warn!("[exec@{}] cancelled: {}", self.dir.display(), command);
                    let _ = child.start_kill();
                    return Err(ExecError::Cancelled { command });
                }
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(line)) => info!("[exec@{}] {}", self.dir.display(), line),
                        Ok(None) => stdout_done = true,
                        Err(_) => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(line)) => {
                            warn!("[exec@{}] {}", self.dir.display(), line);
                            stderr_buf.push_str(&line);
                            stderr_buf.push('\n');
                        }
                        Ok(None) => stderr_done = true,
                        Err(_) => stderr_done = true,
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|source| ExecError::Io { command: command.clone(), source })?;

        if !status.success() {
            return Err(ExecError::Failed {
                command,
                code: status.code(),
                stderr: stderr_buf,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn run_captures_stdout() {
        let exec = Executor::new(".").with_exec_path("echo");
        let out = exec.run(&token(), &["hello".to_string()]).await.unwrap();
        assert_eq!(out.stdout_str().trim(), "hello");
    }

    #[tokio::test]
    async fn run_surfaces_exit_code_and_stderr() {
        let exec = Executor::new(".").with_exec_path("sh -c");
        let err = exec
            .run(&token(), &["echo oops >&2; exit 2".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        match err {
            ExecError::Failed { stderr, .. } => assert!(stderr.contains("oops")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn run_spawn_failure_has_no_exit_code() {
        let exec = Executor::new(".").with_exec_path("definitely-not-a-real-binary-1234");
        let err = exec.run(&token(), &[]).await.unwrap_err();
        assert_eq!(err.exit_code(), None);
    }

    #[tokio::test]
    async fn cancellation_terminates_child() {
        let exec = Executor::new(".").with_exec_path("sleep");
        let ctx = token();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = exec.run(&ctx, &["30".to_string()]).await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn with_env_overrides_inherited_value() {
        let exec = Executor::new(".")
            .with_exec_path("sh -c")
            .with_env("TF_WORKSPACE", "staging");
        let out = exec
            .run(&token(), &["printf %s \"$TF_WORKSPACE\"".to_string()])
            .await
            .unwrap();
        assert_eq!(out.stdout_str(), "staging");
    }
}

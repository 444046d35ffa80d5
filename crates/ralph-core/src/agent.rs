//! Spawns the configured coding-agent subprocess, enforces the
//! per-iteration timeout, and is cancellable at every suspension point.
//!
//! The agent is polymorphic over backends (Claude Code, opencode, ...) but
//! every backend reduces to the same capability set: spawn with args,
//! receive a prompt, produce edits in the working tree, log to
//! stdout/stderr, exit with a code. That capability set is the [`Harness`]
//! trait; the Loop Engine only ever talks to `dyn Harness`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::prompt::Prompt;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent timed out")]
    TimedOut,

    #[error("agent run was cancelled")]
    Cancelled,

    #[error("failed to spawn agent: {0}")]
    Spawn(String),

    #[error("agent exited non-zero")]
    NonZeroExit { code: Option<i32> },
}

/// How an agent run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRunResult {
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
}

/// Capability set every agent backend must implement. Object-safe so it can
/// be stored as `Box<dyn Harness>` and swapped without the Loop Engine
/// knowing which backend it is driving.
#[async_trait]
pub trait Harness: Send + Sync {
    /// Human-readable name (used for the per-agent log subdirectory).
    fn name(&self) -> &str;

    /// Run one full agent invocation to completion (or timeout/cancel),
    /// writing combined stdout/stderr to `log_path`.
    async fn run(
        &self,
        prompt: &Prompt,
        repo_root: &Path,
        log_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AgentRunResult, AgentError>;
}

/// A [`Harness`] backed by an arbitrary subprocess, configured with
/// `agent.command[]` / `agent.args[]`. This is the only harness shipped
/// in-core; other backends are just a different `command`/`args` pair
/// unless they need bespoke event parsing, which is out of scope here --
/// the core only needs exit code + captured output.
pub struct ProcessHarness {
    name: String,
    command: String,
    args: Vec<String>,
}

impl ProcessHarness {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
        }
    }
}

#[async_trait]
impl Harness for ProcessHarness {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        prompt: &Prompt,
        repo_root: &Path,
        log_path: &Path,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<AgentRunResult, AgentError> {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(repo_root)
            .env("RALPH_SYSTEM_PROMPT", &prompt.system)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            // Put the agent in its own process group so a timeout/cancel
            // can signal it and every grandchild it spawned.
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{} {}: {e}", self.command, self.args.join(" "))))?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(prompt.user.as_bytes()).await;
            drop(stdin);
        }

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_output = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            if let Some(ref mut p) = stdout_pipe {
                let _ = p.read_to_end(&mut out).await;
            }
            if let Some(ref mut p) = stderr_pipe {
                let _ = p.read_to_end(&mut err).await;
            }
            (out, err)
        };

        let pid = child.id();

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                kill_process_tree(pid).await;
                let _ = child.wait().await;
                Err(AgentError::Cancelled)
            }

            result = tokio::time::timeout(timeout, async {
                let (wait_result, (stdout, stderr)) = tokio::join!(child.wait(), read_output);
                (wait_result, stdout, stderr)
            }) => {
                match result {
                    Ok((Ok(status), stdout, stderr)) => {
                        write_log(log_path, &stdout, &stderr);
                        Ok(AgentRunResult { exit_code: status.code(), log_path: log_path.to_path_buf() })
                    }
                    Ok((Err(e), _, _)) => Err(AgentError::Spawn(e.to_string())),
                    Err(_elapsed) => {
                        kill_process_tree(pid).await;
                        let _ = child.wait().await;
                        Err(AgentError::TimedOut)
                    }
                }
            }
        }
    }
}

fn write_log(log_path: &Path, stdout: &[u8], stderr: &[u8]) {
    let mut combined = Vec::with_capacity(stdout.len() + stderr.len() + 32);
    combined.extend_from_slice(b"--- stdout ---\n");
    combined.extend_from_slice(stdout);
    combined.extend_from_slice(b"\n--- stderr ---\n");
    combined.extend_from_slice(stderr);
    let _ = std::fs::write(log_path, combined);
}

/// SIGTERM the process group, give it a grace period, then SIGKILL.
/// Non-unix platforms fall back to killing just the direct child (no
/// process-group API available).
async fn kill_process_tree(pid: Option<u32>) {
    let Some(pid) = pid else { return };

    #[cfg(unix)]
    {
        let pgid = -(pid as i32);
        unsafe {
            libc::kill(pgid, libc::SIGTERM);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        unsafe {
            libc::kill(pgid, libc::SIGKILL);
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

//! Process runner for `git` and `gh`
//!
//! Runs both CLIs in the repository checkout and turns failures into
//! [`GitHostError`]s the managers can reason about (conflict, refused,
//! plain failure).

use std::path::{Path, PathBuf};
use std::process::Output;

use coordination::RetryPolicy;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GitHostError, GitHostResult};

/// Committer identity used for merge commits the scheduler writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

pub struct GitCli {
    working_dir: PathBuf,
    remote: String,
    identity: Option<CommitIdentity>,
    retry: RetryPolicy,
}

impl GitCli {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            remote: "origin".to_string(),
            identity: None,
            retry: RetryPolicy::git(),
        }
    }

    pub fn with_identity(mut self, identity: CommitIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// `origin/<branch>`
    pub fn tracking(&self, branch: &str) -> String {
        format!("{}/{}", self.remote, branch)
    }

    fn git_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        cmd.args(args).current_dir(&self.working_dir);
        cmd
    }

    async fn output_of(mut cmd: Command, label: &str) -> GitHostResult<Output> {
        debug!(command = %label, "running");
        cmd.output().await.map_err(|source| GitHostError::Spawn {
            command: label.to_string(),
            source,
        })
    }

    /// Run git and hand back the raw output, whatever the exit code.
    pub async fn git_output(&self, args: &[&str]) -> GitHostResult<Output> {
        let label = format!("git {}", args.join(" "));
        Self::output_of(self.git_command(args), &label).await
    }

    /// Run git, returning trimmed stdout on success.
    pub async fn git(&self, args: &[&str]) -> GitHostResult<String> {
        let label = format!("git {}", args.join(" "));
        let output = Self::output_of(self.git_command(args), &label).await?;
        check(label, output)
    }

    /// Run git with backoff for lock-file and network hiccups.
    pub async fn git_with_retry(&self, args: &[&str]) -> GitHostResult<String> {
        let mut attempt = 0;
        loop {
            match self.git(args).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Transient git failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run gh, returning trimmed stdout on success.
    pub async fn gh(&self, args: &[&str]) -> GitHostResult<String> {
        let label = format!("gh {}", args.join(" "));
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.working_dir);
        let output = Self::output_of(cmd, &label).await?;
        check(label, output)
    }
}

fn check(label: String, output: Output) -> GitHostResult<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(classify_failure(label, output.status.code(), &stdout, &stderr))
}

/// Map a failed command onto the error kinds the managers branch on.
pub fn classify_failure(
    command: String,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> GitHostError {
    let stderr = stderr.trim().to_string();
    let lower = stderr.to_lowercase();

    if stderr.contains("HTTP 403")
        || lower.contains("permission denied")
        || lower.contains("resource not accessible")
    {
        return GitHostError::PermissionDenied { command, stderr };
    }
    if stdout.contains("CONFLICT")
        || stderr.contains("CONFLICT")
        || lower.contains("automatic merge failed")
    {
        let detail = if stderr.is_empty() {
            stdout.trim().to_string()
        } else {
            stderr
        };
        return GitHostError::Conflict {
            command,
            stderr: detail,
        };
    }
    GitHostError::CommandFailed {
        command,
        code,
        stderr,
    }
}

//! Scheduler error types
//!
//! Two error kinds carry scheduling meaning: [`BranchError`] stops the
//! tick, [`MergeError`] is retried unless the host refused on
//! permissions. The rest are collaborator errors that managers either
//! propagate into one of those two or turn into an `Outcome`.

use std::path::PathBuf;

use coordination::retry::is_permission_denied_message;
use thiserror::Error;

/// Result type alias for git host operations
pub type GitHostResult<T> = Result<T, GitHostError>;

/// Failures talking to git or the PR host.
#[derive(Error, Debug)]
pub enum GitHostError {
    /// Process ran and exited non-zero
    #[error("`{command}` failed (exit {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A merge stopped on conflicts
    #[error("`{command}` hit merge conflicts: {stderr}")]
    Conflict { command: String, stderr: String },

    /// Host refused the operation (HTTP 403 / permission denied)
    #[error("`{command}` was refused: {stderr}")]
    PermissionDenied { command: String, stderr: String },

    /// Process could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Output could not be parsed
    #[error("could not parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl GitHostError {
    pub fn command_failed(
        command: impl Into<String>,
        code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            code,
            stderr: stderr.into(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// What the failing tool printed, without the command line.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { stderr, .. }
            | Self::Conflict { stderr, .. }
            | Self::PermissionDenied { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether another attempt might succeed (lock files, flaky remotes).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CommandFailed { stderr, .. } => {
                coordination::retry::is_transient_git_message(stderr)
            }
            _ => false,
        }
    }
}

/// Integration-branch lifecycle failure. Fatal to the current tick.
#[derive(Error, Debug)]
#[error("branch operation '{operation}' on '{branch}' failed: {source}")]
pub struct BranchError {
    pub operation: &'static str,
    pub branch: String,
    #[source]
    pub source: GitHostError,
}

impl BranchError {
    pub fn new(operation: &'static str, branch: impl Into<String>, source: GitHostError) -> Self {
        Self {
            operation,
            branch: branch.into(),
            source,
        }
    }
}

/// A single PR merge attempt failed.
#[derive(Error, Debug, Clone)]
#[error("merge of PR #{pr_number} failed: {message}")]
pub struct MergeError {
    pub pr_number: u64,
    pub message: String,
    /// Decided once at construction; never re-derived from `message`.
    pub permission_denied: bool,
}

impl MergeError {
    /// Error from free text. The whole text is checked for a refusal.
    pub fn new(pr_number: u64, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            pr_number,
            permission_denied: is_permission_denied_message(&message),
            message,
        }
    }

    /// Structured variant first; otherwise only the tool's stderr is
    /// checked, so command labels (PR numbers, repo names) cannot read
    /// as a refusal.
    pub fn from_host(pr_number: u64, err: &GitHostError) -> Self {
        let permission_denied = err.is_permission_denied()
            || err.stderr().is_some_and(is_permission_denied_message);
        Self {
            pr_number,
            message: err.to_string(),
            permission_denied,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.permission_denied
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_permission_denied()
    }
}

/// Agent session API failures.
#[derive(Error, Debug)]
pub enum SessionApiError {
    #[error("session API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("session API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode session API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("session API key not configured (set SESSION_API_KEY)")]
    MissingApiKey,
}

impl SessionApiError {
    /// Gateway errors and timeouts are worth another try.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }
}

/// Sprint counter / reconciliation tracker storage failures.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("tracker file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracker file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

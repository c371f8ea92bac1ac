//! Git hosting collaborator
//!
//! Every git and PR-host call the managers make goes through
//! [`GitHost`]. Branch arguments are bare names (`jules`, `main`); the
//! implementation decides how they map onto remote-tracking refs.

use async_trait::async_trait;
use coordination::PullRequest;
use serde::Serialize;

use crate::error::GitHostResult;

/// Result of a no-commit three-way merge between two remote branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "trial", rename_all = "snake_case")]
pub enum MergeTrial {
    Clean,
    Conflict,
    /// The merge tool itself failed; says nothing about the branches.
    ToolError { code: Option<i32>, stderr: String },
}

/// Options for merging a remote branch into the local checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Needed the first time a branch with its own root meets trunk.
    pub allow_unrelated: bool,
    /// Resolve conflicting hunks in favour of the checked-out side.
    pub prefer_ours: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Rebase,
    Merge,
}

impl MergeMethod {
    pub fn flag(self) -> &'static str {
        match self {
            Self::Rebase => "--rebase",
            Self::Merge => "--merge",
        }
    }
}

/// Where a pushed ref should point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSource<'a> {
    /// Current tip of a remote branch.
    Branch(&'a str),
    /// A specific commit.
    Commit(&'a str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrState {
    #[default]
    Open,
    All,
}

impl PrState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrQuery {
    pub state: PrState,
    pub head: Option<String>,
    pub base: Option<String>,
    pub limit: Option<u32>,
}

impl PrQuery {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn any_state() -> Self {
        Self {
            state: PrState::All,
            ..Self::default()
        }
    }

    pub fn head(mut self, head: &str) -> Self {
        self.head = Some(head.to_string());
        self
    }

    pub fn base(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait GitHost: Send + Sync {
    /// Refresh remote-tracking refs.
    async fn fetch(&self) -> GitHostResult<()>;

    async fn remote_branch_exists(&self, branch: &str) -> GitHostResult<bool>;

    /// Commit SHA at the tip of a remote branch.
    async fn resolve_remote(&self, branch: &str) -> GitHostResult<String>;

    /// Force-create or move `branch` on the remote.
    async fn push_ref(&self, source: RefSource<'_>, branch: &str) -> GitHostResult<()>;

    async fn delete_remote_branch(&self, branch: &str) -> GitHostResult<()>;

    /// Merge `theirs` into `ours` without writing a commit or touching
    /// the work tree.
    async fn merge_trial(&self, ours: &str, theirs: &str) -> GitHostResult<MergeTrial>;

    /// Reset the local `branch` to its remote tip and check it out.
    async fn checkout_remote(&self, branch: &str) -> GitHostResult<()>;

    /// Check out a PR's head branch locally.
    async fn checkout_pr(&self, number: u64) -> GitHostResult<()>;

    /// Merge a remote branch into the current checkout.
    async fn merge_into_checkout(&self, source: &str, options: MergeOptions) -> GitHostResult<()>;

    /// Push the current checkout to `branch` on the remote.
    async fn push_checkout(&self, branch: &str) -> GitHostResult<()>;

    /// `None` when the two branches share no history.
    async fn merge_base(&self, a: &str, b: &str) -> GitHostResult<Option<String>>;

    /// Commits reachable from `head` but not `base`.
    async fn count_commits(&self, base: &str, head: &str) -> GitHostResult<u64>;

    /// Paths whose content differs between the two branch tips.
    async fn changed_paths(&self, base: &str, head: &str) -> GitHostResult<Vec<String>>;

    async fn list_pull_requests(&self, query: &PrQuery) -> GitHostResult<Vec<PullRequest>>;

    async fn pull_request(&self, number: u64) -> GitHostResult<PullRequest>;

    async fn pull_request_files(&self, number: u64) -> GitHostResult<Vec<String>>;

    /// Unified diff text of a PR.
    async fn pull_request_diff(&self, number: u64) -> GitHostResult<String>;

    /// Returns the new PR number.
    async fn create_pull_request(&self, pr: &NewPullRequest) -> GitHostResult<u64>;

    async fn retarget_pull_request(&self, number: u64, base: &str) -> GitHostResult<()>;

    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> GitHostResult<()>;

    async fn mark_ready(&self, number: u64) -> GitHostResult<()>;
}

//! Pull request triage and merging.
//!
//! Agent PRs land on the integration branch oldest first. A PR merges
//! only when the green gate passes; a failed merge is auto-resolved when
//! the PR touches nothing but the metadata directory, and escalated as a
//! [`ConflictedPr`] otherwise. Conflicts are always returned to the
//! caller, never dropped.

use std::sync::Arc;

use coordination::naming;
use coordination::{
    classify_conflict, extract_session_id, green_verdict, AgentPrFilter, ConflictClass, Outcome,
    PullRequest, RetryPolicy, SessionState,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{GitHostError, GitHostResult, MergeError};
use crate::git_host::{GitHost, MergeMethod, MergeOptions, NewPullRequest, PrQuery};
use crate::session_api::SessionApi;

/// An agent PR that could not be merged and needs a human or a
/// remediation session.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictedPr {
    pub pr: PullRequest,
    pub error: String,
}

pub struct PrManager {
    git: Arc<dyn GitHost>,
    sessions: Arc<dyn SessionApi>,
    filter: AgentPrFilter,
    trunk: String,
    metadata_dir: String,
    merge_retry: RetryPolicy,
}

impl PrManager {
    pub fn new(
        git: Arc<dyn GitHost>,
        sessions: Arc<dyn SessionApi>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            git,
            sessions,
            filter: config.agent_pr_filter(),
            trunk: config.trunk_branch.clone(),
            metadata_dir: config.metadata_dir.clone(),
            merge_retry: RetryPolicy::merge(),
        }
    }

    pub fn with_merge_retry(mut self, policy: RetryPolicy) -> Self {
        self.merge_retry = policy;
        self
    }

    fn integration_branch(&self) -> &str {
        &self.filter.integration_branch
    }

    pub fn is_green(&self, pr: &PullRequest) -> bool {
        coordination::is_green(pr)
    }

    /// Merge a PR into the integration branch, retrying with backoff.
    ///
    /// Permission failures are returned after the first attempt.
    pub async fn merge_pr(&self, pr_number: u64) -> Result<(), MergeError> {
        let mut retry = 0;
        loop {
            match self.merge_once(pr_number).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && retry < self.merge_retry.max_retries => {
                    let delay = self.merge_retry.delay_for(retry);
                    warn!(
                        pr = pr_number,
                        attempt = retry + 1,
                        max_retries = self.merge_retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Merge failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    if e.is_permission_denied() {
                        warn!(pr = pr_number, "Merge refused by host; not retrying");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Retarget, then rebase-merge, falling back to a merge commit.
    async fn merge_once(&self, pr_number: u64) -> Result<(), MergeError> {
        self.git
            .retarget_pull_request(pr_number, self.integration_branch())
            .await
            .map_err(|e| MergeError::from_host(pr_number, &e))?;

        let rebase_err = match self
            .git
            .merge_pull_request(pr_number, MergeMethod::Rebase, true)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        debug!(pr = pr_number, "Rebase merge failed, falling back to merge commit: {rebase_err}");

        match self
            .git
            .merge_pull_request(pr_number, MergeMethod::Merge, true)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut err = MergeError::from_host(pr_number, &e);
                err.permission_denied |=
                    MergeError::from_host(pr_number, &rebase_err).is_permission_denied();
                Err(err)
            }
        }
    }

    /// Walk every open agent PR against the integration branch, oldest
    /// first, merging the green ones.
    ///
    /// Only a failure to list PRs is an error; per-PR problems are logged
    /// and the walk moves on.
    pub async fn reconcile_all_prs(
        &self,
        dry_run: bool,
    ) -> Result<Vec<ConflictedPr>, GitHostError> {
        let listed = self
            .git
            .list_pull_requests(&PrQuery::open().base(self.integration_branch()))
            .await?;
        let candidates = self.filter.select(listed);
        if candidates.is_empty() {
            info!("No agent PRs to reconcile");
            return Ok(Vec::new());
        }
        info!(count = candidates.len(), dry_run, "Reconciling agent PRs");

        let mut conflicts = Vec::new();
        for pr in candidates {
            if let Some(conflict) = self.reconcile_pr(pr, dry_run).await {
                conflicts.push(conflict);
            }
        }

        if !conflicts.is_empty() {
            warn!(count = conflicts.len(), "Agent PRs need conflict resolution");
        }
        Ok(conflicts)
    }

    async fn reconcile_pr(&self, pr: PullRequest, dry_run: bool) -> Option<ConflictedPr> {
        let number = pr.number;

        if pr.is_draft && !self.promote_draft(&pr, dry_run).await {
            return None;
        }

        let details = match self.git.pull_request(number).await {
            Ok(details) => details,
            Err(e) => {
                warn!(pr = number, "Could not refresh PR details, skipping: {e}");
                return None;
            }
        };

        let verdict = green_verdict(&details);
        if !verdict.is_green() {
            info!(pr = number, head = %details.head_ref, %verdict, "Not green yet");
            return None;
        }

        if dry_run {
            info!(dry_run = true, pr = number, %verdict, "Would merge into integration branch");
            return None;
        }

        let merge_err = match self.merge_pr(number).await {
            Ok(()) => {
                info!(pr = number, head = %details.head_ref, "Merged into integration branch");
                return None;
            }
            Err(e) => e,
        };

        let files = match self.git.pull_request_files(number).await {
            Ok(files) => files,
            Err(e) => {
                warn!(pr = number, "Could not list PR files: {e}");
                Vec::new()
            }
        };

        match classify_conflict(&files, &self.metadata_dir) {
            ConflictClass::MetadataOnly => match self.auto_resolve(&details).await {
                Ok(()) => {
                    info!(pr = number, "Resolved metadata-only conflict and merged");
                    None
                }
                Err(e) => {
                    warn!(pr = number, "Metadata-only auto-resolve failed: {e}");
                    Some(ConflictedPr {
                        pr: details,
                        error: e.to_string(),
                    })
                }
            },
            ConflictClass::Escalate => {
                warn!(pr = number, files = files.len(), "Merge failed, escalating: {merge_err}");
                Some(ConflictedPr {
                    pr: details,
                    error: merge_err.to_string(),
                })
            }
        }
    }

    /// `true` when a draft may go on to the green gate: its session has
    /// completed and the PR was marked ready.
    async fn promote_draft(&self, pr: &PullRequest, dry_run: bool) -> bool {
        let Some(session_id) = extract_session_id(&pr.head_ref, pr.body_text()) else {
            debug!(pr = pr.number, "Draft with no linked session, skipping");
            return false;
        };

        let session = match self.sessions.get_session(&session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(pr = pr.number, session = %session_id, "Session lookup failed, skipping draft: {e}");
                return false;
            }
        };
        if session.state != SessionState::Completed {
            debug!(pr = pr.number, session = %session_id, state = %session.state, "Draft still in progress");
            return false;
        }

        if dry_run {
            info!(dry_run = true, pr = pr.number, "Would mark draft ready");
            return true;
        }
        match self.git.mark_ready(pr.number).await {
            Ok(()) => {
                info!(pr = pr.number, session = %session_id, "Session completed, marked PR ready");
                true
            }
            Err(e) => {
                warn!(pr = pr.number, "Could not mark PR ready: {e}");
                false
            }
        }
    }

    /// Merge the integration branch into the PR preferring the PR's side,
    /// push, then merge with a merge commit so history is kept.
    async fn auto_resolve(&self, pr: &PullRequest) -> GitHostResult<()> {
        self.git.checkout_pr(pr.number).await?;
        self.git
            .merge_into_checkout(
                self.integration_branch(),
                MergeOptions {
                    allow_unrelated: false,
                    prefer_ours: true,
                },
            )
            .await?;
        self.git.push_checkout(&pr.head_ref).await?;
        self.git
            .merge_pull_request(pr.number, MergeMethod::Merge, true)
            .await
    }

    /// Keep one open PR from the integration branch to trunk while the
    /// branch has anything trunk lacks.
    pub async fn ensure_integration_pr_exists(&self) -> Outcome<u64> {
        match self.open_integration_pr().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(branch = %self.integration_branch(), "Integration PR check failed: {e}");
                Outcome::recoverable(format!("integration PR: {e}"))
            }
        }
    }

    async fn open_integration_pr(&self) -> GitHostResult<Outcome<u64>> {
        let branch = self.integration_branch();
        let existing = self
            .git
            .list_pull_requests(&PrQuery::open().head(branch).base(&self.trunk))
            .await?;
        if let Some(pr) = existing.first() {
            debug!(pr = pr.number, "Integration PR already open");
            return Ok(Outcome::Done(pr.number));
        }

        // Unrelated histories have no meaningful commit count; changed
        // files stand in for it.
        let (ahead, unit) = match self.git.merge_base(&self.trunk, branch).await? {
            Some(_) => (self.git.count_commits(&self.trunk, branch).await?, "Commits"),
            None => (
                self.git.changed_paths(&self.trunk, branch).await?.len() as u64,
                "Changed files",
            ),
        };
        if ahead == 0 {
            return Ok(Outcome::skipped("integration branch has nothing new for trunk"));
        }

        let number = self
            .git
            .create_pull_request(&NewPullRequest {
                head: branch.to_string(),
                base: self.trunk.clone(),
                title: naming::integration_pr_title(branch, &self.trunk),
                body: naming::integration_pr_body(branch, &self.trunk, ahead, unit),
            })
            .await?;
        info!(pr = number, ahead, unit, "Opened integration PR");
        Ok(Outcome::Done(number))
    }
}

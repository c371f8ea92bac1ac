//! Which open PRs belong to the scheduler, and in what order to handle them.

use serde::{Deserialize, Serialize};

use crate::pull_request::PullRequest;
use crate::session::extract_session_id;

/// Logins the agent platform opens PRs under.
pub const DEFAULT_BOT_LOGINS: &[&str] = &[
    "google-labs-jules[bot]",
    "app/google-labs-jules",
    "google-labs-jules",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPrFilter {
    pub integration_branch: String,
    pub branch_prefix: String,
    pub bot_logins: Vec<String>,
}

impl AgentPrFilter {
    pub fn new(integration_branch: &str, branch_prefix: &str) -> Self {
        Self {
            integration_branch: integration_branch.to_string(),
            branch_prefix: branch_prefix.to_string(),
            bot_logins: DEFAULT_BOT_LOGINS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_bot_logins(mut self, logins: Vec<String>) -> Self {
        self.bot_logins = logins;
        self
    }

    /// Head branch follows `<prefix>-...`.
    pub fn follows_branch_convention(&self, head_ref: &str) -> bool {
        head_ref.starts_with(&format!("{}-", self.branch_prefix))
    }

    pub fn is_bot_author(&self, pr: &PullRequest) -> bool {
        pr.author_login()
            .is_some_and(|login| self.bot_logins.iter().any(|b| b == login))
    }

    /// Targets the integration branch, is not the integration branch
    /// itself, and is recognisably agent work.
    pub fn is_candidate(&self, pr: &PullRequest) -> bool {
        if pr.base_ref != self.integration_branch || pr.head_ref == self.integration_branch {
            return false;
        }
        self.is_bot_author(pr)
            || self.follows_branch_convention(&pr.head_ref)
            || extract_session_id(&pr.head_ref, pr.body_text()).is_some()
    }

    /// Candidates, oldest first. PRs without a timestamp go last.
    pub fn select(&self, prs: Vec<PullRequest>) -> Vec<PullRequest> {
        let mut selected: Vec<PullRequest> =
            prs.into_iter().filter(|pr| self.is_candidate(pr)).collect();
        selected.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.number.cmp(&b.number)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.number.cmp(&b.number),
        });
        selected
    }
}

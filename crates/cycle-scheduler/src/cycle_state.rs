//! Where the persona rotation stands, recovered from remote history.
//!
//! Nothing is persisted between ticks. The newest session whose PR sits
//! on an agent branch naming a persona decides the next persona.

use std::sync::Arc;

use coordination::{extract_session_id, CycleState, PersonaMatcher, PullRequest};
use tracing::{debug, info, warn};

use crate::error::SessionApiError;
use crate::git_host::{GitHost, PrQuery};
use crate::session_api::SessionApi;

/// Upper bound on PRs pulled for the any-state fallback.
const ANY_STATE_LIMIT: u32 = 200;

/// Finds the PR an agent session produced.
///
/// Open PRs are listed on first use, PRs in any state only when an open
/// one is not found, and each list at most once. Listing failures read as
/// "no PR".
pub struct SessionPrLookup<'a> {
    git: &'a dyn GitHost,
    open: Option<Vec<PullRequest>>,
    any_state: Option<Vec<PullRequest>>,
}

impl<'a> SessionPrLookup<'a> {
    pub fn new(git: &'a dyn GitHost) -> Self {
        Self {
            git,
            open: None,
            any_state: None,
        }
    }

    pub async fn find(&mut self, session_id: &str) -> Option<PullRequest> {
        if self.open.is_none() {
            self.open = Some(load(self.git, PrQuery::open()).await);
        }
        if let Some(pr) = find_in(self.open.as_deref(), session_id) {
            return Some(pr);
        }

        if self.any_state.is_none() {
            self.any_state = Some(load(self.git, PrQuery::any_state().limit(ANY_STATE_LIMIT)).await);
        }
        find_in(self.any_state.as_deref(), session_id)
    }
}

async fn load(git: &dyn GitHost, query: PrQuery) -> Vec<PullRequest> {
    match git.list_pull_requests(&query).await {
        Ok(prs) => prs,
        Err(e) => {
            warn!(state = query.state.as_str(), "Could not list PRs for session lookup: {e}");
            Vec::new()
        }
    }
}

fn find_in(prs: Option<&[PullRequest]>, session_id: &str) -> Option<PullRequest> {
    prs?.iter()
        .find(|pr| extract_session_id(&pr.head_ref, pr.body_text()).as_deref() == Some(session_id))
        .cloned()
}

pub struct CycleStateManager {
    git: Arc<dyn GitHost>,
    sessions: Arc<dyn SessionApi>,
    matcher: PersonaMatcher,
    branch_prefix: String,
}

impl CycleStateManager {
    pub fn new(
        git: Arc<dyn GitHost>,
        sessions: Arc<dyn SessionApi>,
        matcher: PersonaMatcher,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            git,
            sessions,
            matcher,
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn matcher(&self) -> &PersonaMatcher {
        &self.matcher
    }

    fn is_agent_branch(&self, head_ref: &str) -> bool {
        head_ref
            .to_lowercase()
            .starts_with(&format!("{}-", self.branch_prefix.to_lowercase()))
    }

    pub async fn compute_state(&self) -> Result<CycleState, SessionApiError> {
        let mut sessions = self.sessions.list_sessions().await?;
        // Newest first; sessions without a timestamp sort last.
        sessions.sort_by(|a, b| b.create_time.cmp(&a.create_time));

        let mut lookup = SessionPrLookup::new(self.git.as_ref());
        for session in &sessions {
            if session.id.is_empty() {
                continue;
            }
            let Some(pr) = lookup.find(&session.id).await else {
                continue;
            };
            if !self.is_agent_branch(&pr.head_ref) {
                debug!(session = %session.id, head = %pr.head_ref, "PR is not on an agent branch");
                continue;
            }
            let Some(persona) = self.matcher.match_branch(&pr.head_ref) else {
                continue;
            };

            let (next_index, should_increment_sprint) = self.matcher.advance(persona);
            let state = CycleState {
                last_session_id: Some(session.id.clone()),
                last_persona_id: Some(persona.to_string()),
                next_persona_id: self.matcher.personas()[next_index].clone(),
                next_persona_index: next_index,
                should_increment_sprint,
                base_pr_number: Some(pr.number),
            };
            info!(
                last_session = %session.id,
                last_persona = persona,
                next_persona = %state.next_persona_id,
                next_index,
                should_increment_sprint,
                pr = pr.number,
                "Recovered cycle position"
            );
            return Ok(state);
        }

        info!(sessions = sessions.len(), "No persona history, starting rotation fresh");
        Ok(self.matcher.fresh_state())
    }
}

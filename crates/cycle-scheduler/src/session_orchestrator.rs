//! Agent session creation and nudging.
//!
//! At most one live session per persona: an active session whose title
//! names the persona is reused instead of starting another.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use coordination::{Outcome, SessionState};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cycle_state::SessionPrLookup;
use crate::error::SessionApiError;
use crate::git_host::GitHost;
use crate::session_api::{SessionApi, SessionRequest};

pub const NUDGE_MESSAGE: &str =
    "Please make the best decision possible and proceed autonomously to complete the task.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "session", content = "id", rename_all = "snake_case")]
pub enum SessionStart {
    Reused(String),
    Created(String),
    DryRun,
}

impl SessionStart {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Reused(id) | Self::Created(id) => Some(id),
            Self::DryRun => None,
        }
    }
}

/// Whether the caller should give up on a session or keep waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckVerdict {
    Skip,
    KeepWaiting,
}

pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionApi>,
    git: Arc<dyn GitHost>,
    stuck_timeout: Duration,
    dry_run: bool,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionApi>,
        git: Arc<dyn GitHost>,
        stuck_timeout: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            sessions,
            git,
            stuck_timeout,
            dry_run,
        }
    }

    /// Reuse the persona's live session or start a new one.
    ///
    /// A failed lookup of existing sessions is logged and creation goes
    /// ahead.
    pub async fn create_session(
        &self,
        persona_id: &str,
        request: &SessionRequest,
    ) -> Result<SessionStart, SessionApiError> {
        if self.dry_run {
            info!(dry_run = true, persona = persona_id, title = %request.title, "Would start session");
            return Ok(SessionStart::DryRun);
        }

        match self.sessions.list_sessions().await {
            Ok(sessions) => {
                if let Some(live) = sessions.iter().find(|s| s.is_reusable_for(persona_id)) {
                    info!(persona = persona_id, session = %live.id, state = %live.state, "Reusing live session");
                    return Ok(SessionStart::Reused(live.id.clone()));
                }
            }
            Err(e) => warn!(persona = persona_id, "Could not list sessions, creating a new one: {e}"),
        }

        let session = self.sessions.create_session(request).await?;
        info!(persona = persona_id, session = %session.id, branch = %request.starting_branch, "Created session");
        Ok(SessionStart::Created(session.id))
    }

    /// Decide what to do about a session that has not produced a PR.
    ///
    /// Sessions waiting on a plan approval or on feedback are unblocked.
    /// Remote failures never escalate; the session is simply waited on.
    pub async fn handle_stuck_session(
        &self,
        session_id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> StuckVerdict {
        if self.dry_run {
            return StuckVerdict::KeepWaiting;
        }

        let session = match self.sessions.get_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session = session_id, "Session lookup failed: {e}");
                return StuckVerdict::KeepWaiting;
            }
        };

        let elapsed = created_at
            .or(session.create_time)
            .and_then(|at| (Utc::now() - at).to_std().ok());
        let timed_out = elapsed.is_some_and(|e| e > self.stuck_timeout);

        match session.state {
            SessionState::InProgress | SessionState::Completed | SessionState::Failed
                if timed_out =>
            {
                warn!(
                    session = session_id,
                    state = %session.state,
                    elapsed_mins = elapsed.map(|e| e.as_secs() / 60),
                    "Session exceeded timeout, skipping"
                );
                StuckVerdict::Skip
            }
            SessionState::AwaitingPlanApproval => {
                match self.sessions.approve_plan(session_id).await {
                    Ok(()) => info!(session = session_id, "Approved pending plan"),
                    Err(e) => warn!(session = session_id, "Plan approval failed: {e}"),
                }
                StuckVerdict::KeepWaiting
            }
            SessionState::AwaitingUserFeedback => {
                match self.sessions.send_message(session_id, NUDGE_MESSAGE).await {
                    Ok(()) => info!(session = session_id, "Nudged session awaiting feedback"),
                    Err(e) => warn!(session = session_id, "Nudge failed: {e}"),
                }
                StuckVerdict::KeepWaiting
            }
            state => {
                debug!(session = session_id, %state, "Waiting on session");
                StuckVerdict::KeepWaiting
            }
        }
    }

    /// Poll until the session's PR shows up, unblocking the session
    /// between polls. Gives up when the session is judged stuck or polls
    /// run out.
    pub async fn wait_for_pr(
        &self,
        session_id: &str,
        created_at: Option<DateTime<Utc>>,
        poll: Duration,
        max_polls: u32,
    ) -> Outcome<u64> {
        for attempt in 1..=max_polls {
            let mut lookup = SessionPrLookup::new(self.git.as_ref());
            if let Some(pr) = lookup.find(session_id).await {
                info!(session = session_id, pr = pr.number, attempt, "Session PR found");
                return Outcome::Done(pr.number);
            }

            if self.handle_stuck_session(session_id, created_at).await == StuckVerdict::Skip {
                return Outcome::skipped(format!("session {session_id} is stuck"));
            }

            if attempt < max_polls {
                tokio::time::sleep(poll).await;
            }
        }
        Outcome::skipped(format!(
            "no PR for session {session_id} after {max_polls} polls"
        ))
    }
}

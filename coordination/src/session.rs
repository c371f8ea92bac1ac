//! Agent session model and session-id recovery
//!
//! Sessions live in the remote agent API. The scheduler never stores
//! them; it links a PR back to its session by pulling the session id out
//! of the PR head branch or body.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the agent API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Queued,
    Planning,
    InProgress,
    AwaitingPlanApproval,
    AwaitingUserFeedback,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl SessionState {
    /// Terminal sessions will never produce more work.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Deleted
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Planning => "PLANNING",
            Self::InProgress => "IN_PROGRESS",
            Self::AwaitingPlanApproval => "AWAITING_PLAN_APPROVAL",
            Self::AwaitingUserFeedback => "AWAITING_USER_FEEDBACK",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Deleted => "DELETED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

fn unknown_state() -> SessionState {
    SessionState::Unknown
}

/// A session as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSessionWire", into = "RawSessionWire")]
pub struct AgentSession {
    /// Bare id, i.e. the last segment of `sessions/<id>`.
    pub id: String,
    pub title: String,
    pub state: SessionState,
    pub create_time: Option<DateTime<Utc>>,
}

/// Wire shape used for both directions of (de)serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSessionWire {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default = "unknown_state")]
    state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_time: Option<DateTime<Utc>>,
}

impl From<RawSessionWire> for AgentSession {
    fn from(raw: RawSessionWire) -> Self {
        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| session_id_from_name(&raw.name).to_string());
        Self {
            id,
            title: raw.title,
            state: raw.state,
            create_time: raw.create_time,
        }
    }
}

impl From<AgentSession> for RawSessionWire {
    fn from(session: AgentSession) -> Self {
        Self {
            name: format!("sessions/{}", session.id),
            id: Some(session.id),
            title: session.title,
            state: session.state,
            create_time: session.create_time,
        }
    }
}

impl AgentSession {
    pub fn new(id: impl Into<String>, title: impl Into<String>, state: SessionState) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state,
            create_time: None,
        }
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.create_time = Some(at);
        self
    }

    /// Active sessions titled for `persona_id` can be reused instead of
    /// starting a second one.
    pub fn is_reusable_for(&self, persona_id: &str) -> bool {
        !self.state.is_terminal() && self.title.contains(persona_id)
    }
}

/// `sessions/123` → `123`. Bare ids pass through.
pub fn session_id_from_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

static BRANCH_NUMERIC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d{15,})$").expect("valid regex"));
static BRANCH_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$")
        .expect("valid regex")
});
static BODY_TASK_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"jules\.google\.com/task/(\d+)").expect("valid regex"));
static BODY_TASK_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/task/([a-zA-Z0-9-]+)").expect("valid regex"));
static BODY_SESSION_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/sessions?/([a-zA-Z0-9-]+)").expect("valid regex"));

/// Recover the agent session id behind a PR.
///
/// Branch conventions win over body links: a long numeric suffix, then a
/// trailing UUID; only then the body is searched for a task or session URL.
pub fn extract_session_id(head_ref: &str, body: &str) -> Option<String> {
    let branch_patterns: [&Regex; 2] = [&BRANCH_NUMERIC_ID, &BRANCH_UUID];
    let body_patterns: [&Regex; 3] = [&BODY_TASK_URL, &BODY_TASK_PATH, &BODY_SESSION_PATH];

    branch_patterns
        .iter()
        .find_map(|re| re.captures(head_ref))
        .or_else(|| {
            if body.is_empty() {
                return None;
            }
            body_patterns.iter().find_map(|re| re.captures(body))
        })
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_branch_suffix() {
        assert_eq!(
            extract_session_id("refactor/windowing-by-bytes-6277226227732204550", ""),
            Some("6277226227732204550".to_string())
        );
    }

    #[test]
    fn test_short_numeric_suffix_is_not_an_id() {
        assert_eq!(extract_session_id("jules-curator-42", ""), None);
    }

    #[test]
    fn test_uuid_branch_suffix() {
        let branch = "jules-janitor-3f2b8c1e-1a2b-4c3d-8e9f-0a1b2c3d4e5f";
        assert_eq!(
            extract_session_id(branch, "").as_deref(),
            Some("3f2b8c1e-1a2b-4c3d-8e9f-0a1b2c3d4e5f")
        );
    }

    #[test]
    fn test_body_fallbacks_in_order() {
        let body = "See https://jules.google.com/task/998877 and /sessions/abc";
        assert_eq!(extract_session_id("feature", body).as_deref(), Some("998877"));

        let body = "Opened from https://agents.example/task/run-7";
        assert_eq!(extract_session_id("feature", body).as_deref(), Some("run-7"));

        let body = "api: /v1alpha/session/xyz-1";
        assert_eq!(extract_session_id("feature", body).as_deref(), Some("xyz-1"));

        assert_eq!(extract_session_id("feature", "no link here"), None);
    }

    #[test]
    fn test_branch_wins_over_body() {
        let id = extract_session_id(
            "fix-6277226227732204550",
            "https://jules.google.com/task/1",
        );
        assert_eq!(id.as_deref(), Some("6277226227732204550"));
    }

    #[test]
    fn test_session_deserializes_from_api_name() {
        let session: AgentSession = serde_json::from_value(serde_json::json!({
            "name": "sessions/1234",
            "title": "curator: weekly cleanup",
            "state": "AWAITING_PLAN_APPROVAL",
            "createTime": "2025-02-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(session.id, "1234");
        assert_eq!(session.state, SessionState::AwaitingPlanApproval);
        assert!(session.create_time.is_some());
    }

    #[test]
    fn test_unrecognised_state_is_unknown() {
        let session: AgentSession = serde_json::from_value(serde_json::json!({
            "name": "sessions/1", "state": "HIBERNATING"
        }))
        .unwrap();
        assert_eq!(session.state, SessionState::Unknown);
        assert!(!session.state.is_terminal());
    }

    #[test]
    fn test_missing_name_falls_back_to_id() {
        let session: AgentSession = serde_json::from_value(serde_json::json!({
            "id": "42", "title": "x", "state": "COMPLETED"
        }))
        .unwrap();
        assert_eq!(session.id, "42");
        assert_eq!(session.state, SessionState::Completed);
    }

    #[test]
    fn test_reuse_requires_active_state_and_persona_in_title() {
        let active = AgentSession::new("1", "janitor run", SessionState::InProgress);
        assert!(active.is_reusable_for("janitor"));
        assert!(!active.is_reusable_for("curator"));

        let done = AgentSession::new("2", "janitor run", SessionState::Completed);
        assert!(!done.is_reusable_for("janitor"));
    }
}

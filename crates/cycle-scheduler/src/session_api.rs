//! Agent session API collaborator and its HTTP client.

use async_trait::async_trait;
use coordination::{AgentSession, RetryPolicy};
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::SessionApiError;

pub const DEFAULT_SESSION_API_URL: &str = "https://jules.googleapis.com/v1alpha";
const API_KEY_HEADER: &str = "X-Goog-Api-Key";
const PAGE_SIZE: u32 = 100;

/// How far the agent may go without a human.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationMode {
    /// Agent opens a PR on its own when done.
    #[default]
    AutoCreatePr,
    /// Agent stops with changes on its branch.
    #[serde(rename = "AUTOMATION_MODE_UNSPECIFIED")]
    Unspecified,
}

impl AutomationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoCreatePr => "AUTO_CREATE_PR",
            Self::Unspecified => "AUTOMATION_MODE_UNSPECIFIED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub prompt: String,
    pub title: String,
    /// `owner/repo`
    pub repository: String,
    pub starting_branch: String,
    pub automation_mode: AutomationMode,
    pub require_plan_approval: bool,
}

impl SessionRequest {
    /// Request body for `POST /sessions`.
    pub fn to_body(&self) -> Value {
        json!({
            "prompt": self.prompt,
            "title": self.title,
            "sourceContext": {
                "source": format!("sources/github/{}", self.repository),
                "githubRepoContext": { "startingBranch": self.starting_branch },
            },
            "automationMode": self.automation_mode.as_str(),
            "requirePlanApproval": self.require_plan_approval,
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<AgentSession>, SessionApiError>;

    async fn get_session(&self, id: &str) -> Result<AgentSession, SessionApiError>;

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<AgentSession, SessionApiError>;

    async fn approve_plan(&self, id: &str) -> Result<(), SessionApiError>;

    async fn send_message(&self, id: &str, message: &str) -> Result<(), SessionApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPage {
    #[serde(default)]
    sessions: Vec<AgentSession>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// REST client for the agent session API.
pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
}

impl SessionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, SessionApiError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(SessionApiError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            retry: RetryPolicy::session_api(),
        })
    }

    /// Client from `SESSION_API_KEY` / `SESSION_API_URL`.
    pub fn from_env() -> Result<Self, SessionApiError> {
        let api_key = std::env::var("SESSION_API_KEY").unwrap_or_default();
        let base_url =
            std::env::var("SESSION_API_URL").unwrap_or_else(|_| DEFAULT_SESSION_API_URL.into());
        Self::new(base_url, api_key)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    /// Send once, mapping non-2xx into `Status`.
    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Value, SessionApiError> {
        let mut request = self.request(method, path).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SessionApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> Result<Value, SessionApiError> {
        let mut attempt = 0;
        loop {
            match self.send_once(method.clone(), path, body, query).await {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        path,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Session API transient failure, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl SessionApi for SessionClient {
    async fn list_sessions(&self) -> Result<Vec<AgentSession>, SessionApiError> {
        let mut sessions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut query = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let value = self.call(Method::GET, "sessions", None, &query).await?;
            let page: SessionPage = serde_json::from_value(value)?;
            sessions.extend(page.sessions);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => return Ok(sessions),
            }
        }
    }

    async fn get_session(&self, id: &str) -> Result<AgentSession, SessionApiError> {
        let value = self
            .call(Method::GET, &format!("sessions/{id}"), None, &[])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<AgentSession, SessionApiError> {
        let body = request.to_body();
        let value = self
            .call(Method::POST, "sessions", Some(&body), &[])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn approve_plan(&self, id: &str) -> Result<(), SessionApiError> {
        self.call(
            Method::POST,
            &format!("sessions/{id}:approvePlan"),
            Some(&json!({})),
            &[],
        )
        .await?;
        Ok(())
    }

    async fn send_message(&self, id: &str, message: &str) -> Result<(), SessionApiError> {
        self.call(
            Method::POST,
            &format!("sessions/{id}:sendMessage"),
            Some(&json!({ "prompt": message })),
            &[],
        )
        .await?;
        Ok(())
    }
}

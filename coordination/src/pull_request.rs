//! Pull request wire model
//!
//! Mirrors the fields the scheduler asks `gh pr list/view --json` for.
//! The REST spelling `mergeable_state` is accepted as an alias so a
//! REST-backed host can hand over its payload unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Field list passed to `gh ... --json`.
pub const GH_PR_FIELDS: &str = "number,headRefName,baseRefName,body,author,isDraft,mergeable,mergeStateStatus,statusCheckRollup,createdAt,url,state";

/// Tri-state mergeability as reported by the host.
///
/// The host computes mergeability lazily, so a fresh PR reports
/// `Unknown` until the background job finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mergeable {
    Mergeable,
    Conflicting,
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for Mergeable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Self::Unknown,
            Some(Raw::Flag(true)) => Self::Mergeable,
            Some(Raw::Flag(false)) => Self::Conflicting,
            Some(Raw::Text(text)) => match text.to_ascii_uppercase().as_str() {
                "MERGEABLE" | "TRUE" => Self::Mergeable,
                "CONFLICTING" | "FALSE" => Self::Conflicting,
                _ => Self::Unknown,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
}

/// One entry of `statusCheckRollup`.
///
/// Check runs carry `status` + `conclusion`; legacy commit statuses
/// carry only `state`. Both shapes land in this struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    #[serde(default, alias = "context")]
    pub name: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl CheckRun {
    pub fn completed(name: &str, conclusion: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            conclusion: Some(conclusion.to_string()),
            state: None,
            status: Some("COMPLETED".to_string()),
        }
    }

    pub fn running(name: &str, status: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            conclusion: None,
            state: None,
            status: Some(status.to_string()),
        }
    }

    pub fn legacy(name: &str, state: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            conclusion: None,
            state: Some(state.to_string()),
            status: None,
        }
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(rename = "headRefName")]
    pub head_ref: String,
    #[serde(rename = "baseRefName")]
    pub base_ref: String,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default, rename = "isDraft")]
    pub is_draft: bool,
    #[serde(default)]
    pub mergeable: Mergeable,
    #[serde(default, rename = "mergeStateStatus", alias = "mergeable_state")]
    pub merge_state: Option<String>,
    #[serde(
        default,
        rename = "statusCheckRollup",
        deserialize_with = "null_as_empty"
    )]
    pub checks: Vec<CheckRun>,
    #[serde(default, rename = "createdAt", alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// `OPEN`, `CLOSED` or `MERGED`.
    #[serde(default)]
    pub state: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl PullRequest {
    /// Minimal PR for building fixtures and for hosts that only know
    /// head and base.
    pub fn new(number: u64, head_ref: impl Into<String>, base_ref: impl Into<String>) -> Self {
        Self {
            number,
            head_ref: head_ref.into(),
            base_ref: base_ref.into(),
            author: None,
            is_draft: false,
            mergeable: Mergeable::Unknown,
            merge_state: None,
            checks: Vec::new(),
            created_at: None,
            body: None,
            url: None,
            state: None,
        }
    }

    pub fn author_login(&self) -> Option<&str> {
        self.author.as_ref().map(|a| a.login.as_str())
    }

    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }

    /// Open unless the host says otherwise.
    pub fn is_open(&self) -> bool {
        self.state
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("open"))
    }

    /// Parse the output of `gh pr list --json ...`.
    pub fn parse_list(raw: &[u8]) -> serde_json::Result<Vec<Self>> {
        serde_json::from_slice(raw)
    }
}

//! Green gate: is a pull request safe to auto-merge?
//!
//! Three tiers, evaluated in order, first decisive tier wins:
//!
//! 1. Mergeability: `Unknown` (host still computing) or `Conflicting` → not green.
//! 2. Aggregate merge state: `BLOCKED` → not green; `CLEAN`, `BEHIND`,
//!    `DIRTY` → green. Conflicts behind `DIRTY` are dealt with by the
//!    merge path, not here.
//! 3. Individual checks. An empty rollup is green.

use serde::Serialize;

use crate::pull_request::{CheckRun, Mergeable, PullRequest};

const PASSING_CONCLUSIONS: &[&str] = &["SUCCESS", "NEUTRAL", "SKIPPED"];
const WAITING_STATES: &[&str] = &["PENDING", "QUEUED", "IN_PROGRESS", "EXPECTED"];
const FAILED_STATES: &[&str] = &["FAILURE", "ERROR"];
const GREEN_MERGE_STATES: &[&str] = &["CLEAN", "BEHIND", "DIRTY"];

/// Which rule decided the verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum GreenVerdict {
    MergeabilityUnknown,
    Conflicting,
    Blocked,
    MergeState { state: String },
    NoChecks,
    CheckFailed { check: String },
    CheckPending { check: String },
    CheckIncomplete { check: String },
    AllChecksPassed,
}

impl GreenVerdict {
    pub fn is_green(&self) -> bool {
        matches!(
            self,
            Self::MergeState { .. } | Self::NoChecks | Self::AllChecksPassed
        )
    }
}

impl std::fmt::Display for GreenVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MergeabilityUnknown => write!(f, "mergeability still computing"),
            Self::Conflicting => write!(f, "not mergeable"),
            Self::Blocked => write!(f, "merge state BLOCKED"),
            Self::MergeState { state } => write!(f, "merge state {state}"),
            Self::NoChecks => write!(f, "no checks reported"),
            Self::CheckFailed { check } => write!(f, "check '{check}' failed"),
            Self::CheckPending { check } => write!(f, "check '{check}' still running"),
            Self::CheckIncomplete { check } => write!(f, "check '{check}' not completed"),
            Self::AllChecksPassed => write!(f, "all checks passed"),
        }
    }
}

fn upper(field: &Option<String>) -> String {
    field.as_deref().unwrap_or("").to_ascii_uppercase()
}

/// Evaluate one check. `None` means the check passes and the scan continues.
fn check_verdict(check: &CheckRun) -> Option<GreenVerdict> {
    let name = check.label().to_string();

    let conclusion = upper(&check.conclusion);
    if conclusion == "FAILURE" {
        return Some(GreenVerdict::CheckFailed { check: name });
    }
    if PASSING_CONCLUSIONS.contains(&conclusion.as_str()) {
        return None;
    }

    let state = upper(&check.state);
    if FAILED_STATES.contains(&state.as_str()) {
        return Some(GreenVerdict::CheckFailed { check: name });
    }
    if state == "SUCCESS" {
        return None;
    }
    if WAITING_STATES.contains(&state.as_str()) {
        return Some(GreenVerdict::CheckPending { check: name });
    }

    if upper(&check.status) != "COMPLETED" {
        return Some(GreenVerdict::CheckIncomplete { check: name });
    }
    None
}

pub fn green_verdict(pr: &PullRequest) -> GreenVerdict {
    match pr.mergeable {
        Mergeable::Unknown => return GreenVerdict::MergeabilityUnknown,
        Mergeable::Conflicting => return GreenVerdict::Conflicting,
        Mergeable::Mergeable => {}
    }

    let state = upper(&pr.merge_state);
    if state == "BLOCKED" {
        return GreenVerdict::Blocked;
    }
    if GREEN_MERGE_STATES.contains(&state.as_str()) {
        return GreenVerdict::MergeState { state };
    }

    if pr.checks.is_empty() {
        return GreenVerdict::NoChecks;
    }
    pr.checks
        .iter()
        .find_map(check_verdict)
        .unwrap_or(GreenVerdict::AllChecksPassed)
}

pub fn is_green(pr: &PullRequest) -> bool {
    green_verdict(pr).is_green()
}

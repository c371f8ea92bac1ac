//! Explicit continuation signal for advisory steps
//!
//! Scheduler steps that are allowed to fail without stopping the tick
//! (drift rotation, integration PR upkeep, reconciliation) return an
//! [`Outcome`] instead of an `Option`, so the caller sees *why* nothing
//! happened and can decide whether to keep going.
//!
//! ```text
//! step
//!   ├─ did the work            → Outcome::Done(value)
//!   ├─ nothing to do / dry run → Outcome::Skipped(reason)
//!   ├─ advisory call failed    → Outcome::Recoverable(reason)
//!   └─ tick must stop          → Outcome::Fatal(reason)
//! ```

use serde::{Deserialize, Serialize};

/// How bad a non-`Done` outcome is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The step produced its value.
    Ok,
    /// Nothing was required, or the step was a dry run.
    Skipped,
    /// The step failed but the tick can continue.
    Recoverable,
    /// The tick must stop.
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Skipped => write!(f, "skipped"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Result of an advisory scheduler step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome<T> {
    Done(T),
    Skipped(String),
    Recoverable(String),
    Fatal(String),
}

impl<T> Outcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self::Recoverable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Done(_) => Severity::Ok,
            Self::Skipped(_) => Severity::Skipped,
            Self::Recoverable(_) => Severity::Recoverable,
            Self::Fatal(_) => Severity::Fatal,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// Whether the surrounding tick may carry on after this step.
    pub fn should_continue(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }

    /// The produced value, discarding the reason for any other variant.
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_done(&self) -> Option<&T> {
        match self {
            Self::Done(value) => Some(value),
            _ => None,
        }
    }

    /// Reason text for non-`Done` variants.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Done(_) => None,
            Self::Skipped(r) | Self::Recoverable(r) | Self::Fatal(r) => Some(r),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Done(value) => Outcome::Done(f(value)),
            Self::Skipped(r) => Outcome::Skipped(r),
            Self::Recoverable(r) => Outcome::Recoverable(r),
            Self::Fatal(r) => Outcome::Fatal(r),
        }
    }

    /// Turn an error from an advisory call into `Recoverable`.
    pub fn from_advisory<E: std::fmt::Display>(result: Result<T, E>, context: &str) -> Self {
        match result {
            Ok(value) => Self::Done(value),
            Err(e) => Self::Recoverable(format!("{context}: {e}")),
        }
    }
}

impl<T: std::fmt::Display> std::fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done(value) => write!(f, "done ({value})"),
            Self::Skipped(r) => write!(f, "skipped: {r}"),
            Self::Recoverable(r) => write!(f, "recoverable: {r}"),
            Self::Fatal(r) => write!(f, "fatal: {r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_yields_value() {
        let outcome: Outcome<u64> = Outcome::Done(7);
        assert!(outcome.is_done());
        assert!(outcome.should_continue());
        assert_eq!(outcome.reason(), None);
        assert_eq!(outcome.done(), Some(7));
    }

    #[test]
    fn test_only_fatal_stops_the_tick() {
        assert!(Outcome::<()>::skipped("nothing ahead").should_continue());
        assert!(Outcome::<()>::recoverable("gh timed out").should_continue());
        assert!(!Outcome::<()>::fatal("push rejected").should_continue());
    }

    #[test]
    fn test_map_preserves_reason() {
        let outcome: Outcome<u64> = Outcome::recoverable("rate limited");
        let mapped = outcome.map(|n| n.to_string());
        assert_eq!(mapped.reason(), Some("rate limited"));
        assert_eq!(mapped.severity(), Severity::Recoverable);
    }

    #[test]
    fn test_from_advisory_wraps_error_with_context() {
        let result: Result<u64, String> = Err("HTTP 502".into());
        let outcome = Outcome::from_advisory(result, "create backup PR");
        assert_eq!(outcome.reason(), Some("create backup PR: HTTP 502"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Ok < Severity::Skipped);
        assert!(Severity::Recoverable < Severity::Fatal);
    }

    #[test]
    fn test_serde_shape() {
        let outcome: Outcome<u64> = Outcome::Done(12);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "done");
        assert_eq!(json["detail"], 12);
    }
}

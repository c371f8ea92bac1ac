//! Bounded exponential backoff and retry classification.
//!
//! The policy only computes delays; callers sleep with whatever clock
//! they run on.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `base * 2^n`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// PR merges: five retries, 4s doubling to a 10s ceiling.
    pub fn merge() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_secs(4),
            cap: Duration::from_secs(10),
        }
    }

    /// Agent API gateway errors: three attempts in total.
    pub fn session_api() -> Self {
        Self {
            max_retries: 2,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(4),
        }
    }

    /// Transient git failures (ref locks, flaky remotes).
    pub fn git() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(2),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Every delay the policy will ever wait, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.delay_for(n)).collect()
    }
}

/// Substring fallback for hosts that only give us an error message.
pub fn is_permission_denied_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission denied") || lower.contains("403")
}

/// Messages from git that usually clear up on their own.
pub fn is_transient_git_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("index.lock")
        || lower.contains("unable to create")
        || lower.contains("cannot lock ref")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("could not read from remote")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_policy_delays() {
        let secs: Vec<u64> = RetryPolicy::merge()
            .delays()
            .iter()
            .map(Duration::as_secs)
            .collect();
        assert_eq!(secs, vec![4, 8, 10, 10, 10]);
        assert_eq!(RetryPolicy::merge().max_attempts(), 6);
    }

    #[test]
    fn test_delay_never_overflows() {
        let policy = RetryPolicy {
            max_retries: 64,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(63), Duration::from_secs(30));
    }

    #[test]
    fn test_permission_denied_detection() {
        assert!(is_permission_denied_message("HTTP 403: Resource not accessible"));
        assert!(is_permission_denied_message("Permission denied to merge"));
        assert!(!is_permission_denied_message("HTTP 429: rate limit exceeded"));
    }

    #[test]
    fn test_transient_git_detection() {
        assert!(is_transient_git_message(
            "fatal: Unable to create '/repo/.git/index.lock': File exists."
        ));
        assert!(!is_transient_git_message("CONFLICT (content): Merge conflict in a.rs"));
    }
}

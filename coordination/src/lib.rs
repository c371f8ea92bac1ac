//! Deterministic policy for the agent integration scheduler.
//!
//! Everything here is pure: no git, no HTTP, no clock reads except where
//! a timestamp is passed in. The `cycle-scheduler` crate wires these
//! rules to the git host and the agent session API.
//!
//! - [`green`]: is a PR safe to auto-merge
//! - [`cycle`]: persona rotation arithmetic and branch matching
//! - [`session`]: session model and session-id recovery from PRs
//! - [`triage`]: which open PRs are agent work, oldest first
//! - [`conflict`]: metadata-only vs escalate
//! - [`retry`]: backoff policies
//! - [`outcome`]: explicit continuation signal for advisory steps
//! - [`naming`]: backup branch names and PR texts

pub mod conflict;
pub mod cycle;
pub mod green;
pub mod naming;
pub mod outcome;
pub mod pull_request;
pub mod retry;
pub mod session;
pub mod triage;

pub use conflict::{classify_conflict, is_metadata_only, ConflictClass};
pub use cycle::{advance_cycle, CycleError, CycleState, PersonaMatcher};
pub use green::{green_verdict, is_green, GreenVerdict};
pub use outcome::{Outcome, Severity};
pub use pull_request::{Author, CheckRun, Mergeable, PullRequest};
pub use retry::RetryPolicy;
pub use session::{extract_session_id, AgentSession, SessionState};
pub use triage::AgentPrFilter;

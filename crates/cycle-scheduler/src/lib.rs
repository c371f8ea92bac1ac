//! Integration-branch scheduler for rotating autonomous agent sessions.
//!
//! Keeps a shared integration branch healthy, merges green agent PRs into
//! it, starts the next persona's session, and hands drifted work to a
//! reconciliation session. Policy decisions live in the `coordination`
//! crate; this crate does the I/O.
//!
//! - [`branch_manager`] integration branch lifecycle
//! - [`pr_manager`] PR triage, merging, integration PR upkeep
//! - [`cycle_state`] rotation position from remote history
//! - [`session_orchestrator`] session reuse, creation and nudging
//! - [`reconciliation`] one drift reconciliation session per sprint
//! - [`tick`] the above composed into one scheduler tick

pub mod branch_manager;
pub mod config;
pub mod cycle_state;
pub mod error;
pub mod gh_host;
pub mod git_cli;
pub mod git_host;
pub mod pr_manager;
pub mod reconciliation;
pub mod session_api;
pub mod session_orchestrator;
pub mod tick;
pub mod trackers;

pub use branch_manager::{BranchManager, DriftBackup, TrunkMergeReport};
pub use config::{PersonaSchedule, SchedulerConfig};
pub use cycle_state::CycleStateManager;
pub use error::{BranchError, GitHostError, MergeError, SessionApiError, TrackerError};
pub use gh_host::GhCliHost;
pub use git_host::GitHost;
pub use pr_manager::{ConflictedPr, PrManager};
pub use reconciliation::ReconciliationManager;
pub use session_api::{SessionApi, SessionClient, SessionRequest};
pub use session_orchestrator::{SessionOrchestrator, SessionStart, StuckVerdict};
pub use tick::{CycleTick, TickReport};

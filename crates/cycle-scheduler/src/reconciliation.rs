//! Drift reconciliation sessions.
//!
//! When the integration branch is rotated, the backup PR's diff is handed
//! to an agent session that re-applies the work on top of trunk. The
//! tracker allows one such session per sprint.

use std::sync::Arc;

use coordination::{naming, Outcome};
use tracing::{info, warn};

use crate::branch_manager::DriftBackup;
use crate::git_host::GitHost;
use crate::session_api::{AutomationMode, SessionApi, SessionRequest};
use crate::trackers::ReconciliationTracker;

pub const DEFAULT_DIFF_CHAR_LIMIT: usize = 50_000;
pub const TRUNCATION_MARKER: &str = "\n\n[...diff truncated due to size...]";

/// Cut `diff` to at most `limit` characters, marking the cut.
pub fn truncate_diff(diff: &str, limit: usize) -> String {
    match diff.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &diff[..cut]),
        None => diff.to_string(),
    }
}

pub fn reconciliation_prompt(
    backup: &DriftBackup,
    branch: &str,
    trunk: &str,
    diff: &str,
) -> String {
    let sprint = backup.sprint;
    format!(
        "**Drift Reconciliation - Sprint {sprint}**\n\n\
         The `{branch}` branch diverged from `{trunk}` and was backed up to `{backup_branch}`.\n\n\
         Reconcile the drifted changes with the current `{trunk}` branch.\n\n\
         **Backup PR**: #{pr}\n\
         **Drift diff** (changes that need reconciliation):\n\n\
         ```diff\n{diff}\n```\n\n\
         **Instructions**:\n\
         1. Read the diff to understand what changed on the drifted branch\n\
         2. Re-apply those changes to the current codebase:\n   \
            - resolve conflicts with the current code\n   \
            - keep the intent of the original changes\n   \
            - keep the code consistent with its surroundings\n\
         3. If a change no longer applies or cannot be reconciled, explain why in the PR\n\
         4. Open a Pull Request with the reconciled changes\n\n\
         **Important**: old work is being merged into new code. Prefer the current code's structure.",
        backup_branch = backup.backup_branch,
        pr = backup.pr_number,
    )
}

pub struct ReconciliationManager {
    git: Arc<dyn GitHost>,
    sessions: Arc<dyn SessionApi>,
    tracker: Arc<dyn ReconciliationTracker>,
    repository: String,
    branch: String,
    trunk: String,
    diff_char_limit: usize,
}

impl ReconciliationManager {
    pub fn new(
        git: Arc<dyn GitHost>,
        sessions: Arc<dyn SessionApi>,
        tracker: Arc<dyn ReconciliationTracker>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        trunk: impl Into<String>,
    ) -> Self {
        Self {
            git,
            sessions,
            tracker,
            repository: repository.into(),
            branch: branch.into(),
            trunk: trunk.into(),
            diff_char_limit: DEFAULT_DIFF_CHAR_LIMIT,
        }
    }

    pub fn with_diff_char_limit(mut self, limit: usize) -> Self {
        self.diff_char_limit = limit;
        self
    }

    /// Start the sprint's reconciliation session. `Done` carries the new
    /// session id.
    pub async fn reconcile_drift(&self, backup: &DriftBackup, dry_run: bool) -> Outcome<String> {
        let sprint = backup.sprint;
        if !self.tracker.can_reconcile(sprint) {
            info!(sprint, "Sprint already reconciled");
            return Outcome::skipped(format!("sprint {sprint} already reconciled"));
        }

        let diff = match self.git.pull_request_diff(backup.pr_number).await {
            Ok(diff) => diff,
            Err(e) => {
                warn!(sprint, pr = backup.pr_number, "Could not fetch drift diff: {e}");
                return Outcome::recoverable(format!("diff of PR #{}: {e}", backup.pr_number));
            }
        };
        if diff.trim().is_empty() {
            return Outcome::skipped(format!("PR #{} has an empty diff", backup.pr_number));
        }

        let diff = truncate_diff(&diff, self.diff_char_limit);
        let request = SessionRequest {
            prompt: reconciliation_prompt(backup, &self.branch, &self.trunk, &diff),
            title: naming::reconciliation_title(sprint),
            repository: self.repository.clone(),
            starting_branch: self.branch.clone(),
            automation_mode: AutomationMode::AutoCreatePr,
            require_plan_approval: false,
        };

        if dry_run {
            info!(dry_run = true, sprint, pr = backup.pr_number, title = %request.title, "Would start reconciliation session");
            return Outcome::skipped("dry run");
        }

        let session = match self.sessions.create_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(sprint, "Reconciliation session failed to start: {e}");
                return Outcome::recoverable(format!("create reconciliation session: {e}"));
            }
        };

        if let Err(e) = self.tracker.mark_reconciled(sprint, &session.id) {
            warn!(sprint, session = %session.id, "Could not record reconciliation: {e}");
        }
        info!(sprint, session = %session.id, backup = %backup.backup_branch, "Started reconciliation session");
        Outcome::Done(session.id)
    }
}

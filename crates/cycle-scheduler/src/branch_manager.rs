//! Integration branch lifecycle: existence, drift, rotation, sync, and
//! the direct merge into trunk.
//!
//! Drift is never an error here. A drifted branch is backed up to
//! `<branch>-sprint-N`, a PR is opened for the backup, and the branch is
//! recreated from trunk. Only failing remote operations surface as
//! [`BranchError`].

use std::sync::Arc;

use chrono::Utc;
use coordination::naming;
use coordination::Outcome;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BranchError, GitHostError};
use crate::git_host::{GitHost, MergeOptions, MergeTrial, NewPullRequest, PrQuery, RefSource};
use crate::trackers::SprintCounter;

/// A drifted branch preserved for later reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftBackup {
    pub pr_number: u64,
    pub sprint: u32,
    pub backup_branch: String,
}

/// What `merge_into_trunk_direct` did, or would have done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TrunkMergeReport {
    Merged,
    WouldMerge,
    ConflictBackedUp {
        backup: String,
        pr_number: Option<u64>,
    },
    WouldBackUp {
        backup: String,
    },
}

struct Rotation {
    outcome: Outcome<DriftBackup>,
    /// The backup ref exists on the remote, so the branch may be reset.
    preserved: bool,
}

pub struct BranchManager {
    git: Arc<dyn GitHost>,
    sprints: Arc<dyn SprintCounter>,
    branch: String,
    trunk: String,
}

impl BranchManager {
    pub fn new(
        git: Arc<dyn GitHost>,
        sprints: Arc<dyn SprintCounter>,
        branch: impl Into<String>,
        trunk: impl Into<String>,
    ) -> Self {
        Self {
            git,
            sprints,
            branch: branch.into(),
            trunk: trunk.into(),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    fn fail(&self, operation: &'static str) -> impl FnOnce(GitHostError) -> BranchError + '_ {
        move |source| BranchError::new(operation, &self.branch, source)
    }

    /// Make sure the integration branch exists and sits on top of trunk.
    ///
    /// `Done` means the branch had drifted and was rotated; `Skipped`
    /// means it was created or already healthy.
    pub async fn ensure_branch_exists(&self) -> Result<Outcome<DriftBackup>, BranchError> {
        self.git.fetch().await.map_err(self.fail("fetch"))?;

        let exists = self
            .git
            .remote_branch_exists(&self.branch)
            .await
            .map_err(self.fail("ls-remote"))?;
        if !exists {
            info!(branch = %self.branch, trunk = %self.trunk, "Creating integration branch from trunk");
            self.reset_to_trunk().await?;
            return Ok(Outcome::skipped("created from trunk"));
        }

        if self.is_drifted().await {
            return self.rotate_and_reset().await;
        }

        match self.update_from_trunk(MergeOptions::default()).await {
            Ok(true) => Ok(Outcome::skipped("updated from trunk")),
            Ok(false) => Ok(Outcome::skipped("already up to date")),
            Err(e) if e.is_conflict() => {
                warn!(branch = %self.branch, "Trunk merge conflicted after a clean trial; rotating");
                self.rotate_and_reset().await
            }
            Err(e) => Err(BranchError::new("update-from-trunk", &self.branch, e)),
        }
    }

    /// Read-only counterpart of [`ensure_branch_exists`] and
    /// [`sync_with_main`] for dry runs: fetches and inspects, never
    /// pushes. The `Skipped` reason says what a real run would do.
    ///
    /// [`ensure_branch_exists`]: Self::ensure_branch_exists
    /// [`sync_with_main`]: Self::sync_with_main
    pub async fn preview_upkeep(&self) -> Result<Outcome<DriftBackup>, BranchError> {
        self.git.fetch().await.map_err(self.fail("fetch"))?;

        let exists = self
            .git
            .remote_branch_exists(&self.branch)
            .await
            .map_err(self.fail("ls-remote"))?;
        let plan = if !exists {
            "would create from trunk".to_string()
        } else if self.is_drifted().await {
            match self.sprints.current_sprint() {
                Ok(sprint) => format!(
                    "would rotate to {} and recreate from trunk",
                    naming::sprint_backup_branch(&self.branch, sprint)
                ),
                Err(e) => format!("would rotate (sprint unreadable: {e})"),
            }
        } else {
            let behind = self
                .git
                .count_commits(&self.branch, &self.trunk)
                .await
                .map_err(self.fail("rev-list"))?;
            if behind == 0 {
                "already up to date".to_string()
            } else {
                format!("would merge {behind} trunk commits")
            }
        };
        info!(dry_run = true, branch = %self.branch, %plan, "Branch upkeep preview");
        Ok(Outcome::skipped(plan))
    }

    /// Would merging trunk into the branch conflict?
    ///
    /// A merge tool failure reads as "not drifted": a broken trial should
    /// not rotate a healthy branch.
    pub async fn is_drifted(&self) -> bool {
        match self.git.merge_trial(&self.branch, &self.trunk).await {
            Ok(MergeTrial::Clean) => false,
            Ok(MergeTrial::Conflict) => {
                info!(branch = %self.branch, trunk = %self.trunk, "Integration branch has drifted");
                true
            }
            Ok(MergeTrial::ToolError { code, stderr }) => {
                warn!(branch = %self.branch, ?code, %stderr, "Merge trial failed; assuming no drift");
                false
            }
            Err(e) => {
                warn!(branch = %self.branch, "Merge trial could not run; assuming no drift: {e}");
                false
            }
        }
    }

    /// Back the branch up to `<branch>-sprint-N` and open a PR for it.
    pub async fn rotate_drifted_branch(&self) -> Outcome<DriftBackup> {
        self.rotate().await.outcome
    }

    async fn rotate(&self) -> Rotation {
        let sprint = match self.sprints.current_sprint() {
            Ok(sprint) => sprint,
            Err(e) => {
                return Rotation {
                    outcome: Outcome::recoverable(format!("read sprint number: {e}")),
                    preserved: false,
                }
            }
        };
        let backup = naming::sprint_backup_branch(&self.branch, sprint);

        if let Err(e) = self
            .git
            .push_ref(RefSource::Branch(&self.branch), &backup)
            .await
        {
            warn!(branch = %self.branch, %backup, "Backup push failed: {e}");
            return Rotation {
                outcome: Outcome::recoverable(format!("push backup {backup}: {e}")),
                preserved: false,
            };
        }

        let outcome = match self.open_backup_pr(sprint, &backup).await {
            Ok(pr_number) => {
                info!(branch = %self.branch, %backup, pr = pr_number, sprint, "Rotated drifted branch");
                Outcome::Done(DriftBackup {
                    pr_number,
                    sprint,
                    backup_branch: backup,
                })
            }
            Err(e) => {
                warn!(%backup, sprint, "Backup PR could not be opened: {e}");
                Outcome::recoverable(format!("open PR for {backup}: {e}"))
            }
        };
        Rotation {
            outcome,
            preserved: true,
        }
    }

    /// Reuses an already open backup PR so a re-run does not fail on
    /// "a pull request already exists".
    async fn open_backup_pr(&self, sprint: u32, backup: &str) -> Result<u64, GitHostError> {
        let existing = self
            .git
            .list_pull_requests(&PrQuery::open().head(backup).base(&self.trunk))
            .await?;
        if let Some(pr) = existing.first() {
            debug!(pr = pr.number, %backup, "Backup PR already open");
            return Ok(pr.number);
        }
        self.git
            .create_pull_request(&NewPullRequest {
                head: backup.to_string(),
                base: self.trunk.clone(),
                title: naming::drift_pr_title(sprint, &self.branch),
                body: naming::drift_pr_body(sprint, &self.branch, backup, &self.trunk),
            })
            .await
    }

    async fn rotate_and_reset(&self) -> Result<Outcome<DriftBackup>, BranchError> {
        let rotation = self.rotate().await;
        if rotation.preserved {
            self.reset_to_trunk().await?;
        } else {
            warn!(branch = %self.branch, "Backup not preserved; leaving drifted branch in place");
        }
        Ok(rotation.outcome)
    }

    /// Point the integration branch at trunk's current tip.
    async fn reset_to_trunk(&self) -> Result<(), BranchError> {
        let sha = self
            .git
            .resolve_remote(&self.trunk)
            .await
            .map_err(self.fail("rev-parse"))?;
        self.git
            .push_ref(RefSource::Commit(&sha), &self.branch)
            .await
            .map_err(self.fail("push"))?;
        info!(branch = %self.branch, %sha, "Integration branch reset to trunk");
        Ok(())
    }

    /// Merge trunk into the branch and push. `Ok(false)` when trunk had
    /// nothing new, in which case nothing is pushed.
    async fn update_from_trunk(&self, options: MergeOptions) -> Result<bool, GitHostError> {
        let behind = self.git.count_commits(&self.branch, &self.trunk).await?;
        if behind == 0 {
            debug!(branch = %self.branch, "Already contains trunk");
            return Ok(false);
        }
        self.git.checkout_remote(&self.branch).await?;
        self.git.merge_into_checkout(&self.trunk, options).await?;
        self.git.push_checkout(&self.branch).await?;
        info!(branch = %self.branch, behind, "Merged trunk into integration branch");
        Ok(true)
    }

    /// Bring the branch up to date after trunk moved. A conflict is drift.
    pub async fn sync_with_main(&self) -> Result<Outcome<DriftBackup>, BranchError> {
        self.git.fetch().await.map_err(self.fail("fetch"))?;

        let exists = self
            .git
            .remote_branch_exists(&self.branch)
            .await
            .map_err(self.fail("ls-remote"))?;
        if !exists {
            self.reset_to_trunk().await?;
            return Ok(Outcome::skipped("created from trunk"));
        }

        if self.is_drifted().await {
            return self.rotate_and_reset().await;
        }

        let options = MergeOptions {
            allow_unrelated: true,
            prefer_ours: false,
        };
        match self.update_from_trunk(options).await {
            Ok(_) => Ok(Outcome::skipped("synced with trunk")),
            Err(e) if e.is_conflict() => self.rotate_and_reset().await,
            Err(e) => Err(BranchError::new("sync", &self.branch, e)),
        }
    }

    /// Merge the integration branch straight into trunk.
    ///
    /// On conflict the branch is backed up to `<branch>-backup-<utc ts>`,
    /// deleted, a PR is opened for the backup, and the branch is
    /// recreated from trunk. `dry_run` only fetches and trials.
    pub async fn merge_into_trunk_direct(
        &self,
        dry_run: bool,
    ) -> Result<TrunkMergeReport, BranchError> {
        let backup = naming::timestamped_backup_branch(&self.branch, Utc::now());

        self.git.fetch().await.map_err(self.fail("fetch"))?;

        let trial = self
            .git
            .merge_trial(&self.trunk, &self.branch)
            .await
            .map_err(self.fail("merge-trial"))?;

        match trial {
            MergeTrial::Clean if dry_run => {
                info!(dry_run = true, branch = %self.branch, trunk = %self.trunk, "Would merge into trunk");
                Ok(TrunkMergeReport::WouldMerge)
            }
            MergeTrial::Clean => {
                self.git
                    .checkout_remote(&self.trunk)
                    .await
                    .map_err(self.fail("checkout-trunk"))?;
                self.git
                    .merge_into_checkout(&self.branch, MergeOptions::default())
                    .await
                    .map_err(self.fail("merge-into-trunk"))?;
                self.git
                    .push_checkout(&self.trunk)
                    .await
                    .map_err(self.fail("push-trunk"))?;
                info!(branch = %self.branch, trunk = %self.trunk, "Merged integration branch into trunk");
                Ok(TrunkMergeReport::Merged)
            }
            MergeTrial::Conflict if dry_run => {
                info!(
                    dry_run = true,
                    branch = %self.branch,
                    %backup,
                    "Conflicts with trunk; would back up, delete, open PR and recreate"
                );
                Ok(TrunkMergeReport::WouldBackUp { backup })
            }
            MergeTrial::Conflict => self.back_up_conflicting_branch(backup).await,
            // Deleting the branch on a tool hiccup would lose work.
            MergeTrial::ToolError { code, stderr } => Err(BranchError::new(
                "merge-trial",
                &self.branch,
                GitHostError::command_failed("git merge-tree", code, stderr),
            )),
        }
    }

    async fn back_up_conflicting_branch(
        &self,
        backup: String,
    ) -> Result<TrunkMergeReport, BranchError> {
        self.git
            .push_ref(RefSource::Branch(&self.branch), &backup)
            .await
            .map_err(self.fail("push-backup"))?;
        self.git
            .delete_remote_branch(&self.branch)
            .await
            .map_err(self.fail("delete"))?;

        let pr = NewPullRequest {
            head: backup.clone(),
            base: self.trunk.clone(),
            title: naming::conflict_backup_title(&backup),
            body: naming::conflict_backup_body(&self.branch, &backup, &self.trunk),
        };
        let pr_number = match self.git.create_pull_request(&pr).await {
            Ok(number) => Some(number),
            Err(e) => {
                warn!(%backup, "Conflict backup PR failed, continuing: {e}");
                None
            }
        };

        self.reset_to_trunk().await?;
        warn!(branch = %self.branch, %backup, ?pr_number, "Trunk merge conflicted; branch backed up and recreated");
        Ok(TrunkMergeReport::ConflictBackedUp { backup, pr_number })
    }
}

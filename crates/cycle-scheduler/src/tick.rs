//! One scheduler tick.
//!
//! ```text
//! ensure branch ─▶ sweep agent PRs ─▶ trunk step ─▶ reconcile drift
//!                                                        │
//!     sprint++ ◀─ start next persona ◀─ wait on last PR ◀┘
//! ```
//!
//! Steps run strictly in order. Only branch upkeep, cycle recovery and
//! session creation can abort a tick; everything else lands in the
//! [`TickReport`].

use std::sync::Arc;

use anyhow::{Context, Result};
use coordination::{CycleState, Outcome, Severity};
use serde::Serialize;
use tracing::{info, warn};

use crate::branch_manager::{BranchManager, DriftBackup, TrunkMergeReport};
use crate::config::{PersonaSchedule, SchedulerConfig};
use crate::cycle_state::CycleStateManager;
use crate::git_host::GitHost;
use crate::pr_manager::{ConflictedPr, PrManager};
use crate::reconciliation::ReconciliationManager;
use crate::session_api::{AutomationMode, SessionApi, SessionRequest};
use crate::session_orchestrator::{SessionOrchestrator, SessionStart, StuckVerdict};
use crate::trackers::{ReconciliationTracker, SprintCounter};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrunkStep {
    IntegrationPr(Outcome<u64>),
    DirectMerge(TrunkMergeReport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStep {
    /// The last persona's PR is still open and its session is alive.
    Waiting {
        session_id: String,
        pr_number: u64,
    },
    Started {
        persona: String,
        start: SessionStart,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub dry_run: bool,
    pub branch: Option<Outcome<DriftBackup>>,
    pub conflicts: Vec<ConflictedPr>,
    pub trunk: Option<TrunkStep>,
    pub reconciliation: Option<Outcome<String>>,
    pub state: CycleState,
    pub session: SessionStep,
    /// New sprint number when this tick wrapped the rotation.
    pub sprint: Option<u32>,
}

impl TickReport {
    /// Worst severity among the advisory steps.
    pub fn severity(&self) -> Severity {
        let trunk = match &self.trunk {
            Some(TrunkStep::IntegrationPr(outcome)) => Some(outcome.severity()),
            _ => None,
        };
        [
            self.branch.as_ref().map(Outcome::severity),
            self.reconciliation.as_ref().map(Outcome::severity),
            trunk,
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(Severity::Ok)
    }
}

pub struct CycleTick {
    config: SchedulerConfig,
    schedule: PersonaSchedule,
    git: Arc<dyn GitHost>,
    sprints: Arc<dyn SprintCounter>,
    branches: BranchManager,
    prs: PrManager,
    cycle: CycleStateManager,
    orchestrator: SessionOrchestrator,
    reconciler: ReconciliationManager,
}

impl CycleTick {
    pub fn new(
        config: SchedulerConfig,
        schedule: PersonaSchedule,
        git: Arc<dyn GitHost>,
        sessions: Arc<dyn SessionApi>,
        sprints: Arc<dyn SprintCounter>,
        tracker: Arc<dyn ReconciliationTracker>,
    ) -> Self {
        let branches = BranchManager::new(
            git.clone(),
            sprints.clone(),
            &config.integration_branch,
            &config.trunk_branch,
        );
        let prs = PrManager::new(git.clone(), sessions.clone(), &config);
        let cycle = CycleStateManager::new(
            git.clone(),
            sessions.clone(),
            schedule.matcher.clone(),
            &config.branch_prefix,
        );
        let orchestrator = SessionOrchestrator::new(
            sessions.clone(),
            git.clone(),
            config.stuck_timeout,
            config.dry_run,
        );
        let reconciler = ReconciliationManager::new(
            git.clone(),
            sessions,
            tracker,
            &config.repository,
            &config.integration_branch,
            &config.trunk_branch,
        )
        .with_diff_char_limit(config.diff_char_limit);

        Self {
            config,
            schedule,
            git,
            sprints,
            branches,
            prs,
            cycle,
            orchestrator,
            reconciler,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    pub fn prs(&self) -> &PrManager {
        &self.prs
    }

    pub fn cycle(&self) -> &CycleStateManager {
        &self.cycle
    }

    pub fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    pub fn reconciler(&self) -> &ReconciliationManager {
        &self.reconciler
    }

    pub async fn run(&self) -> Result<TickReport> {
        let dry_run = self.config.dry_run;
        info!(dry_run, branch = %self.config.integration_branch, "Starting tick");

        let branch = if dry_run {
            info!(dry_run = true, "Skipping integration branch upkeep");
            None
        } else {
            Some(
                self.branches
                    .ensure_branch_exists()
                    .await
                    .context("Integration branch upkeep failed")?,
            )
        };

        let conflicts = match self.prs.reconcile_all_prs(dry_run).await {
            Ok(conflicts) => conflicts,
            Err(e) => {
                warn!("Could not list agent PRs: {e}");
                Vec::new()
            }
        };

        let trunk = if self.config.direct_trunk_merge {
            let report = self
                .branches
                .merge_into_trunk_direct(dry_run)
                .await
                .context("Direct merge into trunk failed")?;
            Some(TrunkStep::DirectMerge(report))
        } else if dry_run {
            None
        } else {
            Some(TrunkStep::IntegrationPr(
                self.prs.ensure_integration_pr_exists().await,
            ))
        };

        let drift = match (&branch, &trunk) {
            (Some(Outcome::Done(backup)), _) => Some(backup.clone()),
            (
                _,
                Some(TrunkStep::DirectMerge(TrunkMergeReport::ConflictBackedUp {
                    backup,
                    pr_number: Some(pr_number),
                })),
            ) => Some(DriftBackup {
                pr_number: *pr_number,
                sprint: self.sprints.current_sprint().context("Could not read sprint")?,
                backup_branch: backup.clone(),
            }),
            _ => None,
        };
        let reconciliation = match &drift {
            Some(backup) => Some(self.reconciler.reconcile_drift(backup, dry_run).await),
            None => None,
        };

        let state = self
            .cycle
            .compute_state()
            .await
            .context("Could not recover cycle position")?;

        if let Some(waiting) = self.waiting_on_last_session(&state).await {
            info!(?waiting, "Last persona still working");
            return Ok(TickReport {
                dry_run,
                branch,
                conflicts,
                trunk,
                reconciliation,
                state,
                session: waiting,
                sprint: None,
            });
        }

        let persona = state.next_persona_id.clone();
        let request = self.session_request(&persona)?;
        let start = self
            .orchestrator
            .create_session(&persona, &request)
            .await
            .with_context(|| format!("Could not start session for '{persona}'"))?;

        let sprint = match start {
            SessionStart::Created(_) if state.should_increment_sprint => {
                let sprint = self
                    .sprints
                    .increment_sprint()
                    .context("Could not advance sprint")?;
                info!(sprint, "Rotation wrapped, new sprint");
                Some(sprint)
            }
            _ => None,
        };

        Ok(TickReport {
            dry_run,
            branch,
            conflicts,
            trunk,
            reconciliation,
            state,
            session: SessionStep::Started { persona, start },
            sprint,
        })
    }

    /// `Some` when the tick should stop and wait for the last session.
    async fn waiting_on_last_session(&self, state: &CycleState) -> Option<SessionStep> {
        let (Some(session_id), Some(pr_number)) = (&state.last_session_id, state.base_pr_number)
        else {
            return None;
        };

        let open = match self.git.pull_request(pr_number).await {
            Ok(pr) => pr.is_open(),
            Err(e) => {
                warn!(pr = pr_number, "Could not load last persona PR, waiting: {e}");
                true
            }
        };
        if !open {
            return None;
        }

        match self.orchestrator.handle_stuck_session(session_id, None).await {
            StuckVerdict::KeepWaiting => Some(SessionStep::Waiting {
                session_id: session_id.clone(),
                pr_number,
            }),
            StuckVerdict::Skip => {
                warn!(session = %session_id, pr = pr_number, "Giving up on last session");
                None
            }
        }
    }

    fn session_request(&self, persona: &str) -> Result<SessionRequest> {
        let prompt = self
            .schedule
            .prompt_for(persona)
            .with_context(|| format!("No prompt configured for persona '{persona}'"))?;
        Ok(SessionRequest {
            prompt: prompt.to_string(),
            title: self.schedule.title_for(persona),
            repository: self.config.repository.clone(),
            starting_branch: self.config.integration_branch.clone(),
            automation_mode: AutomationMode::AutoCreatePr,
            require_plan_approval: false,
        })
    }
}

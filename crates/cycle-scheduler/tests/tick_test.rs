//! Whole-tick runs against the in-memory host and session API.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{agent_pr, at, config, FakeGitHost, FakeSessions};
use coordination::{AgentSession, Outcome, SessionState, Severity};
use cycle_scheduler::branch_manager::TrunkMergeReport;
use cycle_scheduler::tick::{SessionStep, TrunkStep};
use cycle_scheduler::trackers::{MemoryReconciliationTracker, MemorySprintCounter, SprintCounter};
use cycle_scheduler::{CycleTick, PersonaSchedule, SchedulerConfig, SessionStart, TickReport};

const LAST: &str = "200000000000000007";

struct Harness {
    host: Arc<FakeGitHost>,
    sessions: Arc<FakeSessions>,
    sprints: Arc<MemorySprintCounter>,
    tracker: Arc<MemoryReconciliationTracker>,
}

impl Harness {
    fn new(host: FakeGitHost, sprint: u32) -> Self {
        Self {
            host: Arc::new(host),
            sessions: Arc::new(FakeSessions::new()),
            sprints: Arc::new(MemorySprintCounter::new(sprint)),
            tracker: Arc::new(MemoryReconciliationTracker::new()),
        }
    }

    fn build(&self, config: SchedulerConfig) -> CycleTick {
        let schedule = PersonaSchedule::from_personas(["curator", "janitor", "qa"]).unwrap();
        CycleTick::new(
            config,
            schedule,
            self.host.clone(),
            self.sessions.clone(),
            self.sprints.clone(),
            self.tracker.clone(),
        )
    }

    async fn tick_with(&self, config: SchedulerConfig) -> TickReport {
        self.build(config).run().await.unwrap()
    }

    async fn tick(&self) -> TickReport {
        self.tick_with(config()).await
    }
}

fn started(report: &TickReport) -> (&str, &SessionStart) {
    match &report.session {
        SessionStep::Started { persona, start } => (persona.as_str(), start),
        other => panic!("expected a started session, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fresh_repository_starts_first_persona() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);

    let report = h.tick().await;

    assert_eq!(h.host.tip("jules").as_deref(), Some("M"));
    let (persona, start) = started(&report);
    assert_eq!(persona, "curator");
    assert!(matches!(start, SessionStart::Created(_)));
    assert_eq!(report.sprint, None);
    assert_ne!(report.severity(), Severity::Fatal);

    let request = &h.sessions.created()[0];
    assert_eq!(request.title, "curator");
    assert_eq!(request.starting_branch, "jules");
    assert_eq!(request.repository, "acme/site");
}

#[tokio::test]
async fn test_open_pr_of_live_session_is_waited_on() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    let mut pr = agent_pr(5, &format!("jules-curator-{LAST}"), 1);
    pr.is_draft = true;
    h.host.add_pr(pr);
    h.sessions.add(
        AgentSession::new(LAST, "curator", SessionState::InProgress).created_at(Utc::now()),
    );

    let report = h.tick().await;

    match report.session {
        SessionStep::Waiting {
            ref session_id,
            pr_number,
        } => {
            assert_eq!(session_id, LAST);
            assert_eq!(pr_number, 5);
        }
        ref other => panic!("expected to wait, got {other:?}"),
    }
    assert!(h.sessions.created().is_empty());
}

#[tokio::test]
async fn test_stuck_last_session_is_skipped() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    let mut pr = agent_pr(5, &format!("jules-curator-{LAST}"), 1);
    pr.is_draft = true;
    h.host.add_pr(pr);
    h.sessions
        .add(AgentSession::new(LAST, "curator", SessionState::InProgress).created_at(at(1)));

    let report = h.tick().await;

    // The stuck curator session is still live, so the janitor gets a new one.
    let (persona, start) = started(&report);
    assert_eq!(persona, "janitor");
    assert!(matches!(start, SessionStart::Created(_)));
}

#[tokio::test]
async fn test_merged_last_pr_moves_rotation_on() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    let mut pr = agent_pr(5, &format!("jules-curator-{LAST}"), 1);
    pr.state = Some("MERGED".into());
    h.host.add_pr(pr);
    h.sessions
        .add(AgentSession::new(LAST, "curator", SessionState::Completed).created_at(at(1)));

    let report = h.tick().await;

    assert_eq!(report.state.last_persona_id.as_deref(), Some("curator"));
    assert_eq!(started(&report).0, "janitor");
    assert_eq!(h.sessions.created().len(), 1);
}

#[tokio::test]
async fn test_wrap_starts_new_sprint() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    let mut pr = agent_pr(5, &format!("jules-qa-{LAST}"), 1);
    pr.state = Some("MERGED".into());
    h.host.add_pr(pr);
    h.sessions
        .add(AgentSession::new(LAST, "qa", SessionState::Completed).created_at(at(1)));

    let report = h.tick().await;

    assert_eq!(started(&report).0, "curator");
    assert_eq!(report.sprint, Some(2));
    assert_eq!(h.sprints.current_sprint().unwrap(), 2);
}

#[tokio::test]
async fn test_green_agent_pr_merged_during_tick() {
    let h = Harness::new(
        FakeGitHost::new()
            .with_branch("main", "M")
            .with_branch("jules", "M"),
        1,
    );
    h.host.add_pr(agent_pr(12, "jules-janitor-fix", 2));

    let report = h.tick().await;

    assert!(report.conflicts.is_empty());
    assert_eq!(
        h.host.pr(12).and_then(|pr| pr.state).as_deref(),
        Some("MERGED")
    );
}

#[tokio::test]
async fn test_drifted_branch_hands_work_to_reconciliation() {
    let h = Harness::new(
        FakeGitHost::new()
            .with_branch("main", "M2")
            .with_branch("jules", "J1"),
        3,
    );
    h.host.conflict("J1", "M2");
    h.host.set_diff(100, "+fn carried_over() {}\n");

    let report = h.tick().await;

    assert!(matches!(report.branch, Some(Outcome::Done(ref b)) if b.backup_branch == "jules-sprint-3"));
    let Some(Outcome::Done(reconciler)) = &report.reconciliation else {
        panic!("expected a reconciliation session, got {:?}", report.reconciliation);
    };
    assert_eq!(h.tracker.session_for(3).as_ref(), Some(reconciler));

    let created = h.sessions.created();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].title, "[Reconciliation] Sprint 3 drift");
    assert_eq!(created[1].title, "curator");
    assert_eq!(h.host.tip("jules").as_deref(), Some("M2"));
}

#[tokio::test]
async fn test_direct_trunk_merge_replaces_integration_pr() {
    let h = Harness::new(
        FakeGitHost::new()
            .with_branch("main", "M")
            .with_branch("jules", "J"),
        1,
    );
    let config = SchedulerConfig {
        direct_trunk_merge: true,
        ..config()
    };

    let report = h.tick_with(config).await;

    assert!(matches!(
        report.trunk,
        Some(TrunkStep::DirectMerge(TrunkMergeReport::Merged))
    ));
    assert_eq!(h.host.count_mutations("create-pr"), 0);
    assert!(h.host.mutations().contains(&"push HEAD -> main".to_string()));
}

#[tokio::test]
async fn test_dry_run_tick_touches_nothing() {
    let h = Harness::new(
        FakeGitHost::new()
            .with_branch("main", "M2")
            .with_branch("jules", "J1"),
        1,
    );
    h.host.conflict("J1", "M2");
    h.host.add_pr(agent_pr(12, "jules-janitor-fix", 2));
    let config = SchedulerConfig {
        dry_run: true,
        ..config()
    };

    let report = h.tick_with(config).await;

    assert!(report.dry_run);
    assert!(report.branch.is_none());
    assert!(matches!(started(&report).1, SessionStart::DryRun));
    assert!(h.host.mutations().is_empty());
    assert!(h.sessions.created().is_empty());
    assert_eq!(h.sprints.current_sprint().unwrap(), 1);
}

#[tokio::test]
async fn test_wait_for_pr_finds_session_pr() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    h.host.add_pr(agent_pr(31, &format!("jules-qa-{LAST}"), 1));
    h.sessions.add(
        AgentSession::new(LAST, "qa", SessionState::InProgress).created_at(Utc::now()),
    );

    let outcome = h
        .build(config())
        .orchestrator()
        .wait_for_pr(LAST, None, Duration::from_secs(60), 3)
        .await;

    assert_eq!(outcome, Outcome::Done(31));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_pr_approves_plan_then_gives_up() {
    let h = Harness::new(FakeGitHost::new().with_branch("main", "M"), 1);
    h.sessions.add(
        AgentSession::new(LAST, "qa", SessionState::AwaitingPlanApproval).created_at(Utc::now()),
    );

    let outcome = h
        .build(config())
        .orchestrator()
        .wait_for_pr(LAST, None, Duration::from_secs(60), 2)
        .await;

    assert!(matches!(outcome, Outcome::Skipped(_)));
    assert_eq!(h.sessions.approved(), vec![LAST.to_string(), LAST.to_string()]);
}

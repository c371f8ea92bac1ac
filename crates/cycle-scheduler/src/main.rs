//! `cycle-scheduler` binary.
//!
//! ```bash
//! # One tick against the checkout in the current directory
//! SESSION_API_KEY=... cycle-scheduler --schedule .team/schedules.toml tick
//!
//! # Inspect without touching anything
//! cycle-scheduler --dry-run state --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::{Outcome, Severity};
use serde::Serialize;
use tracing::{error, info};

use cycle_scheduler::git_cli::GitCli;
use cycle_scheduler::session_api::SessionApi;
use cycle_scheduler::trackers::{
    FileReconciliationTracker, FileSprintCounter, MemoryReconciliationTracker,
    ReconciliationTracker,
};
use cycle_scheduler::{CycleTick, GhCliHost, PersonaSchedule, SchedulerConfig, SessionClient};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Checkout to operate on (overrides SCHEDULER_REPO_DIR)
    #[arg(long, global = true)]
    repo_dir: Option<PathBuf>,

    /// Persona rotation file
    #[arg(long, global = true, default_value = ".team/schedules.toml")]
    schedule: PathBuf,

    /// Log what would change without changing anything (overrides SCHEDULER_DRY_RUN)
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one full scheduler tick
    Tick,
    /// Show where the persona rotation stands
    State {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Merge green agent PRs into the integration branch
    ReconcilePrs,
    /// Create the integration branch, or rotate it if it drifted
    EnsureBranch,
    /// Merge trunk into the integration branch
    Sync,
    /// Merge the integration branch straight into trunk
    MergeToTrunk,
    /// Open the integration → trunk PR if one is needed
    IntegrationPr,
    /// Check on a session and unblock it if it is waiting
    SessionStatus {
        /// Session id
        id: String,
    },
    /// Poll until a session's PR appears, unblocking the session meanwhile
    WaitForPr {
        /// Session id
        id: String,

        /// Seconds between polls
        #[arg(long, default_value_t = 60)]
        poll_secs: u64,

        /// Give up after this many polls
        #[arg(long, default_value_t = 30)]
        max_polls: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = SchedulerConfig::default();
    if let Some(dir) = args.repo_dir {
        config.repo_dir = dir;
    }
    config.dry_run |= args.dry_run;

    let mut cli = GitCli::new(&config.repo_dir);
    if let Some(identity) = config.commit_identity.clone() {
        cli = cli.with_identity(identity);
    }
    let host = GhCliHost::new(cli).with_repository(config.repository.clone());
    if config.repository.is_empty() {
        config.repository = host
            .detect_repository()
            .await
            .context("Set SCHEDULER_REPO or run inside a GitHub checkout")?;
    }

    let schedule = PersonaSchedule::load(&args.schedule)?;
    let sessions: Arc<dyn SessionApi> =
        Arc::new(SessionClient::from_env().context("Session API client")?);
    let sprints = Arc::new(FileSprintCounter::new(config.sprint_file()));
    let tracker: Arc<dyn ReconciliationTracker> = if config.dry_run {
        Arc::new(MemoryReconciliationTracker::new())
    } else {
        Arc::new(FileReconciliationTracker::new(config.reconciliation_file()))
    };

    info!(
        repo = %config.repository,
        branch = %config.integration_branch,
        trunk = %config.trunk_branch,
        personas = schedule.matcher.len(),
        dry_run = config.dry_run,
        "Cycle scheduler starting"
    );

    let dry_run = config.dry_run;
    let tick = CycleTick::new(config, schedule, Arc::new(host), sessions.clone(), sprints, tracker);

    let severity = match args.command {
        Command::Tick => {
            let report = tick.run().await?;
            print_json(&report)?;
            report.severity()
        }
        Command::State { json } => {
            let state = tick.cycle().compute_state().await?;
            if json {
                print_json(&state)?;
            } else {
                println!(
                    "last session: {}",
                    state.last_session_id.as_deref().unwrap_or("-")
                );
                println!(
                    "last persona: {}",
                    state.last_persona_id.as_deref().unwrap_or("-")
                );
                println!(
                    "next persona: {} (#{})",
                    state.next_persona_id, state.next_persona_index
                );
                println!("new sprint:   {}", state.should_increment_sprint);
            }
            Severity::Ok
        }
        Command::ReconcilePrs => {
            let conflicts = tick.prs().reconcile_all_prs(dry_run).await?;
            print_json(&conflicts)?;
            Severity::Ok
        }
        Command::EnsureBranch | Command::Sync if dry_run => {
            report_outcome(tick.branches().preview_upkeep().await?)?
        }
        Command::EnsureBranch => report_outcome(tick.branches().ensure_branch_exists().await?)?,
        Command::Sync => report_outcome(tick.branches().sync_with_main().await?)?,
        Command::MergeToTrunk => {
            let report = tick.branches().merge_into_trunk_direct(dry_run).await?;
            print_json(&report)?;
            Severity::Ok
        }
        Command::IntegrationPr => {
            if dry_run {
                info!(dry_run = true, "Skipping integration PR upkeep");
                Severity::Skipped
            } else {
                report_outcome(tick.prs().ensure_integration_pr_exists().await)?
            }
        }
        Command::SessionStatus { id } => {
            let session = sessions.get_session(&id).await?;
            let verdict = tick.orchestrator().handle_stuck_session(&id, None).await;
            print_json(&serde_json::json!({ "session": session, "verdict": verdict }))?;
            Severity::Ok
        }
        Command::WaitForPr {
            id,
            poll_secs,
            max_polls,
        } => report_outcome(
            tick.orchestrator()
                .wait_for_pr(&id, None, Duration::from_secs(poll_secs), max_polls)
                .await,
        )?,
    };

    if severity == Severity::Fatal {
        error!("Tick finished with a fatal outcome");
        std::process::exit(1);
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_outcome<T: Serialize>(outcome: Outcome<T>) -> Result<Severity> {
    print_json(&outcome)?;
    Ok(outcome.severity())
}

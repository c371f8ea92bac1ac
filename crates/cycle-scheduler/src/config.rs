use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::triage::DEFAULT_BOT_LOGINS;
use coordination::{AgentPrFilter, PersonaMatcher};
use serde::Deserialize;

use crate::git_cli::CommitIdentity;

/// Top-level scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Checkout the scheduler runs git in.
    pub repo_dir: PathBuf,
    /// `owner/repo`; empty lets `gh` infer it from the checkout.
    pub repository: String,
    /// Shared branch agent work lands on.
    pub integration_branch: String,
    pub trunk_branch: String,
    /// Agent branches are named `<prefix>-...`.
    pub branch_prefix: String,
    /// PRs touching only this directory are auto-resolved on conflict.
    pub metadata_dir: String,
    /// Reconciliation prompts truncate PR diffs past this many chars.
    pub diff_char_limit: usize,
    /// Sessions running longer than this are skipped.
    pub stuck_timeout: Duration,
    /// Sprint counter and reconciliation tracker files live here.
    pub state_dir: PathBuf,
    pub dry_run: bool,
    /// Merge the integration branch into trunk every tick instead of
    /// keeping an integration PR open for review.
    pub direct_trunk_merge: bool,
    pub bot_logins: Vec<String>,
    pub commit_identity: Option<CommitIdentity>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            repo_dir: path_from_env("SCHEDULER_REPO_DIR", "."),
            repository: string_from_env("SCHEDULER_REPO", ""),
            integration_branch: string_from_env("SCHEDULER_INTEGRATION_BRANCH", "jules"),
            trunk_branch: string_from_env("SCHEDULER_TRUNK_BRANCH", "main"),
            branch_prefix: string_from_env("SCHEDULER_BRANCH_PREFIX", "jules"),
            metadata_dir: string_from_env("SCHEDULER_METADATA_DIR", ".team/"),
            diff_char_limit: u64_from_env("SCHEDULER_DIFF_CHAR_LIMIT", 50_000) as usize,
            stuck_timeout: Duration::from_secs(
                u64_from_env("SCHEDULER_STUCK_TIMEOUT_MINS", 30) * 60,
            ),
            state_dir: path_from_env("SCHEDULER_STATE_DIR", ".team/state"),
            dry_run: bool_from_env("SCHEDULER_DRY_RUN", false),
            direct_trunk_merge: bool_from_env("SCHEDULER_DIRECT_TRUNK_MERGE", false),
            bot_logins: list_from_env("SCHEDULER_BOT_LOGINS")
                .unwrap_or_else(|| DEFAULT_BOT_LOGINS.iter().map(|s| s.to_string()).collect()),
            commit_identity: Self::identity_from_env(),
        }
    }
}

impl SchedulerConfig {
    fn identity_from_env() -> Option<CommitIdentity> {
        let name = std::env::var("SCHEDULER_GIT_NAME").ok()?;
        let email = std::env::var("SCHEDULER_GIT_EMAIL").ok()?;
        Some(CommitIdentity { name, email })
    }

    pub fn agent_pr_filter(&self) -> AgentPrFilter {
        AgentPrFilter::new(&self.integration_branch, &self.branch_prefix)
            .with_bot_logins(self.bot_logins.clone())
    }

    pub fn sprint_file(&self) -> PathBuf {
        self.state_dir.join("sprint.json")
    }

    pub fn reconciliation_file(&self) -> PathBuf {
        self.state_dir.join("reconciliation.json")
    }
}

fn string_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn path_from_env(var: &str, default: &str) -> PathBuf {
    PathBuf::from(string_from_env(var, default))
}

fn u64_from_env(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn bool_from_env(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn list_from_env(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// One persona's session settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonaSettings {
    /// Prompt sent when the persona's session starts.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Prompt loaded from a file, relative to the schedule file.
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
    /// Session title; defaults to the persona id.
    #[serde(default)]
    pub title: Option<String>,
}

/// The persona rotation, as written in `schedules.toml`.
///
/// ```toml
/// cycle = ["curator", "janitor", "qa"]
///
/// [personas.curator]
/// prompt_file = "personas/curator.md"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleFile {
    pub cycle: Vec<String>,
    #[serde(default)]
    pub personas: BTreeMap<String, PersonaSettings>,
}

/// Loaded rotation with prompts resolved.
#[derive(Debug, Clone)]
pub struct PersonaSchedule {
    pub matcher: PersonaMatcher,
    prompts: BTreeMap<String, String>,
    titles: BTreeMap<String, String>,
}

impl PersonaSchedule {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&raw, base).with_context(|| format!("Invalid schedule {}", path.display()))
    }

    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self> {
        let file: ScheduleFile = toml::from_str(raw).context("Failed to parse schedule TOML")?;
        let matcher = PersonaMatcher::new(file.cycle.clone())?;

        let mut prompts = BTreeMap::new();
        let mut titles = BTreeMap::new();
        for id in &file.cycle {
            let settings = file.personas.get(id).cloned().unwrap_or_default();
            let prompt = match (&settings.prompt, &settings.prompt_file) {
                (Some(text), _) => text.clone(),
                (None, Some(rel)) => {
                    let prompt_path = base_dir.join(rel);
                    std::fs::read_to_string(&prompt_path).with_context(|| {
                        format!("Failed to read prompt for '{id}' at {}", prompt_path.display())
                    })?
                }
                (None, None) => format!("Run the {id} persona on this repository."),
            };
            prompts.insert(id.clone(), prompt);
            titles.insert(id.clone(), settings.title.unwrap_or_else(|| id.clone()));
        }

        Ok(Self {
            matcher,
            prompts,
            titles,
        })
    }

    pub fn from_personas<I, S>(personas: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let matcher = PersonaMatcher::new(personas)?;
        let prompts = matcher
            .personas()
            .iter()
            .map(|id| (id.clone(), format!("Run the {id} persona on this repository.")))
            .collect();
        let titles = matcher
            .personas()
            .iter()
            .map(|id| (id.clone(), id.clone()))
            .collect();
        Ok(Self {
            matcher,
            prompts,
            titles,
        })
    }

    pub fn prompt_for(&self, persona_id: &str) -> Option<&str> {
        self.prompts.get(persona_id).map(String::as_str)
    }

    /// Title always carries the persona id so reuse lookups can find it.
    pub fn title_for(&self, persona_id: &str) -> String {
        match self.titles.get(persona_id) {
            Some(title) if title.contains(persona_id) => title.clone(),
            Some(title) => format!("{persona_id}: {title}"),
            None => persona_id.to_string(),
        }
    }
}

//! Stateful fakes for the scheduler's two collaborators.
//!
//! `FakeGitHost` models branch tips as opaque SHAs. Drift is a pair of
//! SHAs marked as conflicting, so resetting a branch to trunk's tip makes
//! it clean again without any extra bookkeeping. Every mutating call is
//! appended to a log tests can inspect.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use coordination::{AgentSession, CheckRun, Mergeable, PullRequest, SessionState};
use cycle_scheduler::error::{GitHostError, GitHostResult, SessionApiError};
use cycle_scheduler::git_host::{
    GitHost, MergeMethod, MergeOptions, MergeTrial, NewPullRequest, PrQuery, PrState, RefSource,
};
use cycle_scheduler::session_api::{SessionApi, SessionRequest};
use cycle_scheduler::SchedulerConfig;

/// How a scripted PR merge fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeFailure {
    RateLimited,
    Forbidden,
    Conflict,
}

impl MergeFailure {
    fn to_error(self, number: u64) -> GitHostError {
        let command = format!("gh pr merge {number}");
        match self {
            Self::RateLimited => GitHostError::command_failed(
                command,
                Some(1),
                "HTTP 429: secondary rate limit exceeded",
            ),
            Self::Forbidden => GitHostError::command_failed(
                command,
                Some(1),
                "HTTP 403: Resource not accessible by integration",
            ),
            Self::Conflict => GitHostError::command_failed(
                command,
                Some(1),
                "Pull request is not mergeable: the merge commit cannot be cleanly created",
            ),
        }
    }
}

#[derive(Default)]
struct HostState {
    tips: BTreeMap<String, String>,
    conflicts: HashSet<(String, String)>,
    /// `(base_sha, head_sha)` → commits in head not in base.
    ahead: HashMap<(String, String), u64>,
    unrelated: HashSet<(String, String)>,
    changed: HashMap<(String, String), Vec<String>>,
    trial_tool_error: bool,
    checkout: Option<(String, String)>,
    prs: BTreeMap<u64, PullRequest>,
    files: HashMap<u64, Vec<String>>,
    diffs: HashMap<u64, String>,
    merge_failures: HashMap<u64, (u32, MergeFailure)>,
    list_fails: bool,
    next_pr: u64,
    merge_counter: u64,
    mutations: Vec<String>,
}

pub struct FakeGitHost {
    state: Mutex<HostState>,
}

impl FakeGitHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                next_pr: 100,
                ..HostState::default()
            }),
        }
    }

    pub fn with_branch(self, branch: &str, sha: &str) -> Self {
        self.set_tip(branch, sha);
        self
    }

    pub fn set_tip(&self, branch: &str, sha: &str) {
        self.state
            .lock()
            .unwrap()
            .tips
            .insert(branch.to_string(), sha.to_string());
    }

    pub fn tip(&self, branch: &str) -> Option<String> {
        self.state.lock().unwrap().tips.get(branch).cloned()
    }

    /// Merging either SHA into the other conflicts.
    pub fn conflict(&self, a: &str, b: &str) {
        let mut state = self.state.lock().unwrap();
        state.conflicts.insert((a.to_string(), b.to_string()));
        state.conflicts.insert((b.to_string(), a.to_string()));
    }

    pub fn set_ahead(&self, base_sha: &str, head_sha: &str, count: u64) {
        self.state
            .lock()
            .unwrap()
            .ahead
            .insert((base_sha.to_string(), head_sha.to_string()), count);
    }

    pub fn set_unrelated(&self, a: &str, b: &str, changed: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.unrelated.insert((a.to_string(), b.to_string()));
        state.unrelated.insert((b.to_string(), a.to_string()));
        state.changed.insert(
            (a.to_string(), b.to_string()),
            changed.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn break_merge_trial(&self) {
        self.state.lock().unwrap().trial_tool_error = true;
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().list_fails = true;
    }

    pub fn add_pr(&self, pr: PullRequest) {
        self.state.lock().unwrap().prs.insert(pr.number, pr);
    }

    pub fn pr(&self, number: u64) -> Option<PullRequest> {
        self.state.lock().unwrap().prs.get(&number).cloned()
    }

    pub fn set_files(&self, number: u64, files: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(number, files.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_diff(&self, number: u64, diff: &str) {
        self.state
            .lock()
            .unwrap()
            .diffs
            .insert(number, diff.to_string());
    }

    /// The next `calls` merge calls for `number` fail.
    pub fn fail_merges(&self, number: u64, calls: u32, failure: MergeFailure) {
        self.state
            .lock()
            .unwrap()
            .merge_failures
            .insert(number, (calls, failure));
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn count_mutations(&self, prefix: &str) -> usize {
        self.mutations()
            .iter()
            .filter(|m| m.starts_with(prefix))
            .count()
    }

    fn resolve(state: &HostState, branch: &str) -> GitHostResult<String> {
        state
            .tips
            .get(branch)
            .cloned()
            .ok_or_else(|| GitHostError::NotFound(format!("origin/{branch}")))
    }
}

#[async_trait]
impl GitHost for FakeGitHost {
    async fn fetch(&self) -> GitHostResult<()> {
        Ok(())
    }

    async fn remote_branch_exists(&self, branch: &str) -> GitHostResult<bool> {
        Ok(self.state.lock().unwrap().tips.contains_key(branch))
    }

    async fn resolve_remote(&self, branch: &str) -> GitHostResult<String> {
        Self::resolve(&self.state.lock().unwrap(), branch)
    }

    async fn push_ref(&self, source: RefSource<'_>, branch: &str) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        let sha = match source {
            RefSource::Branch(name) => Self::resolve(&state, name)?,
            RefSource::Commit(sha) => sha.to_string(),
        };
        state.mutations.push(format!("push {sha} -> {branch}"));
        state.tips.insert(branch.to_string(), sha);
        Ok(())
    }

    async fn delete_remote_branch(&self, branch: &str) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("delete {branch}"));
        state.tips.remove(branch);
        Ok(())
    }

    async fn merge_trial(&self, ours: &str, theirs: &str) -> GitHostResult<MergeTrial> {
        let state = self.state.lock().unwrap();
        if state.trial_tool_error {
            return Ok(MergeTrial::ToolError {
                code: Some(128),
                stderr: "fatal: unknown option `write-tree'".into(),
            });
        }
        let pair = (Self::resolve(&state, ours)?, Self::resolve(&state, theirs)?);
        Ok(if state.conflicts.contains(&pair) {
            MergeTrial::Conflict
        } else {
            MergeTrial::Clean
        })
    }

    async fn checkout_remote(&self, branch: &str) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        let sha = Self::resolve(&state, branch)?;
        state.checkout = Some((branch.to_string(), sha));
        Ok(())
    }

    async fn checkout_pr(&self, number: u64) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        let head = state
            .prs
            .get(&number)
            .map(|pr| pr.head_ref.clone())
            .ok_or_else(|| GitHostError::NotFound(format!("PR #{number}")))?;
        let sha = state
            .tips
            .get(&head)
            .cloned()
            .unwrap_or_else(|| format!("pr-{number}"));
        state.checkout = Some((head, sha));
        Ok(())
    }

    async fn merge_into_checkout(&self, source: &str, options: MergeOptions) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        let (branch, head) = state
            .checkout
            .clone()
            .ok_or_else(|| GitHostError::NotFound("checkout".into()))?;
        let theirs = Self::resolve(&state, source)?;
        if !options.prefer_ours && state.conflicts.contains(&(head.clone(), theirs.clone())) {
            return Err(GitHostError::Conflict {
                command: format!("git merge origin/{source}"),
                stderr: "Automatic merge failed; fix conflicts".into(),
            });
        }
        state.merge_counter += 1;
        let merged = format!("merge{}({head}+{theirs})", state.merge_counter);
        state.checkout = Some((branch, merged));
        Ok(())
    }

    async fn push_checkout(&self, branch: &str) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        let (_, head) = state
            .checkout
            .clone()
            .ok_or_else(|| GitHostError::NotFound("checkout".into()))?;
        state.mutations.push(format!("push HEAD -> {branch}"));
        state.tips.insert(branch.to_string(), head);
        Ok(())
    }

    async fn merge_base(&self, a: &str, b: &str) -> GitHostResult<Option<String>> {
        let state = self.state.lock().unwrap();
        let pair = (Self::resolve(&state, a)?, Self::resolve(&state, b)?);
        Ok((!state.unrelated.contains(&pair)).then(|| "base".to_string()))
    }

    async fn count_commits(&self, base: &str, head: &str) -> GitHostResult<u64> {
        let state = self.state.lock().unwrap();
        let pair = (Self::resolve(&state, base)?, Self::resolve(&state, head)?);
        if pair.0 == pair.1 {
            return Ok(0);
        }
        Ok(state.ahead.get(&pair).copied().unwrap_or(0))
    }

    async fn changed_paths(&self, base: &str, head: &str) -> GitHostResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let pair = (Self::resolve(&state, base)?, Self::resolve(&state, head)?);
        Ok(state.changed.get(&pair).cloned().unwrap_or_default())
    }

    async fn list_pull_requests(&self, query: &PrQuery) -> GitHostResult<Vec<PullRequest>> {
        let state = self.state.lock().unwrap();
        if state.list_fails {
            return Err(GitHostError::command_failed(
                "gh pr list",
                Some(1),
                "HTTP 502",
            ));
        }
        Ok(state
            .prs
            .values()
            .filter(|pr| query.state == PrState::All || pr.is_open())
            .filter(|pr| query.head.as_deref().map_or(true, |h| pr.head_ref == h))
            .filter(|pr| query.base.as_deref().map_or(true, |b| pr.base_ref == b))
            .cloned()
            .collect())
    }

    async fn pull_request(&self, number: u64) -> GitHostResult<PullRequest> {
        self.state
            .lock()
            .unwrap()
            .prs
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHostError::NotFound(format!("PR #{number}")))
    }

    async fn pull_request_files(&self, number: u64) -> GitHostResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .files
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn pull_request_diff(&self, number: u64) -> GitHostResult<String> {
        self.state
            .lock()
            .unwrap()
            .diffs
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHostError::NotFound(format!("diff of PR #{number}")))
    }

    async fn create_pull_request(&self, new: &NewPullRequest) -> GitHostResult<u64> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_pr;
        state.next_pr += 1;
        let mut pr = PullRequest::new(number, &new.head, &new.base);
        pr.body = Some(new.body.clone());
        pr.state = Some("OPEN".into());
        state.prs.insert(number, pr);
        state
            .mutations
            .push(format!("create-pr #{number} {} -> {}: {}", new.head, new.base, new.title));
        Ok(number)
    }

    async fn retarget_pull_request(&self, number: u64, base: &str) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("retarget #{number} -> {base}"));
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.base_ref = base.to_string();
        }
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!(
            "merge-pr #{number} {}{}",
            method.flag(),
            if delete_branch { " --delete-branch" } else { "" }
        ));
        if let Some((remaining, failure)) = state.merge_failures.get_mut(&number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(failure.to_error(number));
            }
        }
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.state = Some("MERGED".into());
        }
        Ok(())
    }

    async fn mark_ready(&self, number: u64) -> GitHostResult<()> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("ready #{number}"));
        if let Some(pr) = state.prs.get_mut(&number) {
            pr.is_draft = false;
        }
        Ok(())
    }
}

#[derive(Default)]
struct SessionsState {
    sessions: Vec<AgentSession>,
    created: Vec<SessionRequest>,
    approved: Vec<String>,
    messages: Vec<(String, String)>,
    fail_list: bool,
    fail_create: bool,
    next_id: u64,
}

/// In-memory session API.
pub struct FakeSessions {
    state: Mutex<SessionsState>,
}

impl FakeSessions {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionsState {
                next_id: 900_000_000_000_000_001,
                ..SessionsState::default()
            }),
        }
    }

    pub fn add(&self, session: AgentSession) {
        self.state.lock().unwrap().sessions.push(session);
    }

    pub fn created(&self) -> Vec<SessionRequest> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn approved(&self) -> Vec<String> {
        self.state.lock().unwrap().approved.clone()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().unwrap().fail_create = true;
    }
}

fn unavailable() -> SessionApiError {
    SessionApiError::Status {
        status: 500,
        body: "internal error".into(),
    }
}

#[async_trait]
impl SessionApi for FakeSessions {
    async fn list_sessions(&self) -> Result<Vec<AgentSession>, SessionApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(unavailable());
        }
        Ok(state.sessions.clone())
    }

    async fn get_session(&self, id: &str) -> Result<AgentSession, SessionApiError> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or(SessionApiError::Status {
                status: 404,
                body: format!("session {id} not found"),
            })
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<AgentSession, SessionApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(unavailable());
        }
        let id = state.next_id.to_string();
        state.next_id += 1;
        let session = AgentSession::new(&id, &request.title, SessionState::Queued).created_at(Utc::now());
        state.sessions.push(session.clone());
        state.created.push(request.clone());
        Ok(session)
    }

    async fn approve_plan(&self, id: &str) -> Result<(), SessionApiError> {
        self.state.lock().unwrap().approved.push(id.to_string());
        Ok(())
    }

    async fn send_message(&self, id: &str, message: &str) -> Result<(), SessionApiError> {
        self.state
            .lock()
            .unwrap()
            .messages
            .push((id.to_string(), message.to_string()));
        Ok(())
    }
}

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
}

/// Green, mergeable agent PR against `jules`.
pub fn agent_pr(number: u64, head: &str, created_hour: u32) -> PullRequest {
    let mut pr = PullRequest::new(number, head, "jules");
    pr.mergeable = Mergeable::Mergeable;
    pr.merge_state = Some("CLEAN".into());
    pr.checks = vec![CheckRun::completed("ci", "SUCCESS")];
    pr.created_at = Some(at(created_hour));
    pr.state = Some("OPEN".into());
    pr
}

pub fn config() -> SchedulerConfig {
    SchedulerConfig {
        repository: "acme/site".into(),
        integration_branch: "jules".into(),
        trunk_branch: "main".into(),
        branch_prefix: "jules".into(),
        metadata_dir: ".team/".into(),
        dry_run: false,
        direct_trunk_merge: false,
        ..SchedulerConfig::default()
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

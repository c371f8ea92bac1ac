//! [`GitHost`] backed by the `git` and `gh` CLIs.
//!
//! The scheduler already runs inside a checkout with `gh` authenticated,
//! so shelling out keeps credentials and remote config where the operator
//! put them.

use async_trait::async_trait;
use coordination::naming::pr_number_from_url;
use coordination::pull_request::GH_PR_FIELDS;
use coordination::PullRequest;
use serde::Deserialize;

use crate::error::{GitHostError, GitHostResult};
use crate::git_cli::GitCli;
use crate::git_host::{
    GitHost, MergeMethod, MergeOptions, MergeTrial, NewPullRequest, PrQuery, RefSource,
};

const DEFAULT_LIST_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct PrFiles {
    #[serde(default)]
    files: Vec<PrFile>,
}

#[derive(Debug, Deserialize)]
struct PrFile {
    path: String,
}

pub struct GhCliHost {
    cli: GitCli,
    /// `owner/repo`; when empty `gh` infers it from the checkout.
    repository: Option<String>,
}

impl GhCliHost {
    pub fn new(cli: GitCli) -> Self {
        Self {
            cli,
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        let repository = repository.into();
        self.repository = (!repository.is_empty()).then_some(repository);
        self
    }

    /// gh args with `--repo` appended when a repository is pinned.
    fn gh_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut all = args.to_vec();
        if let Some(repo) = &self.repository {
            all.extend(["--repo", repo.as_str()]);
        }
        all
    }

    async fn gh(&self, args: &[&str]) -> GitHostResult<String> {
        self.cli.gh(&self.gh_args(args)).await
    }

    /// `owner/repo` of the checkout, as `gh` resolves it.
    pub async fn detect_repository(&self) -> GitHostResult<String> {
        if let Some(repo) = &self.repository {
            return Ok(repo.clone());
        }
        let name = self
            .cli
            .gh(&["repo", "view", "--json", "nameWithOwner", "--jq", ".nameWithOwner"])
            .await?;
        if name.is_empty() {
            return Err(GitHostError::NotFound("repository for checkout".into()));
        }
        Ok(name)
    }
}

#[async_trait]
impl GitHost for GhCliHost {
    async fn fetch(&self) -> GitHostResult<()> {
        self.cli
            .git_with_retry(&["fetch", self.cli.remote(), "--prune"])
            .await?;
        Ok(())
    }

    async fn remote_branch_exists(&self, branch: &str) -> GitHostResult<bool> {
        let refs = self
            .cli
            .git(&["ls-remote", "--heads", self.cli.remote(), branch])
            .await?;
        let wanted = format!("refs/heads/{branch}");
        Ok(refs.lines().any(|line| line.ends_with(&wanted)))
    }

    async fn resolve_remote(&self, branch: &str) -> GitHostResult<String> {
        self.cli.git(&["rev-parse", &self.cli.tracking(branch)]).await
    }

    async fn push_ref(&self, source: RefSource<'_>, branch: &str) -> GitHostResult<()> {
        let source = match source {
            RefSource::Branch(name) => self.cli.tracking(name),
            RefSource::Commit(sha) => sha.to_string(),
        };
        let refspec = format!("{source}:refs/heads/{branch}");
        self.cli
            .git_with_retry(&["push", "--force", self.cli.remote(), &refspec])
            .await?;
        Ok(())
    }

    async fn delete_remote_branch(&self, branch: &str) -> GitHostResult<()> {
        self.cli
            .git(&["push", self.cli.remote(), "--delete", branch])
            .await?;
        Ok(())
    }

    async fn merge_trial(&self, ours: &str, theirs: &str) -> GitHostResult<MergeTrial> {
        let output = self
            .cli
            .git_output(&[
                "merge-tree",
                "--write-tree",
                &self.cli.tracking(ours),
                &self.cli.tracking(theirs),
            ])
            .await?;
        Ok(match output.status.code() {
            Some(0) => MergeTrial::Clean,
            Some(1) => MergeTrial::Conflict,
            code => MergeTrial::ToolError {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
        })
    }

    async fn checkout_remote(&self, branch: &str) -> GitHostResult<()> {
        self.cli
            .git(&["checkout", "-B", branch, &self.cli.tracking(branch)])
            .await?;
        Ok(())
    }

    async fn checkout_pr(&self, number: u64) -> GitHostResult<()> {
        // `gh pr checkout` resolves the repo from the checkout itself.
        self.cli
            .gh(&["pr", "checkout", &number.to_string(), "--force"])
            .await?;
        Ok(())
    }

    async fn merge_into_checkout(&self, source: &str, options: MergeOptions) -> GitHostResult<()> {
        let tracking = self.cli.tracking(source);
        let mut args = vec!["merge", tracking.as_str(), "--no-edit"];
        if options.allow_unrelated {
            args.push("--allow-unrelated-histories");
        }
        if options.prefer_ours {
            args.extend(["-X", "ours"]);
        }
        match self.cli.git(&args).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Leave the checkout clean for whatever runs next.
                let _ = self.cli.git(&["merge", "--abort"]).await;
                Err(e)
            }
        }
    }

    async fn push_checkout(&self, branch: &str) -> GitHostResult<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.cli
            .git_with_retry(&["push", self.cli.remote(), &refspec])
            .await?;
        Ok(())
    }

    async fn merge_base(&self, a: &str, b: &str) -> GitHostResult<Option<String>> {
        let output = self
            .cli
            .git_output(&["merge-base", &self.cli.tracking(a), &self.cli.tracking(b)])
            .await?;
        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            // Exit 1 with no output: the histories are unrelated.
            Some(1) => Ok(None),
            code => Err(GitHostError::command_failed(
                format!("git merge-base {a} {b}"),
                code,
                String::from_utf8_lossy(&output.stderr).trim(),
            )),
        }
    }

    async fn count_commits(&self, base: &str, head: &str) -> GitHostResult<u64> {
        let range = format!("{}..{}", self.cli.tracking(base), self.cli.tracking(head));
        let count = self.cli.git(&["rev-list", "--count", &range]).await?;
        count
            .parse()
            .map_err(|e| GitHostError::parse("rev-list count", e))
    }

    async fn changed_paths(&self, base: &str, head: &str) -> GitHostResult<Vec<String>> {
        let paths = self
            .cli
            .git(&[
                "diff-tree",
                "-r",
                "--name-only",
                &self.cli.tracking(base),
                &self.cli.tracking(head),
            ])
            .await?;
        Ok(paths
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect())
    }

    async fn list_pull_requests(&self, query: &PrQuery) -> GitHostResult<Vec<PullRequest>> {
        let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).to_string();
        let mut args = vec![
            "pr",
            "list",
            "--state",
            query.state.as_str(),
            "--json",
            GH_PR_FIELDS,
            "--limit",
            limit.as_str(),
        ];
        if let Some(head) = &query.head {
            args.extend(["--head", head.as_str()]);
        }
        if let Some(base) = &query.base {
            args.extend(["--base", base.as_str()]);
        }
        let raw = self.gh(&args).await?;
        PullRequest::parse_list(raw.as_bytes()).map_err(|e| GitHostError::parse("gh pr list", e))
    }

    async fn pull_request(&self, number: u64) -> GitHostResult<PullRequest> {
        let number = number.to_string();
        let raw = self
            .gh(&["pr", "view", &number, "--json", GH_PR_FIELDS])
            .await?;
        serde_json::from_str(&raw).map_err(|e| GitHostError::parse("gh pr view", e))
    }

    async fn pull_request_files(&self, number: u64) -> GitHostResult<Vec<String>> {
        let number = number.to_string();
        let raw = self.gh(&["pr", "view", &number, "--json", "files"]).await?;
        let files: PrFiles =
            serde_json::from_str(&raw).map_err(|e| GitHostError::parse("gh pr files", e))?;
        Ok(files.files.into_iter().map(|f| f.path).collect())
    }

    async fn pull_request_diff(&self, number: u64) -> GitHostResult<String> {
        self.gh(&["pr", "diff", &number.to_string()]).await
    }

    async fn create_pull_request(&self, pr: &NewPullRequest) -> GitHostResult<u64> {
        let url = self
            .gh(&[
                "pr", "create", "--head", &pr.head, "--base", &pr.base, "--title", &pr.title,
                "--body", &pr.body,
            ])
            .await?;
        pr_number_from_url(&url)
            .ok_or_else(|| GitHostError::parse("gh pr create output", format!("no PR number in '{url}'")))
    }

    async fn retarget_pull_request(&self, number: u64, base: &str) -> GitHostResult<()> {
        self.gh(&["pr", "edit", &number.to_string(), "--base", base])
            .await?;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
    ) -> GitHostResult<()> {
        let number = number.to_string();
        let mut args = vec!["pr", "merge", number.as_str(), method.flag()];
        if delete_branch {
            args.push("--delete-branch");
        }
        self.gh(&args).await?;
        Ok(())
    }

    async fn mark_ready(&self, number: u64) -> GitHostResult<()> {
        self.gh(&["pr", "ready", &number.to_string()]).await?;
        Ok(())
    }
}

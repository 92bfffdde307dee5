//! Thin async wrapper over the `gh` command line client.

use crate::error::{CliError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Upper bound for a single `gh` invocation
pub const DEFAULT_GH_TIMEOUT: Duration = Duration::from_secs(300);

/// Raw result of a `gh` invocation
#[derive(Debug, Clone)]
pub struct GhOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// `gh` invoker bound to a repository
#[derive(Debug, Clone)]
pub struct GhCli {
    bin: String,
    repo: Option<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

/// Pull request as listed by `gh pr list/view --json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestInfo {
    pub number: u64,
    pub url: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub merged_at: Option<String>,
}

/// Release as shown by `gh release view --json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub url: String,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// Release asset entry
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
}

/// Workflow run as listed by `gh run list/view --json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunInfo {
    pub database_id: u64,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub url: String,
}

/// Milestone as returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct MilestoneInfo {
    pub number: u64,
    pub title: String,
    pub state: String,
}

impl GhCli {
    /// Create an invoker; `repo` is passed as `--repo` when set
    pub fn new(bin: impl Into<String>, repo: Option<String>) -> Self {
        Self {
            bin: bin.into(),
            repo,
            working_dir: None,
            timeout: DEFAULT_GH_TIMEOUT,
        }
    }

    /// Kill invocations that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `gh` from this directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Repository slug, if configured
    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    fn repo_args(&self) -> Vec<String> {
        match &self.repo {
            Some(repo) => vec!["--repo".to_string(), repo.clone()],
            None => Vec::new(),
        }
    }

    /// `owner/name` for REST paths; `{owner}/{repo}` lets gh resolve it from the checkout
    pub fn api_repo_path(&self) -> String {
        self.repo.clone().unwrap_or_else(|| "{owner}/{repo}".to_string())
    }

    /// Run `gh` and return its output whatever the exit status
    pub async fn run_raw(&self, args: &[String]) -> Result<GhOutput> {
        log::debug!("Running {} {}", self.bin, args.join(" "));
        let mut command = Command::new(&self.bin);
        command.args(args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let label = format!("{} {}", self.bin, args.first().map(String::as_str).unwrap_or(""));
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(output) => output.map_err(|e| CliError::ExecutionFailed {
                command: label,
                reason: e.to_string(),
            })?,
            Err(_) => {
                return Err(CliError::ExecutionFailed {
                    command: label,
                    reason: format!("timed out after {}s", self.timeout.as_secs_f64()),
                }
                .into());
            }
        };

        Ok(GhOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Run `gh`, failing on a non-zero exit status
    pub async fn run(&self, args: &[String]) -> Result<String> {
        let output = self.run_raw(args).await?;
        if !output.success {
            return Err(CliError::ExecutionFailed {
                command: format!("{} {}", self.bin, args.join(" ")),
                reason: if output.stderr.is_empty() {
                    output.stdout.trim().to_string()
                } else {
                    output.stderr
                },
            }
            .into());
        }
        Ok(output.stdout)
    }

    /// Run `gh` and decode its JSON output
    pub async fn json<T: DeserializeOwned>(&self, args: &[String]) -> Result<T> {
        let stdout = self.run(args).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Run a repository-scoped subcommand (`pr`, `release`, `run`, `workflow`)
    pub async fn repo_command(&self, args: &[&str]) -> Result<String> {
        self.run(&self.scoped(args)).await
    }

    fn scoped(&self, args: &[&str]) -> Vec<String> {
        let mut full: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        full.extend(self.repo_args());
        full
    }

    /// Pull requests for a head branch, in any state
    pub async fn pull_requests_for_head(&self, head: &str) -> Result<Vec<PullRequestInfo>> {
        // `gh pr list --head` matches the branch name without an owner prefix
        let branch = head.rsplit(':').next().unwrap_or(head);
        let args = self.scoped(&[
            "pr", "list", "--head", branch, "--state", "all", "--json", "number,url,state,mergedAt",
        ]);
        self.json(&args).await
    }

    /// View one pull request
    pub async fn pull_request(&self, number: &str) -> Result<PullRequestInfo> {
        let args = self.scoped(&["pr", "view", number, "--json", "number,url,state,mergedAt"]);
        self.json(&args).await
    }

    /// View a release, `None` if the tag has no release
    pub async fn release(&self, tag: &str) -> Result<Option<ReleaseInfo>> {
        let args = self.scoped(&["release", "view", tag, "--json", "url,tagName,isPrerelease,assets"]);
        let output = self.run_raw(&args).await?;
        if output.success {
            return Ok(Some(serde_json::from_str(&output.stdout)?));
        }
        if output.stderr.to_lowercase().contains("not found") {
            return Ok(None);
        }
        Err(CliError::ExecutionFailed {
            command: format!("{} release view {}", self.bin, tag),
            reason: output.stderr,
        }
        .into())
    }

    /// Recent `workflow_dispatch` runs of a workflow, newest first
    pub async fn dispatch_runs(&self, workflow: &str) -> Result<Vec<WorkflowRunInfo>> {
        let args = self.scoped(&[
            "run",
            "list",
            "--workflow",
            workflow,
            "--event",
            "workflow_dispatch",
            "--limit",
            "20",
            "--json",
            "databaseId,createdAt,status,conclusion,url",
        ]);
        self.json(&args).await
    }

    /// View one workflow run
    pub async fn workflow_run(&self, run_id: u64) -> Result<WorkflowRunInfo> {
        let id = run_id.to_string();
        let args = self.scoped(&[
            "run",
            "view",
            id.as_str(),
            "--json",
            "databaseId,createdAt,status,conclusion,url",
        ]);
        self.json(&args).await
    }

    /// REST call through `gh api`
    pub async fn api<T: DeserializeOwned>(
        &self,
        method: &str,
        endpoint: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<T> {
        let mut args = vec!["api".to_string()];
        if method != "GET" {
            args.push("-X".to_string());
            args.push(method.to_string());
        }
        args.push(endpoint.to_string());
        for (key, value) in fields {
            args.push("-f".to_string());
            args.push(format!("{}={}", key, value));
        }
        self.json(&args).await
    }

    /// GraphQL call through `gh api graphql`
    pub async fn graphql(
        &self,
        query: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<serde_json::Value> {
        let mut args = vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={}", query),
        ];
        for (key, value) in variables {
            // -f keeps values as strings; ids and titles must not be coerced
            args.push("-f".to_string());
            args.push(format!("{}={}", key, value));
        }
        let value: serde_json::Value = self.json(&args).await?;
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array())
            && !errors.is_empty()
        {
            let messages = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CliError::ExecutionFailed {
                command: format!("{} api graphql", self.bin),
                reason: messages,
            }
            .into());
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_invocation_is_killed() {
        let gh = GhCli::new("sleep", None).with_timeout(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = gh.run_raw(&["30".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_repo_scoping() {
        let gh = GhCli::new("gh", Some("acme/widget".into()));
        assert_eq!(
            gh.scoped(&["pr", "view", "7"]),
            vec!["pr", "view", "7", "--repo", "acme/widget"]
        );
        assert_eq!(gh.api_repo_path(), "acme/widget");

        let unscoped = GhCli::new("gh", None);
        assert_eq!(unscoped.scoped(&["pr", "view", "7"]), vec!["pr", "view", "7"]);
        assert_eq!(unscoped.api_repo_path(), "{owner}/{repo}");
    }

    #[test]
    fn test_decode_workflow_run() {
        let run: WorkflowRunInfo = serde_json::from_str(
            r#"{"databaseId": 99, "createdAt": "2026-03-01T10:00:00Z", "status": "completed",
                "conclusion": "success", "url": "https://github.com/acme/widget/actions/runs/99"}"#,
        )
        .unwrap();
        assert_eq!(run.database_id, 99);
        assert_eq!(run.conclusion.as_deref(), Some("success"));
        assert!(run.created_at.is_some());
    }
}

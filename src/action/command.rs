//! Action runner driving `git`, `gh` and plain HTTP.
//!
//! Every action that creates something remote first looks for the artifact,
//! so re-entering `running` after a crash reuses what the interrupted attempt
//! already created.

use super::capture::{apply_captures, extract_pr_number, extract_url};
use super::render::render_action;
use super::{ActionOutcome, ActionRunner};
use crate::error::{CliError, Result};
use crate::github::{GhCli, MilestoneInfo, WorkflowRunInfo};
use crate::plan::{StepAction, StepDefinition};
use crate::state::{CapturedOutputs, ReleaseRun};
use crate::template::TemplateContext;
use crate::wait::JobHandle;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Clock skew tolerated when matching a dispatched workflow run
const DISPATCH_SKEW_SECS: i64 = 5;
/// Delay between lookups of a freshly dispatched run
const DISPATCH_LOOKUP_INTERVAL: Duration = Duration::from_secs(5);

/// Production action runner
#[derive(Debug, Clone)]
pub struct CommandActionRunner {
    gh: GhCli,
    git_bin: String,
    repo_root: PathBuf,
    http: reqwest::Client,
}

impl CommandActionRunner {
    /// Create a runner executing from `repo_root`
    pub fn new(gh: GhCli, git_bin: impl Into<String>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            gh,
            git_bin: git_bin.into(),
            repo_root: repo_root.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn run_action(
        &self,
        step: &StepDefinition,
        action: StepAction,
        run: &ReleaseRun,
    ) -> Result<ActionOutcome> {
        let record = run.step(&step.name);
        let first_started = record.and_then(|r| r.started_at);
        let attempt = record.map(|r| r.attempts).unwrap_or(1);
        log::info!("Executing {} for step '{}' (attempt {})", action.kind(), step.name, attempt);

        match action {
            StepAction::Noop => Ok(ActionOutcome::done()),
            StepAction::Command {
                program,
                args,
                working_dir,
                env,
                capture,
            } => {
                let dir = match working_dir {
                    Some(dir) => self.repo_root.join(dir),
                    None => self.repo_root.clone(),
                };
                let stdout = match self.exec(&program, &args, &dir, &env).await? {
                    Ok(stdout) => stdout,
                    Err(detail) => return Ok(ActionOutcome::failed(detail)),
                };
                Ok(match apply_captures(&capture, &stdout) {
                    Ok(outputs) => ActionOutcome::Succeeded { outputs, job: None },
                    Err(detail) => ActionOutcome::failed(detail),
                })
            }
            StepAction::PushBranch { remote, branch } => {
                let args = vec![
                    "push".to_string(),
                    "-u".to_string(),
                    remote.clone(),
                    branch.clone(),
                ];
                match self.exec(&self.git_bin, &args, &self.repo_root, &BTreeMap::new()).await? {
                    Ok(_) => Ok(outputs_of([("remote", json!(remote)), ("branch", json!(branch))])),
                    Err(detail) => Ok(ActionOutcome::failed(detail)),
                }
            }
            StepAction::CreatePullRequest {
                head,
                base,
                title,
                body,
                draft,
            } => self.create_pull_request(&head, &base, &title, &body, draft).await,
            StepAction::CreateRelease {
                tag,
                title,
                notes,
                target,
                prerelease,
            } => {
                self.create_release(&tag, title.as_deref(), &notes, target.as_deref(), prerelease)
                    .await
            }
            StepAction::PromoteRelease { tag, latest } => {
                let mut args = vec!["release", "edit", tag.as_str(), "--prerelease=false"];
                if latest {
                    args.push("--latest");
                }
                self.gh.repo_command(&args).await?;
                let url = self.gh.release(&tag).await?.map(|r| r.url).unwrap_or_default();
                Ok(outputs_of([("release_tag", json!(tag)), ("release_url", json!(url))]))
            }
            StepAction::DispatchWorkflow {
                workflow,
                git_ref,
                inputs,
                start_timeout_secs,
            } => {
                self.dispatch_workflow(
                    &workflow,
                    &git_ref,
                    &inputs,
                    Duration::from_secs(start_timeout_secs),
                    first_started,
                )
                .await
            }
            StepAction::CreateDiscussion {
                category,
                title,
                body,
                fallback_manual,
            } => match self.create_discussion(&category, &title, &body).await {
                Ok(outcome) => Ok(outcome),
                Err(e) if fallback_manual => {
                    log::warn!("Discussion creation failed, manual posting required: {}", e);
                    let slug = self.gh.repo().unwrap_or("{owner}/{repo}").to_string();
                    Ok(outputs_of([
                        ("announcement_status", json!("manual_required")),
                        ("announcement_title", json!(title)),
                        ("announcement_error", json!(e.to_string())),
                        (
                            "announcement_manual_url",
                            json!(format!(
                                "https://github.com/{}/discussions/new?category={}",
                                slug,
                                category.to_lowercase()
                            )),
                        ),
                    ]))
                }
                Err(e) => Err(e),
            },
            StepAction::ManageMilestones { close, create } => {
                self.manage_milestones(close.as_deref(), create.as_deref()).await
            }
            StepAction::Http {
                method,
                url,
                headers,
                body,
            } => self.http_request(&method, &url, &headers, body.as_ref()).await,
            StepAction::WaitPullRequestMerge { pr_number } => Ok(ActionOutcome::Succeeded {
                outputs: CapturedOutputs::new(),
                job: Some(JobHandle::PullRequestMerge { number: pr_number }),
            }),
            StepAction::VerifyReleaseAssets { tag, assets } => Ok(ActionOutcome::Succeeded {
                outputs: CapturedOutputs::new(),
                job: Some(JobHandle::ReleaseAssets { tag, assets }),
            }),
        }
    }

    /// Run a program; the inner `Err` is a non-zero exit with its detail
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        dir: &std::path::Path,
        env: &BTreeMap<String, String>,
    ) -> Result<std::result::Result<String, String>> {
        log::debug!("Running {} {} in {}", program, args.join(" "), dir.display());
        let output = Command::new(program)
            .args(args)
            .envs(env)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CliError::ExecutionFailed {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(Ok(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Ok(Err(format!(
            "{} exited with {}: {}",
            program,
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            detail
        )))
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
    ) -> Result<ActionOutcome> {
        let existing = self.gh.pull_requests_for_head(head).await?;
        if let Some(pr) = existing.iter().find(|pr| pr.state != "CLOSED") {
            log::info!("Reusing existing PR #{} for {}", pr.number, head);
            return Ok(outputs_of([
                ("pr_url", json!(pr.url)),
                ("pr_number", json!(pr.number)),
            ]));
        }

        let mut args = vec![
            "pr", "create", "--base", base, "--head", head, "--title", title, "--body", body,
        ];
        if draft {
            args.push("--draft");
        }
        let stdout = self.gh.repo_command(&args).await?;
        let url = extract_url(&stdout).ok_or_else(|| CliError::ExecutionFailed {
            command: "gh pr create".to_string(),
            reason: format!("no PR URL in output: {}", stdout.trim()),
        })?;
        let number = extract_pr_number(&url).map(Value::from).unwrap_or(Value::Null);

        Ok(outputs_of([("pr_url", json!(url)), ("pr_number", number)]))
    }

    async fn create_release(
        &self,
        tag: &str,
        title: Option<&str>,
        notes: &str,
        target: Option<&str>,
        prerelease: bool,
    ) -> Result<ActionOutcome> {
        if let Some(release) = self.gh.release(tag).await? {
            log::info!("Reusing existing release {}", tag);
            return Ok(outputs_of([
                ("release_tag", json!(tag)),
                ("release_url", json!(release.url)),
            ]));
        }

        let mut args = vec!["release", "create", tag, "--notes", notes];
        if let Some(title) = title {
            args.extend(["--title", title]);
        }
        if let Some(target) = target {
            args.extend(["--target", target]);
        }
        if prerelease {
            args.push("--prerelease");
        }
        let stdout = self.gh.repo_command(&args).await?;
        let url = extract_url(&stdout).unwrap_or_default();

        Ok(outputs_of([("release_tag", json!(tag)), ("release_url", json!(url))]))
    }

    async fn dispatch_workflow(
        &self,
        workflow: &str,
        git_ref: &str,
        inputs: &BTreeMap<String, String>,
        start_timeout: Duration,
        first_started: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<ActionOutcome> {
        let skew = chrono::Duration::seconds(DISPATCH_SKEW_SECS);

        if let Some(started) = first_started {
            let runs = self.gh.dispatch_runs(workflow).await?;
            if let Some(run) = select_dispatched_run(&runs, started - skew) {
                log::info!("Reusing workflow run {} of {}", run.database_id, workflow);
                return Ok(workflow_outcome(run));
            }
        }

        let dispatched_at = chrono::Utc::now();
        let mut args = vec![
            "workflow".to_string(),
            "run".to_string(),
            workflow.to_string(),
            "--ref".to_string(),
            git_ref.to_string(),
        ];
        for (key, value) in inputs {
            args.push("-f".to_string());
            args.push(format!("{}={}", key, value));
        }
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.gh.repo_command(&args).await?;

        let deadline = tokio::time::Instant::now() + start_timeout;
        let not_found = || {
            ActionOutcome::failed(format!(
                "timed out after {}s waiting for a {} run to appear",
                start_timeout.as_secs(),
                workflow
            ))
        };
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Ok(runs) = tokio::time::timeout(remaining, self.gh.dispatch_runs(workflow)).await
            else {
                return Ok(not_found());
            };
            let runs = runs?;
            if let Some(run) = select_dispatched_run(&runs, dispatched_at - skew) {
                log::info!("Dispatched workflow run {} of {}", run.database_id, workflow);
                return Ok(workflow_outcome(run));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(not_found());
            }
            tokio::time::sleep(DISPATCH_LOOKUP_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn repo_slug(&self) -> Result<String> {
        if let Some(repo) = self.gh.repo() {
            return Ok(repo.to_string());
        }
        let stdout = self
            .gh
            .run(&[
                "repo".to_string(),
                "view".to_string(),
                "--json".to_string(),
                "nameWithOwner".to_string(),
                "-q".to_string(),
                ".nameWithOwner".to_string(),
            ])
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn create_discussion(
        &self,
        category: &str,
        title: &str,
        body: &str,
    ) -> Result<ActionOutcome> {
        let slug = self.repo_slug().await?;
        let (owner, name) = slug.split_once('/').ok_or_else(|| CliError::InvalidArguments {
            reason: format!("repository slug '{}' is not owner/name", slug),
        })?;

        let query = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    id
    discussionCategories(first: 25) { nodes { id name slug } }
    discussions(first: 50, orderBy: {field: CREATED_AT, direction: DESC}) { nodes { title url } }
  }
}"#;
        let vars = BTreeMap::from([
            ("owner".to_string(), owner.to_string()),
            ("name".to_string(), name.to_string()),
        ]);
        let payload = self.gh.graphql(query, &vars).await?;
        let repository = &payload["data"]["repository"];

        let existing = repository["discussions"]["nodes"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|d| d["title"].as_str() == Some(title));
        if let Some(discussion) = existing {
            log::info!("Reusing existing discussion '{}'", title);
            return Ok(outputs_of([
                ("announcement_status", json!("posted")),
                ("announcement_title", json!(title)),
                ("announcement_url", discussion["url"].clone()),
            ]));
        }

        let repository_id = repository["id"].as_str().ok_or_else(|| CliError::ExecutionFailed {
            command: "gh api graphql".to_string(),
            reason: format!("failed to load repository metadata for {}", slug),
        })?;
        let needle = category.trim().to_lowercase();
        let category_id = repository["discussionCategories"]["nodes"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|c| {
                c["name"].as_str().map(|n| n.trim().to_lowercase()) == Some(needle.clone())
                    || c["slug"].as_str().map(|s| s.trim().to_lowercase()) == Some(needle.clone())
            })
            .and_then(|c| c["id"].as_str())
            .ok_or_else(|| CliError::ExecutionFailed {
                command: "gh api graphql".to_string(),
                reason: format!("category '{}' not found", category),
            })?;

        let mutation = r#"
mutation($repositoryId: ID!, $categoryId: ID!, $title: String!, $body: String!) {
  createDiscussion(input: {repositoryId: $repositoryId, categoryId: $categoryId, title: $title, body: $body}) {
    discussion { id url number title }
  }
}"#;
        let vars = BTreeMap::from([
            ("repositoryId".to_string(), repository_id.to_string()),
            ("categoryId".to_string(), category_id.to_string()),
            ("title".to_string(), title.to_string()),
            ("body".to_string(), body.to_string()),
        ]);
        let created = self.gh.graphql(mutation, &vars).await?;
        let url = created["data"]["createDiscussion"]["discussion"]["url"]
            .as_str()
            .ok_or_else(|| CliError::ExecutionFailed {
                command: "gh api graphql".to_string(),
                reason: "GitHub did not return a discussion URL".to_string(),
            })?;

        Ok(outputs_of([
            ("announcement_status", json!("posted")),
            ("announcement_title", json!(title)),
            ("announcement_url", json!(url)),
        ]))
    }

    async fn manage_milestones(
        &self,
        close: Option<&str>,
        create: Option<&str>,
    ) -> Result<ActionOutcome> {
        let repo = self.gh.api_repo_path();
        let milestones: Vec<MilestoneInfo> = self
            .gh
            .api(
                "GET",
                &format!("repos/{}/milestones?state=all&per_page=100", repo),
                &BTreeMap::new(),
            )
            .await?;

        let mut outputs = CapturedOutputs::new();

        if let Some(title) = close
            && let Some(milestone) = milestones.iter().find(|m| m.title == title)
        {
            if milestone.state != "closed" {
                log::info!("Closing milestone {} (#{})", title, milestone.number);
                let _: Value = self
                    .gh
                    .api(
                        "PATCH",
                        &format!("repos/{}/milestones/{}", repo, milestone.number),
                        &BTreeMap::from([("state".to_string(), "closed".to_string())]),
                    )
                    .await?;
            }
            outputs.insert("closed_milestone_number".into(), json!(milestone.number));
        }

        if let Some(title) = create {
            let number = match milestones.iter().find(|m| m.title == title) {
                Some(existing) => existing.number,
                None => {
                    log::info!("Creating milestone {}", title);
                    let created: MilestoneInfo = self
                        .gh
                        .api(
                            "POST",
                            &format!("repos/{}/milestones", repo),
                            &BTreeMap::from([("title".to_string(), title.to_string())]),
                        )
                        .await?;
                    created.number
                }
            };
            outputs.insert("next_milestone_number".into(), json!(number));
        }

        Ok(ActionOutcome::Succeeded { outputs, job: None })
    }

    async fn http_request(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&Value>,
    ) -> Result<ActionOutcome> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|e| {
            CliError::InvalidArguments {
                reason: format!("invalid HTTP method '{}': {}", method, e),
            }
        })?;

        let mut request = self.http.request(method.clone(), url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(ActionOutcome::failed(format!("{} {} failed: {}", method, url, e))),
        };
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = text.chars().take(500).collect();
            return Ok(ActionOutcome::failed(format!(
                "{} {} returned {}: {}",
                method, url, status, snippet
            )));
        }

        let mut outputs = CapturedOutputs::new();
        if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&text) {
            outputs.extend(fields);
        }
        outputs.insert("status".into(), json!(status.as_u16()));
        Ok(ActionOutcome::Succeeded { outputs, job: None })
    }
}

impl ActionRunner for CommandActionRunner {
    async fn execute(&self, step: &StepDefinition, run: &ReleaseRun) -> ActionOutcome {
        let ctx = TemplateContext::for_run(run);
        let action = match render_action(&step.action, &ctx) {
            Ok(action) => action,
            Err(e) => return ActionOutcome::failed(e.to_string()),
        };

        match self.run_action(step, action, run).await {
            Ok(outcome) => outcome,
            Err(e) => ActionOutcome::failed(e.to_string()),
        }
    }
}

/// Earliest `workflow_dispatch` run created at or after `since`
pub fn select_dispatched_run(
    runs: &[WorkflowRunInfo],
    since: chrono::DateTime<chrono::Utc>,
) -> Option<&WorkflowRunInfo> {
    runs.iter()
        .filter(|run| run.created_at.is_some_and(|created| created >= since))
        .min_by_key(|run| run.created_at)
}

fn workflow_outcome(run: &WorkflowRunInfo) -> ActionOutcome {
    ActionOutcome::Succeeded {
        outputs: CapturedOutputs::from([
            ("workflow_run_id".to_string(), json!(run.database_id)),
            ("workflow_run_url".to_string(), json!(run.url)),
        ]),
        job: Some(JobHandle::WorkflowRun {
            run_id: run.database_id,
            url: (!run.url.is_empty()).then(|| run.url.clone()),
        }),
    }
}

fn outputs_of<const N: usize>(pairs: [(&str, Value); N]) -> ActionOutcome {
    ActionOutcome::Succeeded {
        outputs: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        job: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{CaptureKind, CaptureRule, Idempotency};
    use chrono::TimeZone;

    fn at(secs: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    fn wf_run(id: u64, created: i64) -> WorkflowRunInfo {
        WorkflowRunInfo {
            database_id: id,
            created_at: Some(at(created)),
            status: "queued".into(),
            conclusion: None,
            url: format!("https://github.com/acme/widget/actions/runs/{}", id),
        }
    }

    #[test]
    fn test_select_dispatched_run_ignores_older_runs() {
        let runs = vec![wf_run(3, 120), wf_run(2, 60), wf_run(1, -600)];
        assert_eq!(select_dispatched_run(&runs, at(55)).unwrap().database_id, 2);
        assert!(select_dispatched_run(&runs, at(121)).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_step_captures_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepDefinition {
            name: "open_pr".into(),
            description: None,
            checkpoint: None,
            idempotency: Idempotency::SideEffectingOnce,
            wait: None,
            action: StepAction::Command {
                program: "sh".into(),
                args: vec![
                    "-c".into(),
                    "echo created https://example.com/acme/widget/pull/{{params.version}}".into(),
                ],
                working_dir: None,
                env: BTreeMap::new(),
                capture: vec![
                    CaptureRule {
                        from: CaptureKind::Url,
                        key: Some("pr_url".into()),
                    },
                    CaptureRule {
                        from: CaptureKind::PrNumber,
                        key: None,
                    },
                ],
            },
        };
        let run = ReleaseRun::new(
            "demo-42".into(),
            "demo".into(),
            BTreeMap::from([("version".to_string(), "42".to_string())]),
            &["version".to_string()],
            std::slice::from_ref(&step),
            false,
        );

        let runner = CommandActionRunner::new(GhCli::new("gh", None), "git", dir.path());
        match runner.execute(&step, &run).await {
            ActionOutcome::Succeeded { outputs, job } => {
                assert_eq!(outputs["pr_number"], json!(42));
                assert_eq!(outputs["pr_url"], json!("https://example.com/acme/widget/pull/42"));
                assert!(job.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let step = StepDefinition {
            name: "build".into(),
            description: None,
            checkpoint: None,
            idempotency: Idempotency::SafeToRepeat,
            wait: None,
            action: StepAction::Command {
                program: "sh".into(),
                args: vec!["-c".into(), "echo boom >&2; exit 3".into()],
                working_dir: None,
                env: BTreeMap::new(),
                capture: Vec::new(),
            },
        };
        let run = ReleaseRun::new(
            "demo-1".into(),
            "demo".into(),
            BTreeMap::from([("version".to_string(), "1".to_string())]),
            &["version".to_string()],
            std::slice::from_ref(&step),
            false,
        );

        let runner = CommandActionRunner::new(GhCli::new("gh", None), "git", dir.path());
        match runner.execute(&step, &run).await {
            ActionOutcome::Failed { detail } => {
                assert!(detail.contains("exited with 3"));
                assert!(detail.contains("boom"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

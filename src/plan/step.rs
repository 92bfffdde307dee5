//! Step definitions and the action catalogue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a step may be executed more than once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Idempotency {
    /// Repeating the step has no additional external effect
    SafeToRepeat,
    /// The step's external effect must happen at most once
    #[default]
    SideEffectingOnce,
}

impl std::fmt::Display for Idempotency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Idempotency::SafeToRepeat => write!(f, "safe-to-repeat"),
            Idempotency::SideEffectingOnce => write!(f, "side-effecting-once"),
        }
    }
}

/// How long and how often to poll a step's remote job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WaitPolicy {
    /// Seconds between polls
    #[serde(default)]
    pub interval_secs: Option<u64>,
    /// Seconds before giving up
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A static, ordered, named step of a release plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepDefinition {
    /// Step name, unique within the plan
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Checkpoint that must be confirmed before the step runs
    #[serde(default)]
    pub checkpoint: Option<String>,
    /// Idempotency class
    #[serde(default)]
    pub idempotency: Idempotency,
    /// Wait for the step's remote job to finish
    #[serde(default, rename = "wait_for_completion")]
    pub wait: Option<WaitPolicy>,
    /// What the step does
    pub action: StepAction,
}

impl StepDefinition {
    /// Display label: description if present, else name
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }
}

/// Where a captured value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    /// First `https://` token of stdout
    Url,
    /// Number following `/pull/` in stdout
    PrNumber,
    /// Every field of a JSON object printed on stdout
    Json,
    /// Trimmed stdout
    Stdout,
}

/// Output capture rule for command steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureRule {
    /// Extraction method
    pub from: CaptureKind,
    /// Output key (ignored for `json`)
    #[serde(default)]
    pub key: Option<String>,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn default_start_timeout() -> u64 {
    120
}

/// The operation a step performs.
///
/// String fields are handlebars templates rendered against the run's
/// parameters (`{{params.version}}`) and earlier steps' outputs
/// (`{{steps.create_pr.pr_number}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Does nothing; useful as a pure confirmation point
    Noop,

    /// Run a local program
    Command {
        /// Program to execute
        program: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
        /// Working directory, relative to the repository root
        #[serde(default)]
        working_dir: Option<String>,
        /// Extra environment variables
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Output capture rules
        #[serde(default)]
        capture: Vec<CaptureRule>,
    },

    /// `git push -u <remote> <branch>`
    PushBranch {
        /// Remote name
        #[serde(default = "default_remote")]
        remote: String,
        /// Branch to push
        branch: String,
    },

    /// Open a pull request unless one already exists for the head branch
    CreatePullRequest {
        /// Head branch
        head: String,
        /// Base branch
        base: String,
        /// Title
        title: String,
        /// Body
        #[serde(default)]
        body: String,
        /// Open as draft
        #[serde(default)]
        draft: bool,
    },

    /// Create a release unless the tag already has one
    CreateRelease {
        /// Tag name
        tag: String,
        /// Release title
        #[serde(default)]
        title: Option<String>,
        /// Release notes
        #[serde(default)]
        notes: String,
        /// Commitish the tag is created from
        #[serde(default)]
        target: Option<String>,
        /// Mark as prerelease
        #[serde(default)]
        prerelease: bool,
    },

    /// Turn a prerelease into a full release
    PromoteRelease {
        /// Release tag
        tag: String,
        /// Also mark it as the latest release
        #[serde(default = "default_true")]
        latest: bool,
    },

    /// Trigger a `workflow_dispatch` run unless one was already started
    DispatchWorkflow {
        /// Workflow file name or id
        workflow: String,
        /// Git ref to run on
        #[serde(rename = "ref")]
        git_ref: String,
        /// Workflow inputs
        #[serde(default)]
        inputs: BTreeMap<String, String>,
        /// Seconds to wait for the dispatched run to appear
        #[serde(default = "default_start_timeout")]
        start_timeout_secs: u64,
    },

    /// Post an announcement discussion unless one with the title exists
    CreateDiscussion {
        /// Discussion category name
        category: String,
        /// Title
        title: String,
        /// Body
        body: String,
        /// Succeed with a manual-posting marker when the API call fails
        #[serde(default)]
        fallback_manual: bool,
    },

    /// Close the released milestone and make sure the next one exists
    ManageMilestones {
        /// Milestone title to close
        #[serde(default)]
        close: Option<String>,
        /// Milestone title to create if missing
        #[serde(default)]
        create: Option<String>,
    },

    /// Plain HTTP request
    Http {
        /// HTTP method
        #[serde(default = "default_method")]
        method: String,
        /// Request URL
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// JSON body (string values are templated)
        #[serde(default)]
        body: Option<serde_json::Value>,
    },

    /// Wait for a pull request to be merged
    WaitPullRequestMerge {
        /// Pull request number (usually `{{steps.<name>.pr_number}}`)
        pr_number: String,
    },

    /// Wait until a release carries every expected asset
    VerifyReleaseAssets {
        /// Release tag
        tag: String,
        /// Expected asset file names
        assets: Vec<String>,
    },
}

impl StepAction {
    /// Action type name as written in the plan
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Noop => "noop",
            StepAction::Command { .. } => "command",
            StepAction::PushBranch { .. } => "push_branch",
            StepAction::CreatePullRequest { .. } => "create_pull_request",
            StepAction::CreateRelease { .. } => "create_release",
            StepAction::PromoteRelease { .. } => "promote_release",
            StepAction::DispatchWorkflow { .. } => "dispatch_workflow",
            StepAction::CreateDiscussion { .. } => "create_discussion",
            StepAction::ManageMilestones { .. } => "manage_milestones",
            StepAction::Http { .. } => "http",
            StepAction::WaitPullRequestMerge { .. } => "wait_pull_request_merge",
            StepAction::VerifyReleaseAssets { .. } => "verify_release_assets",
        }
    }

    /// Whether a successful execution hands back a remote job to wait on
    pub fn produces_job(&self) -> bool {
        matches!(
            self,
            StepAction::DispatchWorkflow { .. }
                | StepAction::WaitPullRequestMerge { .. }
                | StepAction::VerifyReleaseAssets { .. }
        )
    }

    /// Whether the action only observes remote state
    pub fn is_wait_only(&self) -> bool {
        matches!(
            self,
            StepAction::WaitPullRequestMerge { .. } | StepAction::VerifyReleaseAssets { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dispatch_step() {
        let step: StepDefinition = toml::from_str(
            r#"
            name = "build"
            idempotency = "side-effecting-once"
            checkpoint = "publish"

            [wait_for_completion]
            interval_secs = 15
            timeout_secs = 1800

            [action]
            type = "dispatch_workflow"
            workflow = "release.yml"
            ref = "release/{{params.version}}"
            inputs = { version = "{{params.version}}" }
            "#,
        )
        .unwrap();

        assert_eq!(step.checkpoint.as_deref(), Some("publish"));
        assert_eq!(step.wait.unwrap().interval_secs, Some(15));
        match step.action {
            StepAction::DispatchWorkflow {
                git_ref,
                start_timeout_secs,
                ..
            } => {
                assert_eq!(git_ref, "release/{{params.version}}");
                assert_eq!(start_timeout_secs, 120);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_idempotency_defaults_to_side_effecting() {
        let step: StepDefinition = toml::from_str(
            r#"
            name = "announce"
            [action]
            type = "noop"
            "#,
        )
        .unwrap();
        assert_eq!(step.idempotency, Idempotency::SideEffectingOnce);
        assert!(!step.action.produces_job());
    }

    #[test]
    fn test_unknown_action_type_is_rejected() {
        let err = toml::from_str::<StepDefinition>(
            r#"
            name = "x"
            [action]
            type = "launch_rockets"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("launch_rockets"));
    }
}

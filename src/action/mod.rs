//! Step action execution.
//!
//! An [`ActionRunner`] performs a step's external operation once per entry
//! into `running` and classifies the result. Runners never touch the run
//! state; the sequencer records whatever they return.

mod capture;
mod command;
mod render;

pub use capture::{apply_captures, extract_pr_number, extract_url};
pub use command::{CommandActionRunner, select_dispatched_run};
pub use render::render_action;

use crate::plan::{CaptureKind, StepAction, StepDefinition};
use crate::state::{CapturedOutputs, ReleaseRun};
use crate::template::TemplateContext;
use crate::wait::JobHandle;
use serde_json::json;
use std::future::Future;

/// Result of one action execution
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The side effect happened (or was found to have happened already)
    Succeeded {
        /// Values later steps may reference
        outputs: CapturedOutputs,
        /// Remote job to wait on, if any
        job: Option<JobHandle>,
    },
    /// The action failed
    Failed {
        /// Failure detail
        detail: String,
    },
}

impl ActionOutcome {
    /// Success without outputs or job
    pub fn done() -> Self {
        ActionOutcome::Succeeded {
            outputs: CapturedOutputs::new(),
            job: None,
        }
    }

    /// Failure with a message
    pub fn failed(detail: impl Into<String>) -> Self {
        ActionOutcome::Failed {
            detail: detail.into(),
        }
    }
}

/// Executes a single step's operation
pub trait ActionRunner {
    /// Run `step` for `run`.
    ///
    /// The step's record in `run` carries the attempt count and the first
    /// `started_at`, which existence checks use to find artifacts created by
    /// an interrupted earlier attempt.
    fn execute(
        &self,
        step: &StepDefinition,
        run: &ReleaseRun,
    ) -> impl Future<Output = ActionOutcome>;
}

/// No-op runner used for side-effecting steps during a dry run.
///
/// Templates are still rendered so broken references surface, and outputs
/// are synthesized under the same keys the real runner would capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunRunner;

const PLACEHOLDER_URL: &str = "https://example.invalid/dry-run";

impl ActionRunner for DryRunRunner {
    async fn execute(&self, step: &StepDefinition, run: &ReleaseRun) -> ActionOutcome {
        let ctx = TemplateContext::for_run(run);
        let action = match render_action(&step.action, &ctx) {
            Ok(action) => action,
            Err(e) => return ActionOutcome::failed(e.to_string()),
        };
        log::info!("[dry-run] would execute {} for step '{}'", action.kind(), step.name);
        ActionOutcome::Succeeded {
            outputs: placeholder_outputs(&action),
            job: None,
        }
    }
}

fn placeholder_outputs(action: &StepAction) -> CapturedOutputs {
    let mut outputs = CapturedOutputs::new();
    match action {
        StepAction::Command { capture, .. } => {
            for rule in capture {
                let value = match rule.from {
                    CaptureKind::Url => json!(PLACEHOLDER_URL),
                    CaptureKind::PrNumber => json!(0),
                    CaptureKind::Stdout => json!(""),
                    CaptureKind::Json => continue,
                };
                outputs.insert(capture::rule_key(rule).to_string(), value);
            }
        }
        StepAction::PushBranch { remote, branch } => {
            outputs.insert("remote".into(), json!(remote));
            outputs.insert("branch".into(), json!(branch));
        }
        StepAction::CreatePullRequest { .. } => {
            outputs.insert("pr_url".into(), json!(PLACEHOLDER_URL));
            outputs.insert("pr_number".into(), json!(0));
        }
        StepAction::CreateRelease { tag, .. } | StepAction::PromoteRelease { tag, .. } => {
            outputs.insert("release_tag".into(), json!(tag));
            outputs.insert("release_url".into(), json!(PLACEHOLDER_URL));
        }
        StepAction::DispatchWorkflow { .. } => {
            outputs.insert("workflow_run_id".into(), json!(0));
            outputs.insert("workflow_run_url".into(), json!(PLACEHOLDER_URL));
        }
        StepAction::CreateDiscussion { title, .. } => {
            outputs.insert("announcement_status".into(), json!("dry_run"));
            outputs.insert("announcement_title".into(), json!(title));
            outputs.insert("announcement_url".into(), json!(PLACEHOLDER_URL));
        }
        StepAction::ManageMilestones { .. } => {
            outputs.insert("next_milestone_number".into(), json!(-1));
        }
        StepAction::Http { .. } => {
            outputs.insert("status".into(), json!(0));
        }
        StepAction::Noop
        | StepAction::WaitPullRequestMerge { .. }
        | StepAction::VerifyReleaseAssets { .. } => {}
    }
    outputs
}

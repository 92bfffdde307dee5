//! Job probe backed by the `gh` CLI.

use super::{JobHandle, JobProbe, ProbeStatus};
use crate::error::Result;
use crate::github::{GhCli, PullRequestInfo, ReleaseInfo, WorkflowRunInfo};
use crate::state::CapturedOutputs;
use serde_json::json;
use std::collections::BTreeSet;

/// Reads workflow runs, pull requests and releases through `gh`
#[derive(Debug, Clone)]
pub struct GhJobProbe {
    gh: GhCli,
}

impl GhJobProbe {
    pub fn new(gh: GhCli) -> Self {
        Self { gh }
    }
}

impl JobProbe for GhJobProbe {
    async fn probe(&self, job: &JobHandle) -> Result<ProbeStatus> {
        match job {
            JobHandle::WorkflowRun { run_id, .. } => {
                let run = self.gh.workflow_run(*run_id).await?;
                Ok(workflow_status(&run))
            }
            JobHandle::PullRequestMerge { number } => {
                let pr = self.gh.pull_request(number).await?;
                Ok(merge_status(&pr))
            }
            JobHandle::ReleaseAssets { tag, assets } => {
                let release = self.gh.release(tag).await?;
                Ok(asset_status(tag, assets, release.as_ref()))
            }
        }
    }
}

fn workflow_status(run: &WorkflowRunInfo) -> ProbeStatus {
    if run.status != "completed" {
        return ProbeStatus::Pending(format!("status {}", run.status));
    }
    match run.conclusion.as_deref() {
        Some("success") => {
            let mut outputs = CapturedOutputs::new();
            outputs.insert("workflow_conclusion".into(), json!("success"));
            ProbeStatus::Succeeded(outputs)
        }
        other => ProbeStatus::Failed(format!(
            "workflow run {} concluded {} ({})",
            run.database_id,
            other.unwrap_or("without a conclusion"),
            run.url
        )),
    }
}

fn merge_status(pr: &PullRequestInfo) -> ProbeStatus {
    if let Some(merged_at) = &pr.merged_at {
        let mut outputs = CapturedOutputs::new();
        outputs.insert("merged_at".into(), json!(merged_at));
        return ProbeStatus::Succeeded(outputs);
    }
    if pr.state == "CLOSED" {
        return ProbeStatus::Failed(format!("PR #{} was closed without merge", pr.number));
    }
    ProbeStatus::Pending(format!("PR #{} is {}", pr.number, pr.state))
}

fn asset_status(tag: &str, expected: &[String], release: Option<&ReleaseInfo>) -> ProbeStatus {
    let Some(release) = release else {
        return ProbeStatus::Pending(format!("release {} does not exist yet", tag));
    };
    let present: BTreeSet<&str> = release.assets.iter().map(|a| a.name.as_str()).collect();
    let missing: Vec<&str> = expected
        .iter()
        .map(String::as_str)
        .filter(|name| !present.contains(name))
        .collect();

    if missing.is_empty() {
        let mut outputs = CapturedOutputs::new();
        outputs.insert("release_assets".into(), json!(present));
        ProbeStatus::Succeeded(outputs)
    } else {
        ProbeStatus::Pending(format!("missing assets: {}", missing.join(", ")))
    }
}

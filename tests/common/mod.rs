#![allow(dead_code)]

use release_orchestrator::error::Result;
use release_orchestrator::plan::StepDefinition;
use release_orchestrator::preflight::{PreflightEnvironment, RemoteInfo};
use release_orchestrator::state::{CapturedOutputs, ReleaseRun};
use release_orchestrator::wait::{JobHandle, WaitOutcome, WaitPoller};
use release_orchestrator::{ActionOutcome, ActionRunner, Orchestrator, ReleasePlan, RunTarget, Settings};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A: plain step. B: gated by checkpoint X. C: dispatches a workflow and waits.
pub const ABC_PLAN: &str = r#"
name = "demo"

[repository]
expected = "github.com/acme/widget"

[params.version]
kind = "semver"

[checkpoints.X]
message = "Check the release branch before opening the PR"

[checkpoints.Y]
message = "Never used by the first steps"

[[steps]]
name = "A"
[steps.action]
type = "command"
program = "true"

[[steps]]
name = "B"
checkpoint = "X"
[steps.action]
type = "command"
program = "true"

[[steps]]
name = "C"
[steps.action]
type = "dispatch_workflow"
workflow = "release.yml"
ref = "main"
[steps.wait_for_completion]
interval_secs = 10
timeout_secs = 60

[[steps]]
name = "D"
checkpoint = "Y"
idempotency = "safe-to-repeat"
[steps.action]
type = "noop"
"#;

/// Counts executions per step and fails the steps it is told to
#[derive(Clone, Default)]
pub struct CountingRunner {
    calls: Arc<Mutex<BTreeMap<String, u32>>>,
    failing: Arc<Mutex<BTreeSet<String>>>,
}

impl CountingRunner {
    pub fn calls(&self, step: &str) -> u32 {
        self.calls.lock().unwrap().get(step).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn fail(&self, step: &str) {
        self.failing.lock().unwrap().insert(step.to_string());
    }

    pub fn heal(&self, step: &str) {
        self.failing.lock().unwrap().remove(step);
    }
}

impl ActionRunner for CountingRunner {
    async fn execute(&self, step: &StepDefinition, _run: &ReleaseRun) -> ActionOutcome {
        *self.calls.lock().unwrap().entry(step.name.clone()).or_default() += 1;

        if self.failing.lock().unwrap().contains(&step.name) {
            return ActionOutcome::failed(format!("{} exploded", step.name));
        }

        let outputs = CapturedOutputs::from([(
            "ran".to_string(),
            serde_json::Value::String(step.name.clone()),
        )]);
        let job = step.action.produces_job().then(|| JobHandle::WorkflowRun {
            run_id: 7,
            url: Some("https://github.com/acme/widget/actions/runs/7".to_string()),
        });
        ActionOutcome::Succeeded { outputs, job }
    }
}

/// Returns a fixed outcome and records the waits it was asked for
#[derive(Clone)]
pub struct FakePoller {
    outcome: Arc<Mutex<WaitOutcome>>,
    waits: Arc<Mutex<Vec<(JobHandle, Duration, Duration)>>>,
}

impl FakePoller {
    pub fn new(outcome: WaitOutcome) -> Self {
        Self {
            outcome: Arc::new(Mutex::new(outcome)),
            waits: Arc::default(),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(WaitOutcome::Succeeded(CapturedOutputs::from([(
            "conclusion".to_string(),
            serde_json::json!("success"),
        )])))
    }

    pub fn set_outcome(&self, outcome: WaitOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn waits(&self) -> Vec<(JobHandle, Duration, Duration)> {
        self.waits.lock().unwrap().clone()
    }
}

impl WaitPoller for FakePoller {
    async fn wait(&self, job: &JobHandle, interval: Duration, timeout: Duration) -> WaitOutcome {
        self.waits.lock().unwrap().push((job.clone(), interval, timeout));
        self.outcome.lock().unwrap().clone()
    }
}

/// Execution environment with configurable problems
#[derive(Clone)]
pub struct StubEnv {
    pub remotes: Vec<RemoteInfo>,
    pub status: Vec<String>,
    pub missing_tools: Vec<String>,
    pub missing_paths: Vec<String>,
    pub stale: Vec<PathBuf>,
}

impl Default for StubEnv {
    fn default() -> Self {
        Self {
            remotes: vec![RemoteInfo {
                name: "origin".to_string(),
                url: "git@github.com:acme/widget.git".to_string(),
            }],
            status: Vec::new(),
            missing_tools: Vec::new(),
            missing_paths: Vec::new(),
            stale: Vec::new(),
        }
    }
}

impl PreflightEnvironment for StubEnv {
    async fn remotes(&self) -> Result<Vec<RemoteInfo>> {
        Ok(self.remotes.clone())
    }

    async fn working_tree_changes(&self) -> Result<Vec<String>> {
        Ok(self.status.clone())
    }

    fn tool_available(&self, tool: &str) -> bool {
        !self.missing_tools.iter().any(|t| t == tool)
    }

    fn path_exists(&self, relative: &str) -> bool {
        !self.missing_paths.iter().any(|p| p == relative)
    }

    fn glob(&self, _pattern: &str) -> Result<Vec<PathBuf>> {
        Ok(self.stale.clone())
    }
}

pub fn orchestrator(plan: &str, dir: &Path, version: &str) -> Orchestrator {
    Orchestrator::new(
        ReleasePlan::parse(plan).unwrap(),
        RunTarget {
            params: BTreeMap::from([("version".to_string(), version.to_string())]),
            state_file: None,
            state_dir: Some(dir.join("state")),
            repo_root: dir.to_path_buf(),
        },
        Settings::default(),
    )
    .unwrap()
}

//! Release orchestration entry points.
//!
//! Wires the plan, state store, preflight, checkpoint gate and sequencer
//! together for one invocation. Each invocation holds the run lock for its
//! whole duration.

use crate::action::{ActionRunner, CommandActionRunner};
use crate::checkpoint::CheckpointGate;
use crate::error::{Result, StateError};
use crate::github::GhCli;
use crate::plan::ReleasePlan;
use crate::preflight::{LocalWorkspace, Preflight, PreflightEnvironment, PreflightOptions, PreflightReport};
use crate::sequencer::{ProgressReporter, SequenceOutcome, SequencerOptions, StepSequencer};
use crate::settings::Settings;
use crate::state::{CapturedOutputs, ReleaseRun, StateStore, params_digest};
use crate::wait::{GhJobProbe, Poller, WaitPoller};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where a run lives and which parameters identify it
#[derive(Debug, Clone)]
pub struct RunTarget {
    /// Supplied `--param` values
    pub params: BTreeMap<String, String>,
    /// Exact state file, overriding the state directory
    pub state_file: Option<PathBuf>,
    /// State directory, overriding the settings default
    pub state_dir: Option<PathBuf>,
    /// Repository the steps operate on
    pub repo_root: PathBuf,
}

/// Per-invocation switches for `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `--confirm-checkpoint` values
    pub confirmations: Vec<String>,
    /// Validate without side effects or persistence
    pub dry_run: bool,
    /// Skip the clean working tree check
    pub allow_dirty: bool,
}

/// Result of a `run` invocation that did not fail
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Run state after the invocation (in-memory only for dry runs)
    pub run: ReleaseRun,
    /// How the sequencer stopped
    pub outcome: SequenceOutcome,
    /// Preflight results
    pub preflight: PreflightReport,
    /// Whether this invocation created the run
    pub created: bool,
}

/// Release orchestrator bound to one plan and one run identifier
#[derive(Debug)]
pub struct Orchestrator {
    plan: ReleasePlan,
    settings: Settings,
    params: BTreeMap<String, String>,
    run_id: String,
    state_path: PathBuf,
    repo_root: PathBuf,
}

impl Orchestrator {
    /// Load and validate the plan, then resolve the run identifier
    pub fn load(plan_path: &Path, target: RunTarget, settings: Settings) -> Result<Self> {
        let plan = ReleasePlan::load(plan_path)?;
        Self::new(plan, target, settings)
    }

    /// Bind an already loaded plan
    pub fn new(plan: ReleasePlan, target: RunTarget, settings: Settings) -> Result<Self> {
        plan.validate()?;
        let run_id = plan.run_id(&plan.with_defaults(&target.params))?;
        let state_path = match target.state_file {
            Some(path) => path,
            None => {
                let dir = target.state_dir.unwrap_or_else(|| settings.state_dir.clone());
                StateStore::default_path(&dir, &run_id)
            }
        };

        Ok(Self {
            plan,
            settings,
            params: target.params,
            run_id,
            state_path,
            repo_root: target.repo_root,
        })
    }

    /// Run identifier
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// State file location
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// The bound plan
    pub fn plan(&self) -> &ReleasePlan {
        &self.plan
    }

    /// Run, resume or dry-run the release with the real `gh`/`git` backed collaborators
    pub async fn run(&self, options: &RunOptions, progress: &dyn ProgressReporter) -> Result<RunReport> {
        let gh = GhCli::new(self.settings.gh_bin.clone(), self.plan.repository.slug.clone())
            .with_working_dir(&self.repo_root)
            .with_timeout(self.settings.gh_timeout);
        let runner = CommandActionRunner::new(gh.clone(), self.settings.git_bin.clone(), &self.repo_root);
        let poller = Poller::new(GhJobProbe::new(gh));
        let workspace = LocalWorkspace::new(&self.repo_root, self.settings.git_bin.clone());

        self.run_with(options, runner, poller, &workspace, progress).await
    }

    /// Run with explicit collaborators
    pub async fn run_with<R, P, E>(
        &self,
        options: &RunOptions,
        runner: R,
        poller: P,
        env: &E,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport>
    where
        R: ActionRunner,
        P: WaitPoller,
        E: PreflightEnvironment,
    {
        // Unknown confirmations are rejected before anything is locked or read
        let gate = CheckpointGate::new(&self.plan.declared_checkpoints(), &options.confirmations)?;

        let store = StateStore::open(&self.state_path, &self.run_id)?;
        let (mut run, created) = self.load_or_create(&store, options.dry_run)?;

        let preflight = Preflight::new(
            &self.plan.repository,
            &self.plan.preflight,
            PreflightOptions {
                allow_dirty: options.allow_dirty,
                ignored_paths: self.ignored_paths(),
            },
        )
        .check(env)
        .await?;
        log::info!("Preflight passed for {}", self.run_id);

        if created && !options.dry_run {
            store.save(&mut run)?;
            log::info!("Created release run {} at {}", self.run_id, self.state_path.display());
        }

        let sequencer = StepSequencer::new(
            &self.plan,
            &store,
            &gate,
            runner,
            poller,
            SequencerOptions {
                dry_run: options.dry_run,
                default_interval: self.settings.default_poll_interval,
                default_timeout: self.settings.default_wait_timeout,
            },
        )
        .with_progress(progress);

        let outcome = sequencer.run(&mut run).await?;

        Ok(RunReport {
            run,
            outcome,
            preflight,
            created,
        })
    }

    fn load_or_create(&self, store: &StateStore, dry_run: bool) -> Result<(ReleaseRun, bool)> {
        match store.load() {
            Ok(mut run) => {
                if run.plan_name != self.plan.name {
                    return Err(StateError::Corrupted {
                        reason: format!(
                            "run '{}' belongs to plan '{}', not '{}'",
                            run.run_id, run.plan_name, self.plan.name
                        ),
                    }
                    .into());
                }
                if run.params_digest != params_digest(&run.params, &self.plan.identity_params) {
                    return Err(StateError::Corrupted {
                        reason: "identity parameters were edited in the state file".to_string(),
                    }
                    .into());
                }

                run.reconcile_params(&self.params)?;
                run.params = self.plan.with_defaults(&run.params);
                self.plan.validate_params(&run.params)?;
                run.sync_steps(&self.plan.steps)?;

                log::info!("Resuming {}", run.summary());
                Ok((run, false))
            }
            Err(crate::error::ReleaseError::State(StateError::NotFound { .. })) => {
                let params = self.plan.with_defaults(&self.params);
                self.plan.validate_params(&params)?;
                let run = ReleaseRun::new(
                    self.run_id.clone(),
                    self.plan.name.clone(),
                    params,
                    &self.plan.identity_params,
                    &self.plan.steps,
                    dry_run,
                );
                Ok((run, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Paths of the run's own files, relative to the repository root
    fn ignored_paths(&self) -> Vec<String> {
        let mut paths = vec![
            self.state_path.clone(),
            self.state_path.with_extension("lock"),
            self.state_path.with_extension("tmp"),
        ];
        if let Some(parent) = self.state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            paths.push(parent.to_path_buf());
        }

        let Ok(root) = std::path::absolute(&self.repo_root) else {
            return Vec::new();
        };
        paths
            .iter()
            .filter_map(|path| std::path::absolute(path).ok())
            .filter_map(|path| {
                path.strip_prefix(&root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().into_owned())
            })
            .filter(|rel| !rel.is_empty())
            .collect()
    }

    /// Current run state without taking the lock, `None` if no run exists
    pub fn status(&self) -> Result<Option<ReleaseRun>> {
        StateStore::inspect(&self.state_path, &self.run_id)
    }

    /// Clear a failed step back to `pending`
    pub fn retry(&self, step: &str) -> Result<ReleaseRun> {
        self.amend(|run| {
            run.step_mut(step)?.clear_failure()?;
            log::info!("Cleared failure of step '{}' in {}", step, run.run_id);
            Ok(())
        })
    }

    /// Mark a failed step done after the operator fixed it by hand
    pub fn resolve(&self, step: &str, outputs: CapturedOutputs) -> Result<ReleaseRun> {
        self.amend(|run| {
            run.step_mut(step)?.resolve_manually(outputs)?;
            log::info!("Step '{}' in {} resolved manually", step, run.run_id);
            Ok(())
        })
    }

    fn amend<F>(&self, change: F) -> Result<ReleaseRun>
    where
        F: FnOnce(&mut ReleaseRun) -> Result<()>,
    {
        let store = StateStore::open(&self.state_path, &self.run_id)?;
        let mut run = store.load()?;
        change(&mut run)?;
        store.save(&mut run)?;
        Ok(run)
    }

    /// Delete the run record and its lock; `false` if there was nothing to delete
    pub fn cleanup(&self) -> Result<bool> {
        let store = StateStore::open(&self.state_path, &self.run_id)?;
        let existed = store.exists();
        store.delete()?;
        Ok(existed)
    }
}

/// JSON summary of every step's captured outputs
pub fn final_report(run: &ReleaseRun) -> Value {
    let steps: serde_json::Map<String, Value> = run
        .steps
        .iter()
        .map(|step| {
            let mut entry = json!({
                "status": step.status.to_string(),
                "outputs": step.outputs,
            });
            if step.resolved_manually {
                entry["resolved_manually"] = Value::Bool(true);
            }
            (step.name.clone(), entry)
        })
        .collect();

    json!({
        "run_id": run.run_id,
        "plan": run.plan_name,
        "status": run.status().to_string(),
        "params": run.params,
        "steps": steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Idempotency, StepAction, StepDefinition};

    fn plan() -> ReleasePlan {
        ReleasePlan::parse(
            r#"
name = "demo"

[params.version]
kind = "semver"

[params.channel]
default = "stable"

[[steps]]
name = "build"
idempotency = "safe-to-repeat"
action = { type = "noop" }
"#,
        )
        .unwrap()
    }

    fn target(dir: &Path, version: &str) -> RunTarget {
        RunTarget {
            params: BTreeMap::from([("version".to_string(), version.to_string())]),
            state_file: None,
            state_dir: Some(dir.join("state")),
            repo_root: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_run_id_and_default_state_path() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(plan(), target(dir.path(), "1.2.3"), Settings::default()).unwrap();
        assert_eq!(orchestrator.run_id(), "demo-1.2.3");
        assert_eq!(orchestrator.state_path(), dir.path().join("state").join("demo-1.2.3.json"));
    }

    #[test]
    fn test_ignored_paths_are_repo_relative() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(plan(), target(dir.path(), "1.2.3"), Settings::default()).unwrap();
        let ignored = orchestrator.ignored_paths();
        assert!(ignored.contains(&"state".to_string()));
        assert!(ignored.iter().any(|p| p.ends_with("demo-1.2.3.lock")));
    }

    #[test]
    fn test_retry_requires_existing_run() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(plan(), target(dir.path(), "1.2.3"), Settings::default()).unwrap();
        let err = orchestrator.retry("build").unwrap_err();
        assert!(matches!(
            err,
            crate::error::ReleaseError::State(StateError::NotFound { .. })
        ));
    }

    #[test]
    fn test_final_report_lists_outputs() {
        let steps = vec![StepDefinition {
            name: "pr".into(),
            description: None,
            checkpoint: None,
            idempotency: Idempotency::SideEffectingOnce,
            wait: None,
            action: StepAction::Noop,
        }];
        let mut run = ReleaseRun::new(
            "demo-1.0.0".into(),
            "demo".into(),
            BTreeMap::from([("version".to_string(), "1.0.0".to_string())]),
            &["version".to_string()],
            &steps,
            false,
        );
        run.steps[0].outputs.insert("pr_number".into(), json!(42));

        let report = final_report(&run);
        assert_eq!(report["run_id"], json!("demo-1.0.0"));
        assert_eq!(report["steps"]["pr"]["outputs"]["pr_number"], json!(42));
        assert_eq!(report["steps"]["pr"]["status"], json!("pending"));
    }
}

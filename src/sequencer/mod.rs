//! The step state machine.
//!
//! Steps run strictly in plan order. Every status transition is saved before
//! the sequencer moves on, so a crash at any point resumes from the last
//! recorded transition:
//!
//! - `done` steps are skipped without touching the runner.
//! - `failed` steps halt the run until an operator retries or resolves them.
//! - `running` steps (interrupted mid-action) re-enter the action.
//! - `waiting-remote` steps resume polling their persisted job.

mod report;

pub use report::{
    DryRunLine, DryRunReport, DryRunVerdict, ProgressEvent, ProgressReporter, SequenceOutcome,
};

use crate::action::{ActionOutcome, ActionRunner, DryRunRunner};
use crate::checkpoint::CheckpointGate;
use crate::error::{ActionError, ActionErrorKind, ReleaseError, Result, StateError};
use crate::plan::{Idempotency, ReleasePlan, StepDefinition};
use crate::state::{PendingCheckpoint, ReleaseRun, StateStore, StepStatus};
use crate::wait::{JobHandle, WaitOutcome, WaitPoller};
use std::time::Duration;

/// Sequencer switches
#[derive(Debug, Clone, Copy)]
pub struct SequencerOptions {
    /// Validate without side effects or persistence
    pub dry_run: bool,
    /// Poll interval when a step's wait policy does not set one
    pub default_interval: Duration,
    /// Timeout when a step's wait policy does not set one
    pub default_timeout: Duration,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            default_interval: Duration::from_secs(30),
            default_timeout: Duration::from_secs(3600),
        }
    }
}

/// Drives a run's steps through their lifecycle
pub struct StepSequencer<'a, R, P> {
    plan: &'a ReleasePlan,
    store: &'a StateStore,
    gate: &'a CheckpointGate,
    runner: R,
    poller: P,
    options: SequencerOptions,
    progress: &'a dyn ProgressReporter,
}

impl<'a, R: ActionRunner, P: WaitPoller> StepSequencer<'a, R, P> {
    /// Create a sequencer
    pub fn new(
        plan: &'a ReleasePlan,
        store: &'a StateStore,
        gate: &'a CheckpointGate,
        runner: R,
        poller: P,
        options: SequencerOptions,
    ) -> Self {
        Self {
            plan,
            store,
            gate,
            runner,
            poller,
            options,
            progress: &(),
        }
    }

    /// Send progress events to `progress`
    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Advance the run as far as possible
    pub async fn run(&self, run: &mut ReleaseRun) -> Result<SequenceOutcome> {
        run.sync_steps(&self.plan.steps)?;

        if self.options.dry_run {
            return Ok(SequenceOutcome::DryRun(self.dry_run(run).await?));
        }

        for (index, step) in self.plan.steps.iter().enumerate() {
            match run.steps[index].status {
                StepStatus::Done => {
                    log::info!("✓ Skipping {} (already completed)", step.name);
                    self.progress.report(&ProgressEvent::Skipped { step: &step.name });
                }
                StepStatus::Failed => {
                    let message = run.steps[index]
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default();
                    return Err(ActionError::PreviouslyFailed {
                        step: step.name.clone(),
                        message,
                    }
                    .into());
                }
                StepStatus::Pending | StepStatus::AwaitingConfirmation => {
                    if let Some(checkpoint) = &step.checkpoint
                        && !self.gate.is_satisfied(checkpoint)
                    {
                        return self.pause(run, index, step, checkpoint);
                    }
                    if run.pending_checkpoint.is_some() {
                        run.pending_checkpoint = None;
                    }
                    run.steps[index].transition(StepStatus::Running)?;
                    self.save(run)?;
                    self.execute(run, index, step).await?;
                }
                StepStatus::Running => {
                    log::warn!(
                        "Step '{}' was interrupted while running, re-entering its action",
                        step.name
                    );
                    run.steps[index].reenter_running();
                    self.save(run)?;
                    self.execute(run, index, step).await?;
                }
                StepStatus::WaitingRemote => {
                    let job = run.steps[index].job.clone().ok_or_else(|| StateError::Corrupted {
                        reason: format!("step '{}' is waiting-remote without a job", step.name),
                    })?;
                    log::info!("Resuming wait on {} for step '{}'", job, step.name);
                    self.wait(run, index, step, job).await?;
                }
            }
        }

        run.pending_checkpoint = None;
        self.save(run)?;
        log::info!("Release run {} completed", run.run_id);
        Ok(SequenceOutcome::Completed)
    }

    fn save(&self, run: &mut ReleaseRun) -> Result<()> {
        self.store.save(run)
    }

    fn pause(
        &self,
        run: &mut ReleaseRun,
        index: usize,
        step: &StepDefinition,
        checkpoint: &str,
    ) -> Result<SequenceOutcome> {
        if run.steps[index].status == StepStatus::Pending {
            run.steps[index].transition(StepStatus::AwaitingConfirmation)?;
        }
        let message = self.plan.checkpoint_message(checkpoint, step);
        run.pending_checkpoint = Some(PendingCheckpoint {
            name: checkpoint.to_string(),
            step: step.name.clone(),
            message: message.clone(),
        });
        self.save(run)?;

        log::info!("Paused before '{}' at checkpoint {}", step.name, checkpoint);
        Ok(SequenceOutcome::Paused {
            step: step.name.clone(),
            checkpoint: checkpoint.to_string(),
            message,
        })
    }

    async fn execute(&self, run: &mut ReleaseRun, index: usize, step: &StepDefinition) -> Result<()> {
        let attempt = run.steps[index].attempts;
        log::info!("Running step '{}' (attempt {})", step.name, attempt);
        self.progress.report(&ProgressEvent::Started {
            step: &step.name,
            attempt,
        });

        match self.runner.execute(step, run).await {
            ActionOutcome::Succeeded { outputs, job } => {
                let record = &mut run.steps[index];
                record.outputs.extend(outputs);
                match job {
                    Some(job) => {
                        record.job = Some(job.clone());
                        record.transition(StepStatus::WaitingRemote)?;
                        self.save(run)?;
                        self.wait(run, index, step, job).await
                    }
                    None => {
                        record.transition(StepStatus::Done)?;
                        self.save(run)?;
                        self.progress.report(&ProgressEvent::Completed { step: &step.name });
                        Ok(())
                    }
                }
            }
            ActionOutcome::Failed { detail } => {
                Err(self.record_failure(run, index, step, ActionErrorKind::Action, detail)?)
            }
        }
    }

    async fn wait(
        &self,
        run: &mut ReleaseRun,
        index: usize,
        step: &StepDefinition,
        job: JobHandle,
    ) -> Result<()> {
        let (interval, timeout) = self.policy(step);
        self.progress.report(&ProgressEvent::Waiting {
            step: &step.name,
            job: &job,
        });

        match self.poller.wait(&job, interval, timeout).await {
            WaitOutcome::Succeeded(outputs) => {
                let record = &mut run.steps[index];
                record.outputs.extend(outputs);
                record.transition(StepStatus::Done)?;
                self.save(run)?;
                self.progress.report(&ProgressEvent::Completed { step: &step.name });
                Ok(())
            }
            WaitOutcome::Failed(detail) => Err(self.record_failure(
                run,
                index,
                step,
                ActionErrorKind::RemoteFailure,
                detail,
            )?),
            WaitOutcome::TimedOut => {
                let detail = format!("timed out after {}s waiting for {}", timeout.as_secs(), job);
                run.steps[index].fail(ActionErrorKind::Timeout, detail.clone())?;
                self.save(run)?;
                self.progress.report(&ProgressEvent::Failed {
                    step: &step.name,
                    detail: &detail,
                });
                Err(ActionError::Timeout {
                    step: step.name.clone(),
                    timeout_secs: timeout.as_secs(),
                }
                .into())
            }
        }
    }

    /// Record a failure durably and build the error to surface
    fn record_failure(
        &self,
        run: &mut ReleaseRun,
        index: usize,
        step: &StepDefinition,
        kind: ActionErrorKind,
        detail: String,
    ) -> Result<ReleaseError> {
        run.steps[index].fail(kind, detail.clone())?;
        self.save(run)?;
        log::error!("Step '{}' failed ({}): {}", step.name, kind, detail);
        self.progress.report(&ProgressEvent::Failed {
            step: &step.name,
            detail: &detail,
        });
        Ok(ActionError::Failed {
            step: step.name.clone(),
            message: detail,
        }
        .into())
    }

    fn policy(&self, step: &StepDefinition) -> (Duration, Duration) {
        let policy = step.wait.unwrap_or_default();
        (
            policy
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(self.options.default_interval),
            policy
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.options.default_timeout),
        )
    }

    /// Walk the steps in memory without saving or polling
    async fn dry_run(&self, run: &mut ReleaseRun) -> Result<DryRunReport> {
        let mut report = DryRunReport::default();

        for (index, step) in self.plan.steps.iter().enumerate() {
            let status = run.steps[index].status;
            match status {
                StepStatus::Done => report.push(&step.name, DryRunVerdict::SkipDone),
                StepStatus::Failed => {
                    let detail = run.steps[index]
                        .error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_default();
                    report.push(&step.name, DryRunVerdict::Blocked { detail });
                    break;
                }
                StepStatus::WaitingRemote => {
                    report.push(&step.name, DryRunVerdict::WouldWait);
                    run.steps[index].transition(StepStatus::Done)?;
                }
                StepStatus::Pending | StepStatus::AwaitingConfirmation | StepStatus::Running => {
                    if status != StepStatus::Running
                        && let Some(checkpoint) = &step.checkpoint
                        && !self.gate.is_satisfied(checkpoint)
                    {
                        report.push(
                            &step.name,
                            DryRunVerdict::WouldPause {
                                checkpoint: checkpoint.clone(),
                            },
                        );
                        break;
                    }
                    if status != StepStatus::Running {
                        run.steps[index].transition(StepStatus::Running)?;
                    }

                    let idempotency = run.steps[index].effective_idempotency(step);
                    let outcome = match idempotency {
                        Idempotency::SafeToRepeat => self.runner.execute(step, run).await,
                        Idempotency::SideEffectingOnce => DryRunRunner.execute(step, run).await,
                    };
                    match outcome {
                        ActionOutcome::Succeeded { outputs, job } => {
                            let verdict = if job.is_some() || step.action.produces_job() {
                                DryRunVerdict::WouldWait
                            } else if idempotency == Idempotency::SafeToRepeat {
                                DryRunVerdict::Validated
                            } else {
                                DryRunVerdict::WouldExecute
                            };
                            let record = &mut run.steps[index];
                            record.outputs.extend(outputs);
                            record.transition(StepStatus::Done)?;
                            report.push(&step.name, verdict);
                        }
                        ActionOutcome::Failed { detail } => {
                            report.push(&step.name, DryRunVerdict::Failed { detail });
                            break;
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}

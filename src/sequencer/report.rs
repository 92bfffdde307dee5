//! Sequencer results and progress events.

use crate::wait::JobHandle;
use serde::Serialize;

/// How a sequencer pass ended without error
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    /// Every step is done
    Completed,
    /// Halted before a gated step; confirm the checkpoint and re-run
    Paused {
        /// Gated step
        step: String,
        /// Checkpoint to confirm
        checkpoint: String,
        /// Operator guidance
        message: String,
    },
    /// Dry run finished; nothing was persisted
    DryRun(DryRunReport),
}

/// What a dry run found for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum DryRunVerdict {
    /// Already done
    SkipDone,
    /// Gated and not confirmed
    WouldPause { checkpoint: String },
    /// Side effect would run
    WouldExecute,
    /// Side effect would run, then wait for a remote job
    WouldWait,
    /// Safe-to-repeat step executed for real and succeeded
    Validated,
    /// The step could not be validated
    Failed { detail: String },
    /// A previous failure blocks the run
    Blocked { detail: String },
}

impl std::fmt::Display for DryRunVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DryRunVerdict::SkipDone => write!(f, "skip (done)"),
            DryRunVerdict::WouldPause { checkpoint } => {
                write!(f, "would pause for checkpoint {}", checkpoint)
            }
            DryRunVerdict::WouldExecute => write!(f, "would execute"),
            DryRunVerdict::WouldWait => write!(f, "would wait"),
            DryRunVerdict::Validated => write!(f, "validated"),
            DryRunVerdict::Failed { detail } => write!(f, "failed: {}", detail),
            DryRunVerdict::Blocked { detail } => write!(f, "blocked by previous failure: {}", detail),
        }
    }
}

/// One line of a dry-run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DryRunLine {
    pub step: String,
    #[serde(flatten)]
    pub verdict: DryRunVerdict,
}

/// Step-by-step dry-run findings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DryRunReport {
    pub lines: Vec<DryRunLine>,
}

impl DryRunReport {
    pub(super) fn push(&mut self, step: &str, verdict: DryRunVerdict) {
        self.lines.push(DryRunLine {
            step: step.to_string(),
            verdict,
        });
    }

    /// Verdict recorded for a step
    pub fn verdict(&self, step: &str) -> Option<&DryRunVerdict> {
        self.lines.iter().find(|l| l.step == step).map(|l| &l.verdict)
    }

    /// Whether any step failed validation or is blocked
    pub fn has_failures(&self) -> bool {
        self.lines.iter().any(|l| {
            matches!(
                l.verdict,
                DryRunVerdict::Failed { .. } | DryRunVerdict::Blocked { .. }
            )
        })
    }
}

/// Progress notifications emitted while sequencing
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent<'a> {
    /// Step already done
    Skipped { step: &'a str },
    /// Action about to run
    Started { step: &'a str, attempt: u32 },
    /// Waiting on a remote job
    Waiting { step: &'a str, job: &'a JobHandle },
    /// Step reached `done`
    Completed { step: &'a str },
    /// Step reached `failed`
    Failed { step: &'a str, detail: &'a str },
}

/// Receives progress notifications
pub trait ProgressReporter {
    fn report(&self, event: &ProgressEvent<'_>);
}

impl ProgressReporter for () {
    fn report(&self, _event: &ProgressEvent<'_>) {}
}

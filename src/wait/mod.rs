//! Polling of asynchronous remote jobs.
//!
//! A step whose action hands back a [`JobHandle`] is not done until the
//! remote job reaches a terminal state. The handle is persisted with the step
//! record so an interrupted wait resumes polling instead of re-triggering.

mod gh_probe;

pub use gh_probe::GhJobProbe;

use crate::error::Result;
use crate::state::CapturedOutputs;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Reference to a remote asynchronous job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobHandle {
    /// A CI workflow run
    WorkflowRun {
        run_id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// A pull request expected to be merged
    PullRequestMerge { number: String },
    /// A release expected to carry a set of assets
    ReleaseAssets { tag: String, assets: Vec<String> },
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobHandle::WorkflowRun { run_id, .. } => write!(f, "workflow run {}", run_id),
            JobHandle::PullRequestMerge { number } => write!(f, "merge of PR #{}", number),
            JobHandle::ReleaseAssets { tag, assets } => {
                write!(f, "{} asset(s) on release {}", assets.len(), tag)
            }
        }
    }
}

/// Single observation of a remote job
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    /// Not terminal yet
    Pending(String),
    /// Terminal success, with any outputs worth recording
    Succeeded(CapturedOutputs),
    /// Terminal failure
    Failed(String),
}

/// Final result of waiting on a job
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The job succeeded
    Succeeded(CapturedOutputs),
    /// The job reached a failed terminal state
    Failed(String),
    /// The job did not reach a terminal state in time
    TimedOut,
}

/// Observes the current state of a remote job
pub trait JobProbe {
    /// Look at the job once
    fn probe(&self, job: &JobHandle) -> impl Future<Output = Result<ProbeStatus>>;
}

/// Waits for a remote job to finish
pub trait WaitPoller {
    /// Poll `job` every `interval` until it is terminal or `timeout` elapses
    fn wait(
        &self,
        job: &JobHandle,
        interval: Duration,
        timeout: Duration,
    ) -> impl Future<Output = WaitOutcome>;
}

/// Fixed-interval poller over a [`JobProbe`]
#[derive(Debug, Clone)]
pub struct Poller<P> {
    probe: P,
}

impl<P: JobProbe> Poller<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: JobProbe> WaitPoller for Poller<P> {
    async fn wait(&self, job: &JobHandle, interval: Duration, timeout: Duration) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Ok(status) = tokio::time::timeout(remaining, self.probe.probe(job)).await else {
                log::warn!("{} timed out after {}s (probe did not answer)", job, timeout.as_secs());
                return WaitOutcome::TimedOut;
            };
            match status {
                Ok(ProbeStatus::Succeeded(outputs)) => {
                    log::info!("{} succeeded after {} poll(s)", job, polls);
                    return WaitOutcome::Succeeded(outputs);
                }
                Ok(ProbeStatus::Failed(detail)) => {
                    log::warn!("{} failed: {}", job, detail);
                    return WaitOutcome::Failed(detail);
                }
                Ok(ProbeStatus::Pending(detail)) => {
                    log::debug!("{} still pending: {}", job, detail);
                }
                Err(e) => {
                    // Transient errors keep the job pending until the deadline
                    log::warn!("Polling {} failed, will retry: {}", job, e);
                }
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                log::warn!("{} timed out after {}s", job, timeout.as_secs());
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

//! # Release Orchestrator
//!
//! Resumable, checkpoint-gated orchestration of multi-step releases.
//!
//! A release plan lists ordered steps, several of which have irreversible
//! external effects: pushing branches, opening pull requests, dispatching CI
//! workflows, promoting releases, posting announcements. The engine records
//! every step transition durably, so an interrupted run picks up where it
//! stopped without repeating completed or side-effecting work.
//!
//! ## Features
//!
//! - **Crash-safe state**: one JSON record per run, written atomically
//! - **Checkpoints**: gated steps pause until the operator confirms them by name
//! - **Remote waits**: CI runs, merges and release assets are polled to a terminal state
//! - **Preflight**: repository identity, tools, clean tree and stale artifacts are checked up front
//! - **Dry runs**: walk the whole plan without side effects or persistence
//!
//! ## Usage
//!
//! ```bash
//! release_orchestrator run --plan release.toml --param version=2.5.0
//! release_orchestrator run --plan release.toml --param version=2.5.0 --confirm-checkpoint publish
//! release_orchestrator status --plan release.toml --param version=2.5.0
//! release_orchestrator retry --plan release.toml --param version=2.5.0 --step dispatch_ci
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod action;
pub mod checkpoint;
pub mod cli;
pub mod error;
pub mod github;
pub mod orchestrator;
pub mod plan;
pub mod preflight;
pub mod sequencer;
pub mod settings;
pub mod state;
pub mod template;
pub mod wait;

// Re-export main types for public API
pub use action::{ActionOutcome, ActionRunner, CommandActionRunner, DryRunRunner};
pub use checkpoint::CheckpointGate;
pub use cli::Args;
pub use error::{ActionError, CliError, ReleaseError, Result, StateError, VetoError};
pub use orchestrator::{Orchestrator, RunOptions, RunReport, RunTarget, final_report};
pub use plan::{Idempotency, ReleasePlan, StepAction, StepDefinition, WaitPolicy};
pub use preflight::{Preflight, PreflightEnvironment, PreflightReport};
pub use sequencer::{DryRunReport, SequenceOutcome, StepSequencer};
pub use settings::Settings;
pub use state::{ReleaseRun, StateStore, StepRecord, StepStatus};
pub use wait::{JobHandle, Poller, WaitOutcome, WaitPoller};

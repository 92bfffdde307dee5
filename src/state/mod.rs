//! State management for release runs.
//!
//! This module provides the run/step model and its durable, lock-guarded
//! persistence, enabling resume after crashes and pauses.

mod run;
mod store;

pub use run::{
    CapturedOutputs, PendingCheckpoint, ReleaseRun, RunStatus, STATE_FORMAT_VERSION, StepError,
    StepRecord, StepStatus, params_digest,
};
pub use store::{DEFAULT_STATE_DIR, StateStore};

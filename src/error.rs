//! Error types for release orchestration.
//!
//! This module defines all error types with actionable error messages and recovery suggestions.
//! Pausing at a checkpoint is not an error: it is reported through
//! [`crate::sequencer::SequenceOutcome::Paused`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for release orchestration operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Process exit code for a clean completion or a pause at a checkpoint
pub const EXIT_OK: i32 = 0;
/// Process exit code for configuration, storage and other generic failures
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code when preflight vetoed the invocation
pub const EXIT_VETO: i32 = 2;
/// Process exit code when a step failed (including timeouts)
pub const EXIT_STEP_FAILED: i32 = 3;
/// Process exit code when another invocation holds the run lock
pub const EXIT_LOCKED: i32 = 4;

/// Main error type for all release orchestration operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// State persistence errors (fatal, progress cannot be guaranteed)
    #[error("Storage error: {0}")]
    State(#[from] StateError),

    /// Preflight vetoes (fatal, no progress made)
    #[error("{0}")]
    Veto(#[from] VetoError),

    /// A step's action failed and the failure was recorded
    #[error("Step error: {0}")]
    Action(#[from] ActionError),

    /// Release plan errors
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Template rendering errors
    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// State management errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State file corrupted
    #[error("State file corrupted: {reason}")]
    Corrupted {
        /// Reason for the error
        reason: String,
    },

    /// No persisted run for this identifier
    #[error("No release run found for '{run_id}'")]
    NotFound {
        /// Run identifier
        run_id: String,
    },

    /// State version mismatch
    #[error("State file version mismatch: supported up to {supported}, found {found}")]
    VersionMismatch {
        /// Highest supported format version
        supported: u32,
        /// Version found on disk
        found: u32,
    },

    /// Failed to save state
    #[error("Failed to save state: {reason}")]
    SaveFailed {
        /// Reason for the error
        reason: String,
    },

    /// Failed to load state
    #[error("Failed to load state: {reason}")]
    LoadFailed {
        /// Reason for the error
        reason: String,
    },

    /// Another invocation holds the lock for this run
    #[error("Release run '{run_id}' is locked by another invocation ({holder})")]
    RunLocked {
        /// Run identifier
        run_id: String,
        /// Lock holder description (pid, acquisition time)
        holder: String,
    },

    /// Persisted run parameters differ from the supplied ones
    #[error("Parameter '{param}' mismatch for run '{run_id}': state={persisted}, arg={supplied}")]
    ParamsMismatch {
        /// Run identifier
        run_id: String,
        /// Parameter name
        param: String,
        /// Value recorded in the state file
        persisted: String,
        /// Value supplied on this invocation
        supplied: String,
    },

    /// A step record attempted a backwards or skipping transition
    #[error("Invalid transition for step '{step}': {from} -> {to}")]
    InvalidTransition {
        /// Step name
        step: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Operator operation referenced a step that is not in the run
    #[error("Step '{step}' is not part of run '{run_id}'")]
    UnknownStep {
        /// Run identifier
        run_id: String,
        /// Step name
        step: String,
    },
}

/// A single named preflight veto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Veto {
    /// Check name (e.g. "repository-identity")
    pub check: String,
    /// Human-readable explanation
    pub message: String,
}

/// Preflight failure carrying every veto found
#[derive(Error, Debug)]
#[error("Preflight vetoed the release ({} issue(s)): {}", .vetoes.len(), format_vetoes(.vetoes))]
pub struct VetoError {
    /// All failed checks
    pub vetoes: Vec<Veto>,
}

fn format_vetoes(vetoes: &[Veto]) -> String {
    vetoes
        .iter()
        .map(|v| format!("[{}] {}", v.check, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Step failure classification, persisted with the step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionErrorKind {
    /// The action itself failed (command exit status, API error)
    Action,
    /// The remote job reached a failed terminal state
    RemoteFailure,
    /// The remote job did not reach a terminal state before the timeout
    Timeout,
}

impl std::fmt::Display for ActionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionErrorKind::Action => write!(f, "action"),
            ActionErrorKind::RemoteFailure => write!(f, "remote-failure"),
            ActionErrorKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// Step failure errors, raised after the failure was durably recorded
#[derive(Error, Debug)]
pub enum ActionError {
    /// The step's action or remote job failed
    #[error("Step '{step}' failed: {message}")]
    Failed {
        /// Step name
        step: String,
        /// Failure detail
        message: String,
    },

    /// The remote job did not finish in time; check it manually
    #[error("Step '{step}' timed out after {timeout_secs}s waiting for the remote job")]
    Timeout {
        /// Step name
        step: String,
        /// Configured timeout
        timeout_secs: u64,
    },

    /// A previous invocation left the step failed and nobody cleared it
    #[error("Step '{step}' is marked failed from a previous invocation: {message}")]
    PreviouslyFailed {
        /// Step name
        step: String,
        /// Recorded failure detail
        message: String,
    },
}

/// Release plan errors
#[derive(Error, Debug)]
pub enum PlanError {
    /// Failed to read the plan file
    #[error("Failed to read plan {path}: {reason}")]
    ReadFailed {
        /// Plan path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Structural problem in the plan
    #[error("Invalid plan: {reason}")]
    Invalid {
        /// Reason for the error
        reason: String,
    },

    /// Parameter missing or failing validation
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParam {
        /// Parameter name
        name: String,
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Confirmation names a checkpoint the plan never declares
    #[error("Unknown checkpoint '{name}'. Known checkpoints: {known:?}")]
    UnknownCheckpoint {
        /// Supplied checkpoint name
        name: String,
        /// Checkpoints declared by the plan
        known: Vec<String>,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl ReleaseError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ReleaseError::Veto(veto) => veto
                .vetoes
                .iter()
                .map(|v| match v.check.as_str() {
                    "working-tree" => {
                        "Commit or stash pending changes, or pass --allow-dirty".to_string()
                    }
                    "repository-identity" => {
                        "Run from a clone of the expected repository: git remote -v".to_string()
                    }
                    "required-tools" => "Install the missing tools and ensure they are on PATH".to_string(),
                    "stale-artifacts" => {
                        "Remove leftover artifacts from the previous packaging attempt".to_string()
                    }
                    _ => format!("Resolve preflight check '{}'", v.check),
                })
                .collect(),
            ReleaseError::State(StateError::RunLocked { .. }) => vec![
                "Another invocation is running this release; wait for it to finish".to_string(),
                "If no other invocation is alive, the lock is released automatically".to_string(),
            ],
            ReleaseError::State(StateError::ParamsMismatch { .. }) => vec![
                "Re-run with the parameters recorded in the state file".to_string(),
                "Or use a different --state-file to start an independent run".to_string(),
            ],
            ReleaseError::State(StateError::Corrupted { .. }) => vec![
                "Inspect the state file manually; it is plain JSON".to_string(),
                "Run 'cleanup' to discard it only if no side effects need tracking".to_string(),
            ],
            ReleaseError::Action(ActionError::Timeout { .. }) => vec![
                "Check the remote job manually; it may still be running".to_string(),
                "Use 'resolve --step <NAME>' once it succeeded, or 'retry --step <NAME>'".to_string(),
            ],
            ReleaseError::Action(_) => vec![
                "Inspect the failure with 'status'".to_string(),
                "Use 'retry --step <NAME>' to re-run it, or 'resolve --step <NAME>' after fixing it manually".to_string(),
            ],
            ReleaseError::Cli(CliError::UnknownCheckpoint { known, .. }) => {
                vec![format!("Pass one of: {}", known.join(", "))]
            }
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ReleaseError::Veto(_) => EXIT_VETO,
            ReleaseError::Action(_) => EXIT_STEP_FAILED,
            ReleaseError::State(StateError::RunLocked { .. }) => EXIT_LOCKED,
            _ => EXIT_FAILURE,
        }
    }

    /// Check if this error left durable progress that a later invocation can continue
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ReleaseError::State(StateError::Corrupted { .. })
                | ReleaseError::State(StateError::VersionMismatch { .. })
                | ReleaseError::State(StateError::SaveFailed { .. })
        )
    }
}

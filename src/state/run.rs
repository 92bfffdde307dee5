//! Release run tracking and serialization.

use crate::error::{ActionErrorKind, Result, StateError};
use crate::plan::{Idempotency, StepDefinition};
use crate::wait::JobHandle;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current major version of the state format.
///
/// Minor revisions only add fields, which older readers ignore.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Outputs captured by a step (PR number, workflow run id, URLs, ...)
pub type CapturedOutputs = BTreeMap<String, serde_json::Value>;

/// Complete release run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRun {
    /// Version of the state format
    pub format_version: u32,
    /// Save operation version (incremented on every save)
    #[serde(default)]
    pub save_version: u64,
    /// Stable identifier derived from the plan name and identity parameters
    pub run_id: String,
    /// Name of the release plan that owns this run
    pub plan_name: String,
    /// SHA-256 of the identity parameters
    pub params_digest: String,
    /// Global parameter set (version, next version, highlight references, ...)
    pub params: BTreeMap<String, String>,
    /// Whether this run was created by a dry run (never persisted)
    #[serde(default)]
    pub dry_run: bool,
    /// Timestamp when the run was created
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Timestamp when the run was last updated
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// Checkpoint the run is paused at, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<PendingCheckpoint>,
    /// Ordered step records, one per step definition
    pub steps: Vec<StepRecord>,
}

/// Checkpoint the run is waiting on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCheckpoint {
    /// Checkpoint name to pass with --confirm-checkpoint
    pub name: String,
    /// Step gated by the checkpoint
    pub step: String,
    /// Guidance shown to the operator
    pub message: String,
}

/// Lifecycle status of a step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    /// Not started
    Pending,
    /// Waiting for an operator confirmation
    AwaitingConfirmation,
    /// Action in flight
    Running,
    /// Action succeeded, waiting for the remote job
    WaitingRemote,
    /// Completed
    Done,
    /// Failed; needs explicit retry or resolution
    Failed,
}

impl StepStatus {
    fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::AwaitingConfirmation => 1,
            StepStatus::Running => 2,
            StepStatus::WaitingRemote => 3,
            StepStatus::Done | StepStatus::Failed => 4,
        }
    }

    /// Whether `next` is a legal forward transition from `self`
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        match (self, next) {
            (StepStatus::Pending, StepStatus::AwaitingConfirmation | StepStatus::Running) => true,
            (StepStatus::AwaitingConfirmation, StepStatus::Running) => true,
            (StepStatus::Running, StepStatus::WaitingRemote | StepStatus::Done | StepStatus::Failed) => true,
            (StepStatus::WaitingRemote, StepStatus::Done | StepStatus::Failed) => true,
            _ => false,
        }
    }

    /// Whether the status is terminal for the step
    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::AwaitingConfirmation => write!(f, "awaiting-confirmation"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::WaitingRemote => write!(f, "waiting-remote"),
            StepStatus::Done => write!(f, "done"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Failure payload recorded on a failed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Failure classification
    pub kind: ActionErrorKind,
    /// Failure detail
    pub message: String,
    /// When the failure was recorded
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Persisted outcome of executing one step definition within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name (matches the definition)
    pub name: String,
    /// Idempotency class copied from the definition when the run was created
    pub idempotency: Idempotency,
    /// Current status
    pub status: StepStatus,
    /// Number of lifecycle entries into `running`
    #[serde(default)]
    pub attempts: u32,
    /// When the step first entered `running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// When the step reached `done` or `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Captured outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: CapturedOutputs,
    /// Remote job being waited on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<JobHandle>,
    /// Failure payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Failures cleared by an operator retry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StepError>,
    /// Marked done by an operator rather than by the engine
    #[serde(default)]
    pub resolved_manually: bool,
}

impl StepRecord {
    /// Create a pending record for a step definition
    pub fn new(definition: &StepDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            idempotency: definition.idempotency,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            outputs: CapturedOutputs::new(),
            job: None,
            error: None,
            history: Vec::new(),
            resolved_manually: false,
        }
    }

    /// Move the record forward, rejecting anything that is not a legal transition
    pub fn transition(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                step: self.name.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            }
            .into());
        }

        let now = chrono::Utc::now();
        if next == StepStatus::Running {
            self.attempts += 1;
            self.started_at.get_or_insert(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        if next == StepStatus::Done {
            self.job = None;
        }
        self.status = next;
        Ok(())
    }

    /// Record an interrupted `running` entry being re-entered after a crash
    pub fn reenter_running(&mut self) {
        debug_assert_eq!(self.status, StepStatus::Running);
        self.attempts += 1;
    }

    /// Transition to `failed` with an error payload
    pub fn fail(&mut self, kind: ActionErrorKind, message: impl Into<String>) -> Result<()> {
        self.transition(StepStatus::Failed)?;
        self.error = Some(StepError {
            kind,
            message: message.into(),
            at: chrono::Utc::now(),
        });
        Ok(())
    }

    /// Operator retry: move a failed record back to `pending`.
    ///
    /// The error moves to `history`. `started_at` is cleared so existence
    /// checks on the next attempt do not pick up artifacts of the failed one.
    pub fn clear_failure(&mut self) -> Result<()> {
        self.require_failed(StepStatus::Pending)?;
        self.history.extend(self.error.take());
        self.status = StepStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
        self.job = None;
        Ok(())
    }

    /// Operator resolution: mark a failed record `done` with optional outputs
    pub fn resolve_manually(&mut self, outputs: CapturedOutputs) -> Result<()> {
        self.require_failed(StepStatus::Done)?;
        self.history.extend(self.error.take());
        self.outputs.extend(outputs);
        self.status = StepStatus::Done;
        self.finished_at = Some(chrono::Utc::now());
        self.job = None;
        self.resolved_manually = true;
        Ok(())
    }

    fn require_failed(&self, next: StepStatus) -> Result<()> {
        if self.status == StepStatus::Failed {
            return Ok(());
        }
        Err(StateError::InvalidTransition {
            step: self.name.clone(),
            from: self.status.to_string(),
            to: next.to_string(),
        }
        .into())
    }

    /// Idempotency to honour for this step: side-effecting if either the
    /// record or the current definition says so
    pub fn effective_idempotency(&self, definition: &StepDefinition) -> Idempotency {
        if self.idempotency == Idempotency::SafeToRepeat
            && definition.idempotency == Idempotency::SafeToRepeat
        {
            Idempotency::SafeToRepeat
        } else {
            Idempotency::SideEffectingOnce
        }
    }

    /// Whether the engine must skip this step entirely
    pub fn is_done(&self) -> bool {
        self.status == StepStatus::Done
    }
}

/// Overall status derived from the step records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Nothing started yet
    NotStarted,
    /// Some steps done, none failed or paused
    InProgress,
    /// Paused at a checkpoint
    Paused,
    /// A step failed
    Failed,
    /// Every step done
    Done,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::NotStarted => write!(f, "not-started"),
            RunStatus::InProgress => write!(f, "in-progress"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Done => write!(f, "done"),
        }
    }
}

impl ReleaseRun {
    /// Create a new run for the given step definitions
    pub fn new(
        run_id: String,
        plan_name: String,
        params: BTreeMap<String, String>,
        identity_params: &[String],
        steps: &[StepDefinition],
        dry_run: bool,
    ) -> Self {
        let now = chrono::Utc::now();
        let params_digest = params_digest(&params, identity_params);

        Self {
            format_version: STATE_FORMAT_VERSION,
            save_version: 0,
            run_id,
            plan_name,
            params_digest,
            params,
            dry_run,
            created_at: now,
            updated_at: now,
            pending_checkpoint: None,
            steps: steps.iter().map(StepRecord::new).collect(),
        }
    }

    /// Find a step record by name
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Find a step record by name for mutation
    pub fn step_mut(&mut self, name: &str) -> Result<&mut StepRecord> {
        let run_id = self.run_id.clone();
        self.steps
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| {
                StateError::UnknownStep {
                    run_id,
                    step: name.to_string(),
                }
                .into()
            })
    }

    /// Bump the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Merge parameters supplied on a later invocation into this run.
    ///
    /// Omitted parameters keep their persisted value; a different value is a mismatch.
    pub fn reconcile_params(&mut self, supplied: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in supplied {
            match self.params.get(name) {
                Some(persisted) if persisted != value => {
                    return Err(StateError::ParamsMismatch {
                        run_id: self.run_id.clone(),
                        param: name.clone(),
                        persisted: persisted.clone(),
                        supplied: value.clone(),
                    }
                    .into());
                }
                Some(_) => {}
                None => {
                    self.params.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    /// Add records for steps appended to the plan after the run was created
    pub fn sync_steps(&mut self, definitions: &[StepDefinition]) -> Result<()> {
        for (index, definition) in definitions.iter().enumerate() {
            match self.steps.get(index) {
                Some(record) if record.name == definition.name => {
                    if record.idempotency != definition.idempotency {
                        log::warn!(
                            "Step '{}' was recorded as {} but the plan now says {}; treating it as side-effecting",
                            record.name,
                            record.idempotency,
                            definition.idempotency
                        );
                    }
                }
                Some(record) => {
                    return Err(StateError::Corrupted {
                        reason: format!(
                            "step #{} is '{}' in the state file but '{}' in the plan",
                            index + 1,
                            record.name,
                            definition.name
                        ),
                    }
                    .into());
                }
                None => self.steps.push(StepRecord::new(definition)),
            }
        }
        if self.steps.len() > definitions.len() {
            return Err(StateError::Corrupted {
                reason: format!(
                    "state file has {} steps but the plan declares {}",
                    self.steps.len(),
                    definitions.len()
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Outputs of every step keyed by step name (template context)
    pub fn outputs_by_step(&self) -> BTreeMap<String, CapturedOutputs> {
        self.steps
            .iter()
            .map(|s| (s.name.clone(), s.outputs.clone()))
            .collect()
    }

    /// Overall status
    pub fn status(&self) -> RunStatus {
        if self.steps.iter().any(|s| s.status == StepStatus::Failed) {
            RunStatus::Failed
        } else if self.pending_checkpoint.is_some()
            || self
                .steps
                .iter()
                .any(|s| s.status == StepStatus::AwaitingConfirmation)
        {
            RunStatus::Paused
        } else if self.steps.iter().all(StepRecord::is_done) {
            RunStatus::Done
        } else if self.steps.iter().all(|s| s.status == StepStatus::Pending) {
            RunStatus::NotStarted
        } else {
            RunStatus::InProgress
        }
    }

    /// Number of completed steps
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_done()).count()
    }

    /// Get elapsed time
    pub fn elapsed_time(&self) -> chrono::Duration {
        self.updated_at - self.created_at
    }

    /// Validate state consistency
    pub fn validate(&self) -> Result<()> {
        if self.format_version > STATE_FORMAT_VERSION {
            return Err(StateError::VersionMismatch {
                supported: STATE_FORMAT_VERSION,
                found: self.format_version,
            }
            .into());
        }
        Ok(())
    }

    /// Create a summary of the run
    pub fn summary(&self) -> String {
        format!(
            "Release {} ({}) - {}/{} steps done - {} elapsed",
            self.run_id,
            self.status(),
            self.completed_steps(),
            self.steps.len(),
            format_duration(self.elapsed_time())
        )
    }
}

/// Digest of the identity parameters, used to detect divergent runs
pub fn params_digest(params: &BTreeMap<String, String>, identity_params: &[String]) -> String {
    let mut hasher = Sha256::new();
    let mut names: Vec<&String> = identity_params.iter().collect();
    names.sort();
    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(params.get(name).map(String::as_str).unwrap_or("").as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

//! Status command implementation.
//!
//! Displays the persisted state of a release run.

use super::helpers::{orchestrator_for, resume_command};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{EXIT_OK, Result};
use crate::state::{ReleaseRun, StepRecord, StepStatus};
use serde_json::json;

/// Execute status command
pub(super) fn execute_status(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Status { target, json } = &args.command else {
        unreachable!("execute_status called with non-Status command");
    };

    config.verbose_println("Checking release status...");
    let orchestrator = orchestrator_for(target, config)?;

    let Some(run) = orchestrator.status()? else {
        if *json {
            let _ = config.output().json(&json!({
                "status": "not_found",
                "run_id": orchestrator.run_id(),
            }));
        } else {
            config.println(&format!("No release run found for {}", orchestrator.run_id()));
        }
        return Ok(EXIT_OK);
    };

    if *json {
        let _ = config.output().json(&serde_json::to_value(&run)?);
        return Ok(EXIT_OK);
    }

    config.println(&format!("📊 {}", run.summary()));
    print_steps(&run, config);

    if let Some(pending) = &run.pending_checkpoint {
        config.println("");
        config.warning_println(&format!("Paused before '{}': {}", pending.step, pending.message));
        config.indent(&resume_command(target, &pending.name));
    }

    if config.is_verbose() {
        config.println("");
        config.println(&format!("State file: {}", orchestrator.state_path().display()));
        config.println(&format!("Created: {}", run.created_at));
        config.println(&format!("Updated: {} (save #{})", run.updated_at, run.save_version));
        for (name, value) in &run.params {
            config.println(&format!("  {} = {}", name, value));
        }
    }

    Ok(EXIT_OK)
}

fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "·",
        StepStatus::AwaitingConfirmation => "⏸",
        StepStatus::Running => "▶",
        StepStatus::WaitingRemote => "⏳",
        StepStatus::Done => "✓",
        StepStatus::Failed => "❌",
    }
}

fn print_steps(run: &ReleaseRun, config: &RuntimeConfig) {
    let width = run.steps.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for step in &run.steps {
        config.println(&format!(
            "  {} {:width$}  {}{}",
            status_icon(step.status),
            step.name,
            step.status,
            step_note(step),
            width = width
        ));
        if let Some(error) = &step.error {
            config.indent(&format!("{} error: {}", error.kind, error.message));
        }
        if let Some(job) = &step.job {
            config.indent(&format!("waiting for {}", job));
        }
        if config.is_verbose() {
            for (key, value) in &step.outputs {
                config.indent(&format!("{} = {}", key, value));
            }
        }
    }
}

fn step_note(step: &StepRecord) -> String {
    let mut notes = Vec::new();
    if step.attempts > 1 {
        notes.push(format!("{} attempts", step.attempts));
    }
    if step.resolved_manually {
        notes.push("resolved manually".to_string());
    }
    if !step.history.is_empty() {
        notes.push(format!("{} earlier failure(s)", step.history.len()));
    }
    if notes.is_empty() {
        String::new()
    } else {
        format!(" ({})", notes.join(", "))
    }
}

//! Run command implementation.
//!
//! Starts a release run, resumes it, or walks it as a dry run.

use super::helpers::{orchestrator_for, resume_command};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{EXIT_OK, EXIT_STEP_FAILED, Result};
use crate::orchestrator::{RunOptions, final_report};
use crate::sequencer::{DryRunVerdict, ProgressEvent, ProgressReporter, SequenceOutcome};

/// Prints sequencer progress as it happens
struct TerminalProgress<'a> {
    config: &'a RuntimeConfig,
}

impl ProgressReporter for TerminalProgress<'_> {
    fn report(&self, event: &ProgressEvent<'_>) {
        match event {
            ProgressEvent::Skipped { step } => {
                self.config.println(&format!("✓ Skipping {} (already completed)", step));
            }
            ProgressEvent::Started { step, attempt } if *attempt > 1 => {
                self.config
                    .progress_println(&format!("Running {} (attempt {})", step, attempt));
            }
            ProgressEvent::Started { step, .. } => {
                self.config.progress_println(&format!("Running {}", step));
            }
            ProgressEvent::Waiting { step, job } => {
                self.config.println(&format!("⏳ {} waiting for {}", step, job));
            }
            ProgressEvent::Completed { step } => {
                self.config.success_println(&format!("{} done", step));
            }
            ProgressEvent::Failed { step, detail } => {
                self.config.error_println(&format!("{} failed: {}", step, detail));
            }
        }
    }
}

/// Execute run command
pub(super) async fn execute_run(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Run {
        target,
        confirm_checkpoint,
        dry_run,
        allow_dirty,
        json,
    } = &args.command
    else {
        unreachable!("execute_run called with non-Run command");
    };

    let orchestrator = orchestrator_for(target, config)?;
    config.println(&format!(
        "🚀 Release {} ({})",
        orchestrator.run_id(),
        orchestrator.state_path().display()
    ));
    if *dry_run {
        config.warning_println("Dry run: no side effects, nothing is saved");
    }

    let options = RunOptions {
        confirmations: confirm_checkpoint.clone(),
        dry_run: *dry_run,
        allow_dirty: *allow_dirty,
    };
    let progress = TerminalProgress { config };
    let report = orchestrator.run(&options, &progress).await?;

    config.verbose_println(&report.preflight.summary());
    if report.created && !*dry_run {
        config.verbose_println("Started a new run");
    }

    match &report.outcome {
        SequenceOutcome::Completed => {
            config.success_println(&format!("Release {} completed", report.run.run_id));
            let summary = final_report(&report.run);
            if *json {
                let _ = config.output().json(&summary);
            } else {
                config.println("\n📋 Final report:");
                config.println(&serde_json::to_string_pretty(&summary)?);
            }
            Ok(EXIT_OK)
        }
        SequenceOutcome::Paused {
            step,
            checkpoint,
            message,
        } => {
            config.warning_println(&format!("Paused before '{}': {}", step, message));
            config.println("Confirm the checkpoint to continue:");
            config.indent(&resume_command(target, checkpoint));
            Ok(EXIT_OK)
        }
        SequenceOutcome::DryRun(dry_run_report) => {
            if *json {
                let _ = config.output().json(&serde_json::to_value(dry_run_report)?);
            } else {
                let _ = config.output().section("Dry run");
                for line in &dry_run_report.lines {
                    let icon = match line.verdict {
                        DryRunVerdict::SkipDone | DryRunVerdict::Validated => "✓",
                        DryRunVerdict::WouldPause { .. } => "⏸",
                        DryRunVerdict::WouldExecute | DryRunVerdict::WouldWait => "→",
                        DryRunVerdict::Failed { .. } | DryRunVerdict::Blocked { .. } => "✗",
                    };
                    config.println(&format!("{} {}: {}", icon, line.step, line.verdict));
                }
            }

            if dry_run_report.has_failures() {
                config.error_println("Dry run found problems");
                Ok(EXIT_STEP_FAILED)
            } else {
                Ok(EXIT_OK)
            }
        }
    }
}

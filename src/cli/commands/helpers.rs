//! Shared helper functions for command execution.

use crate::cli::{RuntimeConfig, TargetArgs};
use crate::error::{CliError, Result};
use crate::orchestrator::Orchestrator;

/// Load the plan and bind the orchestrator for a command's target
pub(super) fn orchestrator_for(target: &TargetArgs, config: &RuntimeConfig) -> Result<Orchestrator> {
    let run_target = target
        .to_run_target()
        .map_err(|reason| CliError::InvalidArguments { reason })?;
    Orchestrator::load(&target.plan, run_target, config.settings.clone())
}

/// The `run` invocation that continues past `checkpoint`
pub(super) fn resume_command(target: &TargetArgs, checkpoint: &str) -> String {
    let mut parts = vec![
        "release_orchestrator run".to_string(),
        format!("--plan {}", target.plan.display()),
    ];
    for (key, value) in &target.params {
        parts.push(format!("--param {}={}", key, value));
    }
    if let Some(path) = &target.state_file {
        parts.push(format!("--state-file {}", path.display()));
    }
    if let Some(dir) = &target.state_dir {
        parts.push(format!("--state-dir {}", dir.display()));
    }
    if target.repo_root != std::path::Path::new(".") {
        parts.push(format!("--repo-root {}", target.repo_root.display()));
    }
    parts.push(format!("--confirm-checkpoint {}", checkpoint));
    parts.join(" ")
}

/// Prompt user for yes/no confirmation
pub(super) fn prompt_confirmation(prompt: &str) -> std::io::Result<bool> {
    use std::io::Write;

    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    let response = input.trim().to_lowercase();
    Ok(matches!(response.as_str(), "y" | "yes"))
}

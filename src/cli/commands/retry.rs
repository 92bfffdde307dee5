//! Retry command implementation.
//!
//! Clears a failed step so the next `run` executes it again.

use super::helpers::orchestrator_for;
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{EXIT_OK, Result};

/// Execute retry command
pub(super) fn execute_retry(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Retry { target, step } = &args.command else {
        unreachable!("execute_retry called with non-Retry command");
    };

    let orchestrator = orchestrator_for(target, config)?;
    let run = orchestrator.retry(step)?;

    config.success_println(&format!("Step '{}' cleared; it runs again on the next invocation", step));
    config.println(&format!("📊 {}", run.summary()));
    Ok(EXIT_OK)
}

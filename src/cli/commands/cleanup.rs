//! Cleanup command implementation.
//!
//! Removes a run's state and lock files.

use super::helpers::{orchestrator_for, prompt_confirmation};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{EXIT_OK, Result};

/// Execute cleanup command
pub(super) fn execute_cleanup(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Cleanup { target, yes } = &args.command else {
        unreachable!("execute_cleanup called with non-Cleanup command");
    };

    let orchestrator = orchestrator_for(target, config)?;

    if !yes {
        config.println(&format!(
            "About to delete the state of {} ({})",
            orchestrator.run_id(),
            orchestrator.state_path().display()
        ));
        config.warning_println("Side effects already performed will no longer be tracked");
        if !prompt_confirmation("Continue with cleanup?")? {
            config.println("Cleanup cancelled");
            return Ok(EXIT_OK);
        }
    }

    if orchestrator.cleanup()? {
        config.success_println("State file cleaned up");
    } else {
        config.println("No state file to clean up");
    }
    Ok(EXIT_OK)
}

//! Resolve command implementation.
//!
//! Marks a failed step done after the operator completed it by hand.

use super::helpers::orchestrator_for;
use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{CliError, EXIT_OK, Result};

/// Execute resolve command
pub(super) fn execute_resolve(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Resolve {
        target,
        step,
        outputs,
    } = &args.command
    else {
        unreachable!("execute_resolve called with non-Resolve command");
    };

    let outputs = crate::cli::args::outputs_map(outputs)
        .map_err(|reason| CliError::InvalidArguments { reason })?;
    let orchestrator = orchestrator_for(target, config)?;
    let run = orchestrator.resolve(step, outputs)?;

    config.success_println(&format!("Step '{}' marked done (resolved manually)", step));
    config.println(&format!("📊 {}", run.summary()));
    Ok(EXIT_OK)
}

//! Command execution functions.
//!
//! Each command reports its own progress and returns the process exit code;
//! errors are printed here together with recovery suggestions.

mod cleanup;
mod helpers;
mod resolve;
mod retry;
mod run;
mod status;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{EXIT_FAILURE, Result};

use cleanup::execute_cleanup;
use resolve::execute_resolve;
use retry::execute_retry;
use run::execute_run;
use status::execute_status;

/// Execute the command selected by the parsed arguments
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        // Create output for validation errors (never quiet)
        let output = super::OutputManager::new(false, false);
        output.error(&format!("Invalid arguments: {}", validation_error));
        return Ok(EXIT_FAILURE);
    }

    let config = RuntimeConfig::from(&args);

    let result = match &args.command {
        Command::Run { .. } => execute_run(&args, &config).await,
        Command::Status { .. } => execute_status(&args, &config),
        Command::Retry { .. } => execute_retry(&args, &config),
        Command::Resolve { .. } => execute_resolve(&args, &config),
        Command::Cleanup { .. } => execute_cleanup(&args, &config),
    };

    match result {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => {
            config.error_println(&format!("Command '{}' failed: {}", args.command.name(), e));

            let _ = config.output().suggestions(&e.recovery_suggestions());

            Ok(e.exit_code())
        }
    }
}

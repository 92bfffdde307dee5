//! Release Orchestrator - resumable, checkpoint-gated release runs.
//!
//! This binary drives a release plan step by step, pausing at checkpoints and
//! resuming from the persisted run state on the next invocation.

use release_orchestrator::cli;
use release_orchestrator::cli::OutputManager;
use release_orchestrator::error::EXIT_FAILURE;
use std::process;

#[tokio::main]
async fn main() {
    env_logger::init();

    match cli::run().await {
        Ok(exit_code) => {
            process::exit(exit_code);
        }
        Err(e) => {
            // Create output manager for error display (never quiet for fatal errors)
            let output = OutputManager::new(false, false);
            output.error(&format!("Fatal error: {e}"));

            let _ = output.suggestions(&e.recovery_suggestions());

            process::exit(EXIT_FAILURE);
        }
    }
}

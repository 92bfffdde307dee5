//! Command line interface for release_orchestrator.
//!
//! Parses arguments, runs the requested command and maps its result to a
//! process exit code.

mod args;
pub mod commands;
mod output;

pub use args::{Args, Command, RuntimeConfig, TargetArgs};
pub use commands::execute_command;
pub use output::OutputManager;

use crate::error::Result;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute_command(args).await
}

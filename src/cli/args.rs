//! Command line argument parsing and validation.

use crate::orchestrator::RunTarget;
use crate::settings::Settings;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Resumable, checkpoint-gated release runs
#[derive(Parser, Debug)]
#[command(
    name = "release_orchestrator",
    version,
    about = "Resumable, checkpoint-gated release orchestration",
    long_about = "Drive a release plan step by step. Every transition is saved, so re-running
the same command resumes where the previous invocation stopped.

Usage:
  release_orchestrator run --plan release.toml --param version=2.5.0
  release_orchestrator run --plan release.toml --param version=2.5.0 --confirm-checkpoint publish
  release_orchestrator status --plan release.toml --param version=2.5.0"
)]
pub struct Args {
    /// Command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Only print errors and machine-readable output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print extra detail
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Plan, parameters and state location shared by every command
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Release plan (TOML)
    #[arg(long, value_name = "PLAN")]
    pub plan: PathBuf,

    /// Release parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Exact state file (overrides --state-dir)
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Directory holding state files
    #[arg(long, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Repository the steps operate on
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub repo_root: PathBuf,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start or resume a release run
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Confirm a checkpoint for this invocation, repeatable
        #[arg(long = "confirm-checkpoint", value_name = "NAME")]
        confirm_checkpoint: Vec<String>,

        /// Walk the plan without side effects or saving state
        #[arg(long)]
        dry_run: bool,

        /// Skip the clean working tree check
        #[arg(long)]
        allow_dirty: bool,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a run's progress
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Output the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear a failed step so the next run executes it again
    Retry {
        #[command(flatten)]
        target: TargetArgs,

        /// Failed step to clear
        #[arg(long, value_name = "NAME")]
        step: String,
    },

    /// Mark a failed step done after fixing it by hand
    Resolve {
        #[command(flatten)]
        target: TargetArgs,

        /// Failed step to resolve
        #[arg(long, value_name = "NAME")]
        step: String,

        /// Output later steps can reference, repeatable
        #[arg(long = "output", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        outputs: Vec<(String, String)>,
    },

    /// Delete a run's state and lock files
    Cleanup {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

fn pairs_to_map(pairs: &[(String, String)], flag: &str) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for (key, value) in pairs {
        if let Some(previous) = map.insert(key.clone(), value.clone())
            && previous != *value
        {
            return Err(format!(
                "{} '{}' given twice with different values ('{}' and '{}')",
                flag, key, previous, value
            ));
        }
    }
    Ok(map)
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        let target = self.command.target();
        pairs_to_map(&target.params, "--param")?;

        if target.state_file.is_some() && target.state_dir.is_some() {
            return Err("--state-file and --state-dir cannot be combined".to_string());
        }

        match &self.command {
            Command::Retry { step, .. } | Command::Resolve { step, .. } if step.trim().is_empty() => {
                Err("--step must name a step".to_string())
            }
            Command::Resolve { outputs, .. } => pairs_to_map(outputs, "--output").map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl Command {
    /// Command name for messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Status { .. } => "status",
            Command::Retry { .. } => "retry",
            Command::Resolve { .. } => "resolve",
            Command::Cleanup { .. } => "cleanup",
        }
    }

    /// Shared target arguments
    pub fn target(&self) -> &TargetArgs {
        match self {
            Command::Run { target, .. }
            | Command::Status { target, .. }
            | Command::Retry { target, .. }
            | Command::Resolve { target, .. }
            | Command::Cleanup { target, .. } => target,
        }
    }
}

impl TargetArgs {
    /// Resolve into an orchestrator target
    pub fn to_run_target(&self) -> Result<RunTarget, String> {
        Ok(RunTarget {
            params: pairs_to_map(&self.params, "--param")?,
            state_file: self.state_file.clone(),
            state_dir: self.state_dir.clone(),
            repo_root: self.repo_root.clone(),
        })
    }
}

/// `--output` pairs as JSON string values
pub(crate) fn outputs_map(pairs: &[(String, String)]) -> Result<crate::state::CapturedOutputs, String> {
    Ok(pairs_to_map(pairs, "--output")?
        .into_iter()
        .map(|(k, v)| (k, serde_json::Value::String(v)))
        .collect())
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Output manager for colored terminal output
    output: super::OutputManager,
    /// Environment-driven defaults
    pub settings: Settings,
}

impl RuntimeConfig {
    /// Create runtime configuration
    pub fn new(verbose: bool, quiet: bool, settings: Settings) -> Self {
        Self {
            output: super::OutputManager::new(verbose, quiet),
            settings,
        }
    }

    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self::new(args.verbose, args.quiet, Settings::from_env())
    }
}

impl RuntimeConfig {
    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print verbose message
    pub fn verbose_println(&self, message: &str) {
        let _ = self.output.verbose(message);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        let _ = self.output.success(message);
    }

    /// Print progress message
    pub fn progress_println(&self, message: &str) {
        let _ = self.output.progress(message);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }

    /// Check if verbose output is enabled
    pub fn is_verbose(&self) -> bool {
        self.output.is_verbose()
    }
}

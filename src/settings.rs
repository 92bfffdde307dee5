//! Environment-driven defaults.
//!
//! Every value has a built-in default and can be overridden through a
//! `RELEASE_ORCHESTRATOR_*` environment variable. Numeric overrides are
//! clamped to a sane range instead of being rejected.

use std::path::PathBuf;
use std::time::Duration;

/// Overrides the default state directory
pub const ENV_STATE_DIR: &str = "RELEASE_ORCHESTRATOR_STATE_DIR";
/// Overrides the `gh` binary
pub const ENV_GH_BIN: &str = "RELEASE_ORCHESTRATOR_GH";
/// Overrides the `git` binary
pub const ENV_GIT_BIN: &str = "RELEASE_ORCHESTRATOR_GIT";
/// Overrides the default poll interval (seconds)
pub const ENV_POLL_INTERVAL: &str = "RELEASE_ORCHESTRATOR_POLL_INTERVAL";
/// Overrides the default wait timeout (seconds)
pub const ENV_WAIT_TIMEOUT: &str = "RELEASE_ORCHESTRATOR_WAIT_TIMEOUT";
/// Overrides the limit for a single `gh` invocation (seconds)
pub const ENV_GH_TIMEOUT: &str = "RELEASE_ORCHESTRATOR_GH_TIMEOUT";

const MIN_POLL_INTERVAL_SECS: u64 = 1;
const MAX_POLL_INTERVAL_SECS: u64 = 600;
const MAX_WAIT_TIMEOUT_SECS: u64 = 24 * 3600;
const MAX_GH_TIMEOUT_SECS: u64 = 3600;

/// Defaults shared by the engine and the CLI
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding `<run-id>.json` state files
    pub state_dir: PathBuf,
    /// GitHub CLI binary
    pub gh_bin: String,
    /// Git binary
    pub git_bin: String,
    /// Poll interval used when a step's wait policy does not set one
    pub default_poll_interval: Duration,
    /// Timeout used when a step's wait policy does not set one
    pub default_wait_timeout: Duration,
    /// Limit for a single `gh` call; a hung call is killed
    pub gh_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(crate::state::DEFAULT_STATE_DIR),
            gh_bin: "gh".to_string(),
            git_bin: "git".to_string(),
            default_poll_interval: Duration::from_secs(30),   // Typical CI status refresh
            default_wait_timeout: Duration::from_secs(3600),  // Release workflows run long
            gh_timeout: crate::github::DEFAULT_GH_TIMEOUT,
        }
    }
}

impl Settings {
    /// Parse seconds from an environment value with clamping to [min, max]
    fn parse_secs(value: Option<String>, default: Duration, min: u64, max: u64) -> Duration {
        value
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|v| Duration::from_secs(v.clamp(min, max)))
            .unwrap_or(default)
    }

    fn non_empty(value: Option<String>) -> Option<String> {
        value.filter(|v| !v.trim().is_empty())
    }

    /// Create settings from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create settings from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            state_dir: Self::non_empty(lookup(ENV_STATE_DIR))
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            gh_bin: Self::non_empty(lookup(ENV_GH_BIN)).unwrap_or(defaults.gh_bin),
            git_bin: Self::non_empty(lookup(ENV_GIT_BIN)).unwrap_or(defaults.git_bin),
            default_poll_interval: Self::parse_secs(
                lookup(ENV_POLL_INTERVAL),
                defaults.default_poll_interval,
                MIN_POLL_INTERVAL_SECS,
                MAX_POLL_INTERVAL_SECS,
            ),
            default_wait_timeout: Self::parse_secs(
                lookup(ENV_WAIT_TIMEOUT),
                defaults.default_wait_timeout,
                1,
                MAX_WAIT_TIMEOUT_SECS,
            ),
            gh_timeout: Self::parse_secs(
                lookup(ENV_GH_TIMEOUT),
                defaults.gh_timeout,
                1,
                MAX_GH_TIMEOUT_SECS,
            ),
        }
    }
}

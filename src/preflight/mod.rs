//! Environment validation before any step runs.
//!
//! Every check runs even after an earlier one fails, so the operator sees the
//! complete list of problems at once. Preflight only reads; it never touches
//! the run state.

mod remote;
mod workspace;

pub use remote::{normalize_identity, normalize_remote};
pub use workspace::LocalWorkspace;

use crate::error::{Result, Veto, VetoError};
use crate::plan::{PreflightSpec, RepositorySpec};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;

/// Check name for the remote identity comparison
pub const CHECK_REPOSITORY_IDENTITY: &str = "repository-identity";
/// Check name for tool availability
pub const CHECK_REQUIRED_TOOLS: &str = "required-tools";
/// Check name for repository layout
pub const CHECK_REQUIRED_PATHS: &str = "required-paths";
/// Check name for uncommitted changes
pub const CHECK_WORKING_TREE: &str = "working-tree";
/// Check name for leftovers of an earlier packaging attempt
pub const CHECK_STALE_ARTIFACTS: &str = "stale-artifacts";

/// A configured git remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Remote name
    pub name: String,
    /// Fetch URL
    pub url: String,
}

/// What preflight needs to know about the execution environment
pub trait PreflightEnvironment {
    /// Configured remotes
    fn remotes(&self) -> impl Future<Output = Result<Vec<RemoteInfo>>>;

    /// `git status --porcelain` lines
    fn working_tree_changes(&self) -> impl Future<Output = Result<Vec<String>>>;

    /// Whether a program is reachable on PATH
    fn tool_available(&self, tool: &str) -> bool;

    /// Whether a path relative to the repository root exists
    fn path_exists(&self, relative: &str) -> bool;

    /// Paths matching a glob pattern relative to the repository root
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;
}

/// Per-invocation preflight switches
#[derive(Debug, Clone, Default)]
pub struct PreflightOptions {
    /// Skip the clean working tree check
    pub allow_dirty: bool,
    /// Repository-relative paths the clean tree check ignores (state file, state dir)
    pub ignored_paths: Vec<String>,
}

/// Individual check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration_ms: u64,
}

/// Successful preflight outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub checks: Vec<PreflightCheck>,
    /// Remote that matched the expected identity
    pub matched_remote: Option<String>,
}

impl PreflightReport {
    pub fn summary(&self) -> String {
        let skipped = self.checks.iter().filter(|c| c.message.starts_with("skipped")).count();
        if skipped > 0 {
            format!(
                "✅ All {} checks passed ({} skipped)",
                self.checks.len(),
                skipped
            )
        } else {
            format!("✅ All {} checks passed", self.checks.len())
        }
    }
}

/// Preflight validator for a plan
#[derive(Debug)]
pub struct Preflight<'a> {
    repository: &'a RepositorySpec,
    spec: &'a PreflightSpec,
    options: PreflightOptions,
}

impl<'a> Preflight<'a> {
    /// Create a new validator
    pub fn new(
        repository: &'a RepositorySpec,
        spec: &'a PreflightSpec,
        options: PreflightOptions,
    ) -> Self {
        Self {
            repository,
            spec,
            options,
        }
    }

    /// Run every check; fail with the complete veto list if any failed
    pub async fn check<E: PreflightEnvironment>(&self, env: &E) -> Result<PreflightReport> {
        let mut checks = Vec::new();
        let mut vetoes = Vec::new();

        let matched_remote = self.check_repository_identity(env, &mut checks, &mut vetoes).await;
        self.check_required_tools(env, &mut checks, &mut vetoes);
        self.check_required_paths(env, &mut checks, &mut vetoes);
        self.check_working_tree(env, &mut checks, &mut vetoes).await;
        self.check_stale_artifacts(env, &mut checks, &mut vetoes);

        if !vetoes.is_empty() {
            for veto in &vetoes {
                log::warn!("Preflight veto [{}]: {}", veto.check, veto.message);
            }
            return Err(VetoError { vetoes }.into());
        }

        Ok(PreflightReport {
            checks,
            matched_remote,
        })
    }

    fn record(
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
        name: &str,
        started: std::time::Instant,
        outcome: std::result::Result<String, String>,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(message) => checks.push(PreflightCheck {
                name: name.to_string(),
                passed: true,
                message,
                duration_ms,
            }),
            Err(message) => {
                checks.push(PreflightCheck {
                    name: name.to_string(),
                    passed: false,
                    message: message.clone(),
                    duration_ms,
                });
                vetoes.push(Veto {
                    check: name.to_string(),
                    message,
                });
            }
        }
    }

    async fn check_repository_identity<E: PreflightEnvironment>(
        &self,
        env: &E,
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
    ) -> Option<String> {
        let started = std::time::Instant::now();
        let Some(expected) = self.repository.expected.as_deref() else {
            Self::record(
                checks,
                vetoes,
                CHECK_REPOSITORY_IDENTITY,
                started,
                Ok("skipped (no expected repository configured)".to_string()),
            );
            return None;
        };
        let expected = normalize_identity(expected);

        let remotes = match env.remotes().await {
            Ok(remotes) => remotes,
            Err(e) => {
                Self::record(
                    checks,
                    vetoes,
                    CHECK_REPOSITORY_IDENTITY,
                    started,
                    Err(format!("failed to list git remotes: {}", e)),
                );
                return None;
            }
        };

        let mut candidates: Vec<&RemoteInfo> = remotes
            .iter()
            .filter(|r| match &self.repository.remote {
                Some(name) => &r.name == name,
                None => true,
            })
            .filter(|r| normalize_remote(&r.url).as_deref() == Some(expected.as_str()))
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        match candidates.first() {
            Some(remote) => {
                Self::record(
                    checks,
                    vetoes,
                    CHECK_REPOSITORY_IDENTITY,
                    started,
                    Ok(format!("remote '{}' points to {}", remote.name, expected)),
                );
                Some(remote.name.clone())
            }
            None => {
                let seen = remotes
                    .iter()
                    .map(|r| format!("{}={}", r.name, r.url))
                    .collect::<Vec<_>>();
                let scope = match &self.repository.remote {
                    Some(name) => format!("remote '{}'", name),
                    None => "no git remote".to_string(),
                };
                Self::record(
                    checks,
                    vetoes,
                    CHECK_REPOSITORY_IDENTITY,
                    started,
                    Err(format!(
                        "{} points to {} (found: {})",
                        scope,
                        expected,
                        if seen.is_empty() { "none".to_string() } else { seen.join(", ") }
                    )),
                );
                None
            }
        }
    }

    fn check_required_tools<E: PreflightEnvironment>(
        &self,
        env: &E,
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
    ) {
        let started = std::time::Instant::now();
        let missing: Vec<&str> = self
            .spec
            .required_tools
            .iter()
            .map(String::as_str)
            .filter(|tool| !env.tool_available(tool))
            .collect();

        let outcome = if missing.is_empty() {
            Ok(format!("{} tool(s) available", self.spec.required_tools.len()))
        } else {
            Err(format!("missing required tools: {}", missing.join(", ")))
        };
        Self::record(checks, vetoes, CHECK_REQUIRED_TOOLS, started, outcome);
    }

    fn check_required_paths<E: PreflightEnvironment>(
        &self,
        env: &E,
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
    ) {
        let started = std::time::Instant::now();
        let missing: Vec<&str> = self
            .spec
            .required_paths
            .iter()
            .map(String::as_str)
            .filter(|path| !env.path_exists(path))
            .collect();

        let outcome = if missing.is_empty() {
            Ok(format!("{} path(s) present", self.spec.required_paths.len()))
        } else {
            Err(format!(
                "repository layout check failed, missing: {}",
                missing.join(", ")
            ))
        };
        Self::record(checks, vetoes, CHECK_REQUIRED_PATHS, started, outcome);
    }

    async fn check_working_tree<E: PreflightEnvironment>(
        &self,
        env: &E,
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
    ) {
        let started = std::time::Instant::now();
        if self.options.allow_dirty {
            Self::record(
                checks,
                vetoes,
                CHECK_WORKING_TREE,
                started,
                Ok("skipped (--allow-dirty)".to_string()),
            );
            return;
        }

        let outcome = match env.working_tree_changes().await {
            Ok(lines) => {
                let dirty: Vec<String> = lines
                    .into_iter()
                    .filter(|line| !line.trim().is_empty())
                    .filter(|line| !self.is_ignored_status_line(line))
                    .collect();
                if dirty.is_empty() {
                    Ok("working tree clean".to_string())
                } else {
                    Err(format!(
                        "working tree has {} uncommitted change(s): {}",
                        dirty.len(),
                        dirty.join("; ")
                    ))
                }
            }
            Err(e) => Err(format!("failed to read git status: {}", e)),
        };
        Self::record(checks, vetoes, CHECK_WORKING_TREE, started, outcome);
    }

    fn check_stale_artifacts<E: PreflightEnvironment>(
        &self,
        env: &E,
        checks: &mut Vec<PreflightCheck>,
        vetoes: &mut Vec<Veto>,
    ) {
        let started = std::time::Instant::now();
        let mut found = Vec::new();
        let mut errors = Vec::new();
        for pattern in &self.spec.stale_artifacts {
            match env.glob(pattern) {
                Ok(paths) => found.extend(paths.into_iter().map(|p| p.display().to_string())),
                Err(e) => errors.push(format!("{}: {}", pattern, e)),
            }
        }

        let outcome = if !errors.is_empty() {
            Err(format!("invalid artifact patterns: {}", errors.join("; ")))
        } else if found.is_empty() {
            Ok("no stale artifacts".to_string())
        } else {
            Err(format!(
                "artifacts from a previous packaging attempt remain: {}",
                found.join(", ")
            ))
        };
        Self::record(checks, vetoes, CHECK_STALE_ARTIFACTS, started, outcome);
    }

    /// Whether a porcelain line refers to the run's own state
    fn is_ignored_status_line(&self, line: &str) -> bool {
        let Some(mut path) = line.get(3..).map(str::trim).filter(|p| !p.is_empty()) else {
            return false;
        };
        if let Some((_, renamed)) = path.split_once(" -> ") {
            path = renamed.trim();
        }
        let path = path.trim_matches('"').trim_end_matches('/');

        self.options.ignored_paths.iter().any(|ignored| {
            let ignored = ignored.trim_end_matches('/');
            !ignored.is_empty()
                && (path == ignored
                    || path.starts_with(&format!("{}/", ignored))
                    || ignored.starts_with(&format!("{}/", path)))
        })
    }
}

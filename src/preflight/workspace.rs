//! Preflight environment backed by the local checkout.

use super::{PreflightEnvironment, RemoteInfo};
use crate::error::{CliError, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// The repository checkout the release runs from
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
    git_bin: String,
}

impl LocalWorkspace {
    /// Create a workspace rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P, git_bin: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            git_bin: git_bin.into(),
        }
    }

    /// Repository root
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        log::debug!("Running {} {}", self.git_bin, args.join(" "));
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(&self.root)
            .output()
            .await
            .map_err(|e| CliError::ExecutionFailed {
                command: format!("{} {}", self.git_bin, args.join(" ")),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CliError::ExecutionFailed {
                command: format!("{} {}", self.git_bin, args.join(" ")),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `git remote -v` output, keeping fetch URLs
fn parse_remotes(output: &str) -> Vec<RemoteInfo> {
    let mut remotes: Vec<RemoteInfo> = Vec::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(name), Some(url)) = (parts.next(), parts.next()) else {
            continue;
        };
        if parts.next() == Some("(push)") {
            continue;
        }
        if !remotes.iter().any(|r| r.name == name && r.url == url) {
            remotes.push(RemoteInfo {
                name: name.to_string(),
                url: url.to_string(),
            });
        }
    }
    remotes
}

impl PreflightEnvironment for LocalWorkspace {
    async fn remotes(&self) -> Result<Vec<RemoteInfo>> {
        let output = self.git(&["remote", "-v"]).await?;
        Ok(parse_remotes(&output))
    }

    async fn working_tree_changes(&self) -> Result<Vec<String>> {
        let output = self.git(&["status", "--porcelain"]).await?;
        Ok(output.lines().map(str::to_string).collect())
    }

    fn tool_available(&self, tool: &str) -> bool {
        which::which(tool).is_ok()
    }

    fn path_exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let absolute = self.root.join(pattern);
        let entries = glob::glob(&absolute.to_string_lossy()).map_err(|e| {
            CliError::InvalidArguments {
                reason: format!("bad glob pattern '{}': {}", pattern, e),
            }
        })?;

        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|path| path.strip_prefix(&self.root).map(Path::to_path_buf).unwrap_or(path))
            .collect())
    }
}

//! State persistence for release runs.
//!
//! One JSON file per run, written atomically, guarded for the lifetime of the
//! store by an exclusive advisory lock on a sibling `.lock` file.

use crate::error::{Result, StateError};
use crate::state::ReleaseRun;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Default state directory, relative to the working directory
pub const DEFAULT_STATE_DIR: &str = ".release-orchestrator";

/// Durable store for a single release run
#[derive(Debug)]
pub struct StateStore {
    /// Run this store is keyed by
    run_id: String,
    /// Path to state file
    state_file_path: PathBuf,
    /// Path to lock file
    lock_file_path: PathBuf,
    /// Lock held for the whole invocation
    _lock: FileLock,
}

/// Exclusive lock on the run's lock file.
///
/// The lock is released when the file handle is dropped.
#[derive(Debug)]
struct FileLock {
    #[cfg(unix)]
    _handle: nix::fcntl::Flock<fs::File>,
    #[cfg(not(unix))]
    path: PathBuf,
}

#[cfg(not(unix))]
impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

impl StateStore {
    /// Default state file location for a run
    pub fn default_path(state_dir: &Path, run_id: &str) -> PathBuf {
        state_dir.join(format!("{}.json", run_id))
    }

    /// Open the store for `run_id`, acquiring its lock.
    ///
    /// Fails immediately with [`StateError::RunLocked`] if another invocation
    /// holds the lock.
    pub fn open<P: AsRef<Path>>(state_file_path: P, run_id: &str) -> Result<Self> {
        let state_file_path = state_file_path.as_ref().to_path_buf();
        let lock_file_path = state_file_path.with_extension("lock");

        if let Some(parent) = state_file_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to create state directory {}: {}", parent.display(), e),
            })?;
        }

        let lock = acquire_lock(&lock_file_path, run_id)?;
        log::debug!("Acquired run lock {}", lock_file_path.display());

        Ok(Self {
            run_id: run_id.to_string(),
            state_file_path,
            lock_file_path,
            _lock: lock,
        })
    }

    /// Run identifier this store is keyed by
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path to the state file
    pub fn path(&self) -> &Path {
        &self.state_file_path
    }

    /// Check if a record exists
    pub fn exists(&self) -> bool {
        self.state_file_path.exists()
    }

    /// Load the run, or [`StateError::NotFound`] if nothing was saved yet
    pub fn load(&self) -> Result<ReleaseRun> {
        read_run(&self.state_file_path, &self.run_id)
    }

    /// Read a run without taking its lock, `None` if nothing was saved yet.
    ///
    /// For display only; the result may be stale by the time it is shown.
    pub fn inspect<P: AsRef<Path>>(state_file_path: P, run_id: &str) -> Result<Option<ReleaseRun>> {
        match read_run(state_file_path.as_ref(), run_id) {
            Ok(run) => Ok(Some(run)),
            Err(crate::error::ReleaseError::State(StateError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Save the run atomically (write temp, fsync, rename)
    pub fn save(&self, run: &mut ReleaseRun) -> Result<()> {
        if run.run_id != self.run_id {
            return Err(StateError::SaveFailed {
                reason: format!(
                    "run '{}' cannot be saved into the store for '{}'",
                    run.run_id, self.run_id
                ),
            }
            .into());
        }

        run.save_version += 1;
        run.touch();

        let serialized = serde_json::to_string_pretty(run).map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to serialize state: {}", e),
        })?;

        let temp_file_path = self.state_file_path.with_extension("tmp");

        {
            let mut file = fs::File::create(&temp_file_path).map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to create temp file: {}", e),
            })?;

            file.write_all(serialized.as_bytes())
                .map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to write state: {}", e),
                })?;

            file.sync_all().map_err(|e| StateError::SaveFailed {
                reason: format!("Failed to sync file: {}", e),
            })?;
        }

        fs::rename(&temp_file_path, &self.state_file_path).map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to rename temp file: {}", e),
        })?;

        #[cfg(unix)]
        {
            if let Some(parent) = self.state_file_path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::File::open(parent)
                    .and_then(|dir| dir.sync_all())
                    .map_err(|e| StateError::SaveFailed {
                        reason: format!("Failed to sync state directory: {}", e),
                    })?;
            }
        }

        log::debug!(
            "Saved run {} (save #{}) to {}",
            run.run_id,
            run.save_version,
            self.state_file_path.display()
        );
        Ok(())
    }

    /// Delete the record and its lock file, consuming the store
    pub fn delete(self) -> Result<()> {
        let mut errors = Vec::new();

        if self.state_file_path.exists()
            && let Err(e) = fs::remove_file(&self.state_file_path)
        {
            errors.push(format!("Failed to remove state file: {}", e));
        }

        if self.lock_file_path.exists()
            && let Err(e) = fs::remove_file(&self.lock_file_path)
        {
            errors.push(format!("Failed to remove lock file: {}", e));
        }

        if !errors.is_empty() {
            return Err(StateError::SaveFailed {
                reason: format!("Cleanup errors: {}", errors.join("; ")),
            }
            .into());
        }

        Ok(())
    }
}

fn read_run(path: &Path, run_id: &str) -> Result<ReleaseRun> {
    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StateError::NotFound {
                run_id: run_id.to_string(),
            }
            .into());
        }
        Err(e) => {
            return Err(StateError::LoadFailed {
                reason: format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                ),
            }
            .into());
        }
    };

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| StateError::LoadFailed {
            reason: format!("Failed to read file {}: {}", path.display(), e),
        })?;

    // Check the version before the full decode so a newer format is
    // reported as such rather than as corruption.
    let header: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| StateError::Corrupted {
            reason: format!("{}: {}", path.display(), e),
        })?;
    if let Some(found) = header.get("format_version").and_then(|v| v.as_u64())
        && found > u64::from(crate::state::STATE_FORMAT_VERSION)
    {
        return Err(StateError::VersionMismatch {
            supported: crate::state::STATE_FORMAT_VERSION,
            found: u32::try_from(found).unwrap_or(u32::MAX),
        }
        .into());
    }

    let run: ReleaseRun = serde_json::from_value(header).map_err(|e| StateError::Corrupted {
        reason: format!("Failed to deserialize state: {}", e),
    })?;

    if run.run_id != run_id {
        return Err(StateError::Corrupted {
            reason: format!(
                "{} holds run '{}', expected '{}'",
                path.display(),
                run.run_id,
                run_id
            ),
        }
        .into());
    }

    run.validate()?;
    Ok(run)
}

fn lock_data() -> String {
    serde_json::json!({
        "pid": std::process::id(),
        "acquired_at": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

fn describe_holder(lock_file_path: &Path) -> String {
    match fs::read_to_string(lock_file_path) {
        Ok(content) => match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(info) => format!(
                "pid {}, since {}",
                info["pid"].as_u64().map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
                info["acquired_at"].as_str().unwrap_or("?")
            ),
            Err(_) => "unknown holder".to_string(),
        },
        Err(_) => "unknown holder".to_string(),
    }
}

#[cfg(unix)]
fn acquire_lock(lock_file_path: &Path, run_id: &str) -> Result<FileLock> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_file_path)
        .map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to open lock file: {}", e),
        })?;

    let mut handle = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(handle) => handle,
        Err((_, e)) if e == Errno::EWOULDBLOCK => {
            return Err(StateError::RunLocked {
                run_id: run_id.to_string(),
                holder: describe_holder(lock_file_path),
            }
            .into());
        }
        Err((_, e)) => {
            return Err(StateError::SaveFailed {
                reason: format!("flock error: {}", e),
            }
            .into());
        }
    };

    // We hold the lock, so rewriting the diagnostics is safe.
    handle.set_len(0).map_err(|e| StateError::SaveFailed {
        reason: format!("Failed to truncate lock file: {}", e),
    })?;
    handle
        .write_all(lock_data().as_bytes())
        .map_err(|e| StateError::SaveFailed {
            reason: format!("Failed to write lock file: {}", e),
        })?;
    let _ = handle.sync_all();

    Ok(FileLock { _handle: handle })
}

#[cfg(not(unix))]
fn acquire_lock(lock_file_path: &Path, run_id: &str) -> Result<FileLock> {
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_file_path)
    {
        Ok(mut file) => {
            file.write_all(lock_data().as_bytes())
                .map_err(|e| StateError::SaveFailed {
                    reason: format!("Failed to write lock file: {}", e),
                })?;
            Ok(FileLock {
                path: lock_file_path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(StateError::RunLocked {
            run_id: run_id.to_string(),
            holder: describe_holder(lock_file_path),
        }
        .into()),
        Err(e) => Err(StateError::SaveFailed {
            reason: format!("Failed to create lock file: {}", e),
        }
        .into()),
    }
}

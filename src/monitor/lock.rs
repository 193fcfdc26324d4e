//! Single-instance lock for the monitor views
//!
//! The lock is an exclusive `flock` on the lock file, held for the life of
//! the guard; the file also carries the owner's PID for the error message.
//! A file nobody holds the flock on is stale, whatever its content. The
//! kernel releases the flock when the owner exits, so a crashed monitor
//! never blocks the next one. The file is removed when the guard drops.

use crate::error::MonitorError;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bounded retries when the path is swapped under us between open and flock
const ACQUIRE_ROUNDS: usize = 8;

/// Try a non-blocking exclusive flock; `Ok(false)` when someone else holds it
fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    // SAFETY: the descriptor is owned by `file` and open for this call
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Whether the open handle still refers to the file at `path`
fn same_file(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Held lock; removes the file on drop
#[derive(Debug)]
pub struct MonitorLock {
    path: PathBuf,
    /// Keeps the flock alive; closed after the path is removed
    _file: File,
}

impl MonitorLock {
    /// Take the lock at `path`, replacing a stale one
    pub fn acquire(path: &Path) -> Result<Self, MonitorError> {
        let failed = |e: io::Error| MonitorError::LockFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(failed)?;
        }

        for _ in 0..ACQUIRE_ROUNDS {
            // No truncation before the flock is ours
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(failed)?;

            if !try_lock_exclusive(&file).map_err(failed)? {
                let mut content = String::new();
                let _ = file.read_to_string(&mut content);
                return Err(MonitorError::AlreadyRunning {
                    pid: content.trim().parse().unwrap_or(0),
                    path: path.to_path_buf(),
                });
            }

            // A releasing owner may have unlinked the file we opened
            if !same_file(&file, path).map_err(failed)? {
                debug!(path = %path.display(), "Lock file replaced during acquire, retrying");
                continue;
            }

            let mut previous = String::new();
            let _ = file.read_to_string(&mut previous);
            if !previous.trim().is_empty() {
                warn!(path = %path.display(), previous = previous.trim(), "Replacing stale lock");
            }

            file.set_len(0).map_err(failed)?;
            file.seek(SeekFrom::Start(0)).map_err(failed)?;
            writeln!(file, "{}", std::process::id()).map_err(failed)?;
            debug!(path = %path.display(), "Lock acquired");
            return Ok(Self {
                path: path.to_path_buf(),
                _file: file,
            });
        }

        Err(MonitorError::LockFailed {
            path: path.to_path_buf(),
            reason: "lock file keeps being replaced".to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MonitorLock {
    fn drop(&mut self) {
        // Unlink while still holding the flock; the handle closes afterwards
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove lock");
        }
    }
}

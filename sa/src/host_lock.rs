//! Host-wide exclusive lock
//!
//! The broadcast channel only connects instances inside one process. For
//! separate processes on one host, an exclusive advisory lock on a shared
//! file gives real mutual exclusion: whoever holds the lock is primary. The
//! OS drops the lock when the holder exits, even if it is killed.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::CoordinationError;

fn lock_io(path: &Path, source: std::io::Error) -> CoordinationError {
    CoordinationError::LockIo {
        path: path.to_path_buf(),
        source,
    }
}

/// A held host lock; released on drop
#[derive(Debug)]
pub struct HostLock {
    file: File,
    path: PathBuf,
}

impl HostLock {
    /// Try to take the lock without blocking
    ///
    /// Returns `Ok(None)` if another holder has it. The file is left in place
    /// on release so every contender always locks the same inode.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, CoordinationError> {
        let path = path.as_ref();
        debug!(?path, "HostLock::try_acquire: called");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| lock_io(path, e))?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_io(path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!(?path, "HostLock::try_acquire: held elsewhere");
                return Ok(None);
            }
            Err(e) => return Err(lock_io(path, e)),
        }

        file.set_len(0).map_err(|e| lock_io(path, e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| lock_io(path, e))?;
        write!(file, "{}", std::process::id()).map_err(|e| lock_io(path, e))?;
        file.flush().map_err(|e| lock_io(path, e))?;

        debug!(?path, pid = std::process::id(), "HostLock::try_acquire: acquired");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded by the current holder, if any
    pub fn read_owner(path: impl AsRef<Path>) -> Option<u32> {
        let contents = fs::read_to_string(path).ok()?;
        contents.trim().parse().ok()
    }

    /// Release explicitly; same as dropping
    pub fn release(self) {}
}

impl Drop for HostLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.set_len(0) {
            warn!(path = ?self.path, error = %e, "Failed to clear lock owner");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = ?self.path, error = %e, "Failed to unlock host lock");
        }
        debug!(path = ?self.path, "HostLock::drop: released");
    }
}

//! Exclusive advisory lock files
//!
//! The lock is taken on a dedicated `<name>.lock` sibling rather than on the
//! data file, since every atomic rename replaces the data file's inode.

use super::{ensure_dir, FileResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held exclusive lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Block until the exclusive lock for `data_path` is acquired
    pub fn acquire(data_path: &Path) -> FileResult<Self> {
        if let Some(guard) = Self::try_acquire(data_path)? {
            return Ok(guard);
        }

        let (file, path) = open_lock_file(data_path)?;
        log::debug!("[LockGuard] {:?} is held by another process, waiting", path);
        file.lock_exclusive()
            .map_err(|e| format!("Failed to lock {:?}: {}", path, e))?;

        log::debug!("[LockGuard] Acquired {:?} after waiting", path);
        Ok(Self { file, path })
    }

    /// Try to acquire the lock without waiting; `None` if another holder has it
    pub fn try_acquire(data_path: &Path) -> FileResult<Option<Self>> {
        let (file, path) = open_lock_file(data_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                log::debug!("[LockGuard] Acquired {:?}", path);
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(format!("Failed to lock {:?}: {}", path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("[LockGuard] Failed to release {:?}: {}", self.path, e);
        } else {
            log::debug!("[LockGuard] Released {:?}", self.path);
        }
    }
}

fn open_lock_file(data_path: &Path) -> FileResult<(File, PathBuf)> {
    let path = lock_path_for(data_path);
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| format!("Failed to open lock file {:?}: {}", path, e))?;
    Ok((file, path))
}

/// `progress.json` -> `progress.json.lock`
pub fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    data_path.with_file_name(name)
}

//! Installation directory locking
//!
//! Install, Patch and Restore rewrite files inside a shared installation
//! directory, so only one run may hold it from install until restore.

use crate::{PackError, PackResult};
use fslock::LockFile;
use std::path::{Path, PathBuf};

/// RAII guard for an installation directory
///
/// Acquires an advisory file lock on creation and releases it on drop. The
/// lock file sits next to the directory (`<dir>.staticpack.lock`) so it never
/// ends up inside a bundle.
#[derive(Debug)]
pub struct BuildLock {
    #[allow(dead_code)]
    lock: LockFile,
    lock_path: PathBuf,
}

impl BuildLock {
    /// Lock file path for an installation directory
    pub fn lock_path_for(dir: &Path) -> PackResult<PathBuf> {
        let name = dir.file_name().ok_or_else(|| {
            PackError::Lock(format!("cannot lock directory without a name: {}", dir.display()))
        })?;
        Ok(dir.with_file_name(format!("{}.staticpack.lock", name.to_string_lossy())))
    }

    /// Acquire the lock, waiting for any other holder
    pub fn acquire(dir: &Path) -> PackResult<Self> {
        let lock_path = Self::lock_path_for(dir)?;

        let mut lock = LockFile::open(&lock_path).map_err(|e| {
            PackError::Lock(format!(
                "Failed to open lock file {}: {}",
                lock_path.display(),
                e
            ))
        })?;

        let acquired = lock
            .try_lock()
            .map_err(|e| PackError::Lock(format!("Failed to lock {}: {}", dir.display(), e)))?;
        if !acquired {
            tracing::info!(
                "Waiting for another build to release {}...",
                dir.display()
            );
            lock.lock()
                .map_err(|e| PackError::Lock(format!("Failed to lock {}: {}", dir.display(), e)))?;
        }

        tracing::debug!("Acquired build lock: {}", lock_path.display());
        Ok(Self { lock, lock_path })
    }

    /// Try to acquire the lock without blocking
    pub fn try_acquire(dir: &Path) -> PackResult<Option<Self>> {
        let lock_path = Self::lock_path_for(dir)?;

        let mut lock = LockFile::open(&lock_path).map_err(|e| {
            PackError::Lock(format!(
                "Failed to open lock file {}: {}",
                lock_path.display(),
                e
            ))
        })?;

        match lock.try_lock() {
            Ok(true) => Ok(Some(Self { lock, lock_path })),
            Ok(false) => Ok(None),
            Err(e) => Err(PackError::Lock(format!(
                "Failed to lock {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        tracing::debug!("Released build lock: {}", self.lock_path.display());
    }
}

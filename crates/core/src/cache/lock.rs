//! Whole-file advisory locks on entry files.
//!
//! Locks belong to an open file handle, so they coordinate separate handles
//! in one process as well as separate processes sharing a cache directory,
//! and the OS drops them when the holding process dies. Acquisition blocks
//! without a timeout; it runs on tokio's blocking pool.

use std::fs::File;
use std::io;
use std::sync::Arc;

use fs2::FileExt;

use crate::Error;

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Coexists with other shared holders.
    Shared,
    /// Excludes every other holder.
    Exclusive,
}

/// A held lock on an entry file. Released on drop.
#[derive(Debug)]
pub struct EntryLock {
    file: Arc<File>,
    mode: LockMode,
}

impl EntryLock {
    /// Block the current thread until the lock is granted.
    pub fn acquire_blocking(file: Arc<File>, mode: LockMode) -> io::Result<Self> {
        match mode {
            LockMode::Shared => FileExt::lock_shared(&*file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&*file)?,
        }
        Ok(Self { file, mode })
    }

    /// Wait for the lock without parking an async worker.
    ///
    /// If the calling future is dropped while waiting, the lock is still
    /// granted on the blocking thread and released right away.
    pub async fn acquire(file: Arc<File>, mode: LockMode) -> Result<Self, Error> {
        tokio::task::spawn_blocking(move || Self::acquire_blocking(file, mode))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?
            .map_err(Error::from)
    }

    /// Non-blocking variant; `Ok(None)` when another holder conflicts.
    pub fn try_acquire(file: Arc<File>, mode: LockMode) -> io::Result<Option<Self>> {
        let result = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&*file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&*file),
        };
        match result {
            Ok(()) => Ok(Some(Self { file, mode })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn file(&self) -> &Arc<File> {
        &self.file
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&*self.file) {
            tracing::warn!(error = %e, "Failed to release entry lock");
        }
    }
}

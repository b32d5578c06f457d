//! Advisory batch lock
//!
//! One exclusive file lock per target database, held for the whole batch.
//! A second process finds it taken and fails fast instead of waiting.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use log::{debug, warn};

use crate::domain::result::{Error, Result};

/// Held lock; released when dropped
#[derive(Debug)]
pub struct BatchLock {
    file: File,
    path: PathBuf,
}

impl BatchLock {
    /// Take the lock without blocking
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired batch lock {}", path.display());
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if is_contended(&e) => Err(Error::ConcurrentRunDetected(path.to_path_buf())),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release batch lock {}: {}", self.path.display(), e);
        }
    }
}

/// Request to stop a batch between units
///
/// Cloned handles share one flag. A unit already running finishes (or
/// fails) normally; the next one is not started.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.duckdb.lock");

        let held = BatchLock::acquire(&path).unwrap();
        let err = BatchLock::acquire(&path).unwrap_err();
        assert_eq!(err.kind(), "ConcurrentRunDetected");

        drop(held);
        assert!(BatchLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_in_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope").join("db.lock");
        let err = BatchLock::acquire(&path).unwrap_err();
        assert_eq!(err.kind(), "Io");
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_raised());
        handle.raise();
        assert!(signal.is_raised());
    }
}

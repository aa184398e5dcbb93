//! Advisory per-collection file locks.
//!
//! `flock`-style locks belong to the open file, so two opens of the same lock
//! file exclude each other whether they come from two threads or from two
//! processes on the host.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::StoreError;

/// Exclusive lock on one collection, released on drop.
#[derive(Debug)]
pub struct CollectionLock {
    file: File,
    path: PathBuf,
}

impl CollectionLock {
    /// Blocks until the lock is held. There is no timeout.
    pub fn acquire(path: &Path, collection: &str) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|source| StoreError::Lock {
                collection: collection.to_string(),
                source,
            })?;

        file.lock_exclusive().map_err(|source| StoreError::Lock {
            collection: collection.to_string(),
            source,
        })?;

        debug!(path = %path.display(), "Acquired collection lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for CollectionLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            // Closing the handle releases it anyway.
            warn!(path = %self.path.display(), error = %e, "Failed to unlock collection");
        } else {
            debug!(path = %self.path.display(), "Released collection lock");
        }
    }
}

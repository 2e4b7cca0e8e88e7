//! Store directory management.
//!
//! This module handles the file system layout for VersoDB:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK              # Advisory lock for single-process access
//! ├─ ledger.vdb        # Transaction ledger (header + bitmap pages)
//! ├─ records.vdb       # Memory-mapped section file
//! └─ records.cache     # Section-cache snapshot (optional)
//! ```
//!
//! The LOCK file ensures only one process can open the store at a time.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// File names within the store directory.
const LOCK_FILE: &str = "LOCK";
const LEDGER_FILE: &str = "ledger.vdb";
const RECORDS_FILE: &str = "records.vdb";
const CACHE_FILE: &str = "records.cache";

/// Manages the store directory structure and file locking.
///
/// # Thread Safety
///
/// The `StoreDir` holds an exclusive lock on the store directory. Only one
/// `StoreDir` instance can exist per directory at a time.
#[derive(Debug)]
pub struct StoreDir {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - A store already exists and `error_if_exists` is true
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool, error_if_exists: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        if error_if_exists && path.join(LEDGER_FILE).exists() {
            return Err(CoreError::invalid_argument(format!(
                "store already exists: {}",
                path.display()
            )));
        }

        // Acquire exclusive lock (non-blocking).
        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the transaction ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.path.join(LEDGER_FILE)
    }

    /// Returns the path to the record section file.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.path.join(RECORDS_FILE)
    }

    /// Returns the path to the section-cache snapshot file.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.path.join(CACHE_FILE)
    }

    /// Checks if this is a new (empty) store directory.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.ledger_path().exists()
    }

    /// Syncs the store directory so metadata updates are durable.
    ///
    /// On Windows, directory fsync is not supported; the NTFS journal
    /// provides equivalent metadata durability.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl Drop for StoreDir {
    fn drop(&mut self) {
        // The advisory lock is released when the file handle closes.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_store");
        assert!(!path.exists());

        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(path.is_dir());
        assert!(dir.is_new_store());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("nonexistent"), false, false);
        assert!(result.is_err());
    }

    #[test]
    fn error_if_exists_rejects_existing_store() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        {
            let dir = StoreDir::open(&path, true, false).unwrap();
            std::fs::write(dir.ledger_path(), b"x").unwrap();
        }

        let result = StoreDir::open(&path, true, true);
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");
        let _dir = StoreDir::open(&path, true, false).unwrap();

        let result = StoreDir::open(&path, true, false);
        assert!(matches!(result, Err(CoreError::StoreLocked)));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");
        {
            let _dir = StoreDir::open(&path, true, false).unwrap();
        }
        let _dir = StoreDir::open(&path, true, false).unwrap();
    }

    #[test]
    fn paths_are_correct() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("paths");
        let dir = StoreDir::open(&path, true, false).unwrap();

        assert_eq!(dir.ledger_path(), path.join("ledger.vdb"));
        assert_eq!(dir.records_path(), path.join("records.vdb"));
        assert_eq!(dir.cache_path(), path.join("records.cache"));
    }
}

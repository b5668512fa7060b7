//! Exclusive `<file>.lock` files.
//!
//! The lock file doubles as the staging file: new content is written into
//! it and it is renamed over the target on commit. Creating it with
//! `O_EXCL` semantics is the only cross-process mutual exclusion.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};

/// Suffix appended to the target path to form the lock path.
pub const LOCK_SUFFIX: &str = ".lock";

/// The lock path for `target`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// An acquired lock file. Dropping it without committing deletes it.
#[derive(Debug)]
pub(crate) struct LockFile {
    lock_path: PathBuf,
    target: PathBuf,
    file: Option<File>,
    armed: bool,
}

impl LockFile {
    /// Create `<target>.lock`, failing with
    /// [`IndexError::LockContention`] if it already exists.
    pub(crate) fn acquire(target: &Path) -> IndexResult<Self> {
        let lock_path = lock_path_for(target);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => {
                debug!(path = %lock_path.display(), "lock acquired");
                Ok(Self {
                    lock_path,
                    target: target.to_path_buf(),
                    file: Some(file),
                    armed: true,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %lock_path.display(), "lock held elsewhere");
                Err(IndexError::LockContention(lock_path))
            }
            Err(e) => Err(IndexError::io(&lock_path, e)),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.lock_path
    }

    /// The open lock file, positioned at the start for a fresh write.
    pub(crate) fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "lock file already closed"))
    }

    /// Close the lock file and rename it over the target.
    ///
    /// If the rename fails the lock file is left in place.
    pub(crate) fn commit(mut self) -> IndexResult<()> {
        drop(self.file.take());
        self.armed = false;
        match fs::rename(&self.lock_path, &self.target) {
            Ok(()) => {
                debug!(path = %self.target.display(), "lock committed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    lock = %self.lock_path.display(),
                    error = %e,
                    "rename failed; leaving lock file in place"
                );
                Err(IndexError::io(&self.target, e))
            }
        }
    }

    /// Discard the lock file and whatever was written to it.
    pub(crate) fn unlock(self) {
        drop(self);
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        drop(self.file.take());
        match fs::remove_file(&self.lock_path) {
            Ok(()) => debug!(path = %self.lock_path.display(), "lock released"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.lock_path.display(),
                error = %e,
                "failed to remove lock file"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn second_acquire_contends() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        let lock = LockFile::acquire(&target).unwrap();
        assert_eq!(lock.path(), dir.path().join("index.lock"));

        let err = LockFile::acquire(&target).unwrap_err();
        assert!(err.is_lock_contention());
        drop(lock);
        assert!(!dir.path().join("index.lock").exists());
        LockFile::acquire(&target).unwrap();
    }

    #[test]
    fn commit_renames_over_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        fs::write(&target, b"old").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.file_mut().unwrap().write_all(b"new").unwrap();
        lock.commit().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn unlock_discards_staged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        fs::write(&target, b"old").unwrap();

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.file_mut().unwrap().write_all(b"new").unwrap();
        lock.unlock();
        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert!(!lock_path_for(&target).exists());
    }

    #[test]
    fn failed_rename_keeps_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("index");
        // A non-empty directory cannot be replaced by a file.
        fs::create_dir(&target).unwrap();
        fs::write(target.join("occupied"), b"x").unwrap();

        let lock = LockFile::acquire(&target).unwrap();
        let err = lock.commit().unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
        assert!(lock_path_for(&target).exists());
    }

    #[test]
    fn missing_parent_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("no/such/dir/index");
        assert!(matches!(
            LockFile::acquire(&target),
            Err(IndexError::Io { .. })
        ));
    }
}

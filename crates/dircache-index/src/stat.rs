//! Working-tree stat snapshots.
//!
//! The index never walks the working tree. Callers hand it [`FileStat`]
//! values, usually through a [`StatSource`], and the index compares them
//! with what each entry recorded.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use bstr::{BStr, ByteSlice};
use dircache_store::EntryMode;

use crate::entry::StatTime;

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Stat metadata of one working-tree path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileStat {
    pub ctime: StatTime,
    pub mtime: StatTime,
    pub dev: u32,
    pub ino: u32,
    /// Raw `st_mode` (type and permission bits).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileStat {
    /// Snapshot the fields the index records, truncated the way the
    /// on-disk format truncates them.
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            ctime: StatTime::new(meta.ctime() as u32, meta.ctime_nsec() as u32),
            mtime: StatTime::new(meta.mtime() as u32, meta.mtime_nsec() as u32),
            dev: meta.dev() as u32,
            ino: meta.ino() as u32,
            mode: meta.mode(),
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.size(),
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        let mode = if file_type.is_symlink() {
            S_IFLNK
        } else if file_type.is_dir() {
            S_IFDIR | 0o755
        } else {
            S_IFREG | 0o644
        };
        let mtime = meta.modified().map(StatTime::from).unwrap_or_default();
        Self {
            ctime: mtime,
            mtime,
            mode,
            size: meta.len(),
            ..Self::default()
        }
    }

    /// The entry mode a file with this stat would be staged as.
    pub fn entry_mode(&self) -> Option<EntryMode> {
        match self.mode & S_IFMT {
            S_IFREG if self.mode & 0o111 != 0 => Some(EntryMode::Executable),
            S_IFREG => Some(EntryMode::Regular),
            S_IFLNK => Some(EntryMode::Symlink),
            S_IFDIR => Some(EntryMode::Directory),
            _ => None,
        }
    }
}

/// Supplies stat metadata for working-tree paths.
pub trait StatSource {
    /// Stat `path` without following a trailing symlink.
    ///
    /// Returns `Ok(None)` when nothing exists at `path`.
    fn stat(&self, path: &BStr) -> io::Result<Option<FileStat>>;
}

/// [`StatSource`] over a working-tree directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct WorkdirStat {
    root: PathBuf,
}

impl WorkdirStat {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl StatSource for WorkdirStat {
    fn stat(&self, path: &BStr) -> io::Result<Option<FileStat>> {
        let relative = path
            .to_path()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        match fs::symlink_metadata(self.root.join(relative)) {
            Ok(meta) => Ok(Some(FileStat::from_metadata(&meta))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Identity of the index file as last read or written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileSnapshot {
    pub mtime: StatTime,
    pub size: u64,
}

impl FileSnapshot {
    /// Snapshot `path`, or `None` if it does not exist.
    pub fn of(path: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                mtime: FileStat::from_metadata(&meta).mtime,
                size: meta.len(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_mode_from_raw_mode() {
        let mut stat = FileStat {
            mode: 0o100644,
            ..FileStat::default()
        };
        assert_eq!(stat.entry_mode(), Some(EntryMode::Regular));
        stat.mode = 0o100755;
        assert_eq!(stat.entry_mode(), Some(EntryMode::Executable));
        stat.mode = 0o120777;
        assert_eq!(stat.entry_mode(), Some(EntryMode::Symlink));
        stat.mode = 0o040755;
        assert_eq!(stat.entry_mode(), Some(EntryMode::Directory));
        stat.mode = 0o010644; // fifo
        assert_eq!(stat.entry_mode(), None);
    }

    #[test]
    fn workdir_stat_reads_files_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/file.txt"), b"hello").unwrap();

        let source = WorkdirStat::new(dir.path());
        let stat = source.stat(b"sub/file.txt".as_bstr()).unwrap().unwrap();
        assert_eq!(stat.size, 5);
        assert_eq!(stat.entry_mode(), Some(EntryMode::Regular));
        assert!(!stat.mtime.is_zero());

        assert!(source.stat(b"sub/missing".as_bstr()).unwrap().is_none());
    }

    #[test]
    fn snapshot_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSnapshot::of(&dir.path().join("index")).unwrap().is_none());
        fs::write(dir.path().join("index"), b"1234").unwrap();
        let snap = FileSnapshot::of(&dir.path().join("index")).unwrap().unwrap();
        assert_eq!(snap.size, 4);
    }
}

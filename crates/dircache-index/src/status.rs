//! Working directory status types.
//!
//! Status compares each entry's recorded stat data with what a
//! [`StatSource`] reports now. It never reads file contents, so every
//! result is "possibly changed": callers confirm by hashing.

use bstr::{BString, ByteSlice};
use dircache_store::EntryMode;
use serde::{Deserialize, Serialize};

use crate::entry::StatTime;
use crate::error::{IndexError, IndexResult};
use crate::stat::StatSource;
use crate::table::EntryTable;

/// Complete status of the working directory relative to the index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkdirStatus {
    /// Files whose stat data no longer matches.
    pub modified: Vec<StatusEntry>,
    /// Files that were tracked but have been deleted.
    pub deleted: Vec<BString>,
    /// Stat-clean files modified too close to the last index write to be
    /// trusted; their contents must be compared.
    pub racy: Vec<BString>,
    /// Paths with unresolved conflict stages.
    pub conflicts: Vec<BString>,
}

impl WorkdirStatus {
    /// Create an empty status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing needs attention, racy entries included.
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty()
            && self.deleted.is_empty()
            && self.racy.is_empty()
            && self.conflicts.is_empty()
    }

    /// Returns `true` if there are any conflicts.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Total number of entries across all categories.
    pub fn total_entries(&self) -> usize {
        self.modified.len() + self.deleted.len() + self.racy.len() + self.conflicts.len()
    }
}

/// A single status entry representing a file change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// The file path relative to the workdir root.
    pub path: BString,
    /// The kind of change.
    pub status: FileStatus,
}

impl StatusEntry {
    /// Create a new status entry.
    pub fn new(path: impl Into<BString>, status: FileStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }
}

/// The kind of file change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    /// Same kind of file, different stat data (content, mode bits or
    /// inode may have changed).
    Modified,
    /// The path now holds a different kind of object, such as a symlink
    /// where a regular file was staged.
    TypeChanged,
}

#[derive(PartialEq, Eq)]
enum Kind {
    File,
    Symlink,
    Directory,
}

fn kind(mode: EntryMode) -> Kind {
    match mode {
        EntryMode::Regular | EntryMode::Executable => Kind::File,
        EntryMode::Symlink => Kind::Symlink,
        EntryMode::Gitlink | EntryMode::Directory => Kind::Directory,
    }
}

/// Compare `table` against `source`. Entries modified at or after `cutoff`
/// that still look clean are reported as racy.
pub(crate) fn compute(
    table: &EntryTable,
    cutoff: StatTime,
    source: &dyn StatSource,
) -> IndexResult<WorkdirStatus> {
    let mut status = WorkdirStatus::new();
    for entry in table {
        if entry.stage.is_conflict() {
            if status.conflicts.last() != Some(&entry.path) {
                status.conflicts.push(entry.path.clone());
            }
            continue;
        }
        let flags = entry.flags;
        if flags.assume_valid || flags.skip_worktree || flags.intent_to_add {
            continue;
        }

        let stat = source
            .stat(entry.path.as_bstr())
            .map_err(|e| IndexError::io(entry.path.to_path_lossy(), e))?;
        let Some(stat) = stat else {
            status.deleted.push(entry.path.clone());
            continue;
        };

        match stat.entry_mode() {
            Some(actual) if kind(actual) == kind(entry.mode) => {}
            _ => {
                status
                    .modified
                    .push(StatusEntry::new(entry.path.clone(), FileStatus::TypeChanged));
                continue;
            }
        }
        if entry.mode == EntryMode::Gitlink {
            continue;
        }
        if !entry.stat_matches(&stat) {
            status
                .modified
                .push(StatusEntry::new(entry.path.clone(), FileStatus::Modified));
        } else if entry.is_racily_clean(cutoff) {
            status.racy.push(entry.path.clone());
        }
    }
    Ok(status)
}

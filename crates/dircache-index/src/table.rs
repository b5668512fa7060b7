//! The sorted entry table.
//!
//! Entries are kept strictly increasing by (path bytes, stage). Because
//! `/` is compared as an ordinary byte, every directory's contents form one
//! contiguous run, which is what lets the cache tree slice the table by
//! counts alone.

use std::cmp::Ordering;
use std::ops::Range;

use bstr::{BStr, BString, ByteSlice};

use crate::entry::{IndexEntry, Stage};
use crate::error::{IndexError, IndexResult};

/// Ordered, unique collection of index entries.
///
/// The table can only be replaced wholesale by a
/// [`Builder`](crate::Builder) or an [`Editor`](crate::Editor); every
/// public method here is a read accessor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryTable {
    entries: Vec<IndexEntry>,
}

impl EntryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap entries already known to satisfy the ordering invariants.
    pub(crate) fn from_sorted(entries: Vec<IndexEntry>) -> Self {
        debug_assert!(entries
            .windows(2)
            .all(|w| w[0].cmp_key(&w[1]) == Ordering::Less));
        Self { entries }
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut [IndexEntry] {
        &mut self.entries
    }

    /// Number of entries, counting every stage.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in (path, stage) order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }

    /// Entry at a table position.
    pub fn get(&self, position: usize) -> Option<&IndexEntry> {
        self.entries.get(position)
    }

    /// Binary search for `path`.
    ///
    /// `Ok` carries the position of the lowest stage recorded for the path;
    /// `Err` carries the position where the path would be inserted.
    pub fn find_position(&self, path: impl AsRef<[u8]>) -> Result<usize, usize> {
        find_in(&self.entries, path.as_ref())
    }

    /// Lowest-stage entry for `path`.
    pub fn find(&self, path: impl AsRef<[u8]>) -> Option<&IndexEntry> {
        self.find_position(path).ok().map(|i| &self.entries[i])
    }

    /// The merged (stage 0) entry for `path`, if the path is not conflicted.
    pub fn first_stage0(&self, path: impl AsRef<[u8]>) -> Option<&IndexEntry> {
        self.find(path).filter(|e| e.stage == Stage::Merged)
    }

    /// Every stage recorded for `path`, in stage order.
    pub fn stages(&self, path: impl AsRef<[u8]>) -> &[IndexEntry] {
        &self.entries[stage_range(&self.entries, path.as_ref())]
    }

    /// The contiguous run of entries below directory `prefix`.
    ///
    /// A trailing `/` on `prefix` is optional; the empty prefix selects the
    /// whole table. The directory entry itself is never part of the run.
    pub fn entries_under(&self, prefix: impl AsRef<[u8]>) -> &[IndexEntry] {
        &self.entries[under_range(&self.entries, prefix.as_ref())]
    }

    /// Returns `true` if any path has conflict stages.
    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.stage.is_conflict())
    }

    /// Distinct conflicted paths in table order.
    pub fn conflict_paths(&self) -> Vec<&BStr> {
        let mut paths: Vec<&BStr> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.stage.is_conflict()) {
            if paths.last() != Some(&entry.path.as_bstr()) {
                paths.push(entry.path.as_bstr());
            }
        }
        paths
    }

    /// Give every entry modified at or after `cutoff` a zero size so no
    /// later stat comparison can call it clean. Returns how many changed.
    pub(crate) fn smudge_racily_clean(&mut self, cutoff: crate::entry::StatTime) -> usize {
        let mut smudged = 0;
        for entry in self.entries.iter_mut() {
            if entry.size != 0 && entry.is_racily_clean(cutoff) {
                entry.size = 0;
                smudged += 1;
            }
        }
        smudged
    }
}

impl<'a> IntoIterator for &'a EntryTable {
    type Item = &'a IndexEntry;
    type IntoIter = std::slice::Iter<'a, IndexEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

pub(crate) fn find_in(entries: &[IndexEntry], path: &[u8]) -> Result<usize, usize> {
    let pos = entries.partition_point(|e| e.path.as_slice() < path);
    match entries.get(pos) {
        Some(e) if e.path == path => Ok(pos),
        _ => Err(pos),
    }
}

fn stage_range(entries: &[IndexEntry], path: &[u8]) -> Range<usize> {
    let start = entries.partition_point(|e| e.path.as_slice() < path);
    let len = entries[start..].partition_point(|e| e.path == path);
    start..start + len
}

pub(crate) fn under_range(entries: &[IndexEntry], prefix: &[u8]) -> Range<usize> {
    let prefix = prefix.strip_suffix(b"/").unwrap_or(prefix);
    if prefix.is_empty() {
        return 0..entries.len();
    }
    let mut dir = BString::from(prefix);
    dir.push(b'/');
    let start = entries.partition_point(|e| e.path.as_slice() < dir.as_slice());
    let len = entries[start..].partition_point(|e| e.path.starts_with(&dir));
    start..start + len
}

/// Sort candidates into table order. The sort is stable, so entries with
/// equal keys keep their insertion order.
pub(crate) fn sort_entries(entries: &mut [IndexEntry]) {
    entries.sort_by(|a, b| a.cmp_key(b));
}

/// Check that a path never carries stage 0 alongside stages 1-3.
pub(crate) fn check_stages(entries: &[IndexEntry], path: &[u8]) -> IndexResult<()> {
    let stages = &entries[stage_range(entries, path)];
    if stages.len() > 1 && stages[0].stage == Stage::Merged {
        return Err(IndexError::MixedStages(BString::from(path)));
    }
    Ok(())
}

/// Check that `path` is neither a directory of other entries nor below
/// another entry that is a file.
pub(crate) fn check_directory_file(entries: &[IndexEntry], path: &[u8]) -> IndexResult<()> {
    if !under_range(entries, path).is_empty() {
        return Err(IndexError::DirectoryFileConflict(BString::from(path)));
    }
    for (i, _) in path.iter().enumerate().filter(|&(_, &b)| b == b'/') {
        let parent = &path[..i];
        if find_in(entries, parent).is_ok() {
            return Err(IndexError::DirectoryFileConflict(BString::from(parent)));
        }
    }
    Ok(())
}

/// Full-table validation of Invariant C and directory/file collisions.
pub(crate) fn validate_all(entries: &[IndexEntry]) -> IndexResult<()> {
    let mut i = 0;
    while i < entries.len() {
        let path = entries[i].path.as_slice();
        let run = entries[i..].partition_point(|e| e.path == path);
        if run > 1 && entries[i].stage == Stage::Merged {
            return Err(IndexError::MixedStages(BString::from(path)));
        }
        if !under_range(entries, path).is_empty() {
            return Err(IndexError::DirectoryFileConflict(BString::from(path)));
        }
        i += run;
    }
    Ok(())
}

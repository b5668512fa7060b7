//! Index entry types: one tracked path at one conflict stage.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use bstr::{BStr, BString, ByteSlice};
use dircache_store::EntryMode;
use dircache_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::stat::FileStat;

/// Conflict slot of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Resolved content.
    Merged = 0,
    /// Common ancestor of a three-way merge.
    Base = 1,
    /// Our side of a three-way merge.
    Ours = 2,
    /// Their side of a three-way merge.
    Theirs = 3,
}

impl Stage {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Merged),
            1 => Some(Self::Base),
            2 => Some(Self::Ours),
            3 => Some(Self::Theirs),
            _ => None,
        }
    }

    /// Stages 1-3 mark an unresolved merge.
    pub fn is_conflict(&self) -> bool {
        !matches!(self, Self::Merged)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A timestamp as the index stores it: 32-bit seconds and nanoseconds.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct StatTime {
    pub secs: u32,
    pub nanos: u32,
}

impl StatTime {
    pub fn new(secs: u32, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.nanos == 0
    }
}

impl From<SystemTime> for StatTime {
    fn from(time: SystemTime) -> Self {
        let since = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            secs: since.as_secs() as u32,
            nanos: since.subsec_nanos(),
        }
    }
}

/// Per-entry flags that change how callers treat the working tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryFlags {
    /// Trust the entry without comparing stat data.
    pub assume_valid: bool,
    /// The path is outside the sparse checkout; never look at the file.
    pub skip_worktree: bool,
    /// Recorded with `add -N`: tracked but not yet part of any tree.
    pub intent_to_add: bool,
}

impl EntryFlags {
    /// Whether the entry needs the version 3 extended flags word.
    pub fn needs_extended(&self) -> bool {
        self.skip_worktree || self.intent_to_add
    }
}

/// An entry in the staging index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Slash-separated path relative to the working tree root, raw bytes.
    pub path: BString,
    /// Conflict slot.
    pub stage: Stage,
    /// File mode (regular, executable, symlink, gitlink, directory).
    pub mode: EntryMode,
    /// Content-addressed ID of the blob (or commit, for gitlinks).
    pub object_id: ObjectId,
    pub ctime: StatTime,
    pub mtime: StatTime,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    /// File size truncated to 32 bits, as on disk.
    pub size: u32,
    pub flags: EntryFlags,
}

impl IndexEntry {
    /// Create a merged entry with an empty stat snapshot.
    pub fn new(path: impl Into<BString>, object_id: ObjectId, mode: EntryMode) -> Self {
        Self {
            path: path.into(),
            stage: Stage::Merged,
            mode,
            object_id,
            ctime: StatTime::default(),
            mtime: StatTime::default(),
            dev: 0,
            ino: 0,
            uid: 0,
            gid: 0,
            size: 0,
            flags: EntryFlags::default(),
        }
    }

    /// Create a conflict-stage entry.
    pub fn new_staged(
        path: impl Into<BString>,
        stage: Stage,
        object_id: ObjectId,
        mode: EntryMode,
    ) -> Self {
        Self {
            stage,
            ..Self::new(path, object_id, mode)
        }
    }

    pub fn path(&self) -> &BStr {
        self.path.as_bstr()
    }

    /// Total order of the table: path bytes, then stage.
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        compare_key(&self.path, self.stage, &other.path, other.stage)
    }

    /// Whether two entries would produce the same tree entry.
    pub fn same_content(&self, other: &Self) -> bool {
        self.path == other.path
            && self.stage == other.stage
            && self.mode == other.mode
            && self.object_id == other.object_id
            && self.flags.intent_to_add == other.flags.intent_to_add
    }

    /// Copy a working-tree stat snapshot into the entry.
    pub fn update_stat(&mut self, stat: &FileStat) {
        self.ctime = stat.ctime;
        self.mtime = stat.mtime;
        self.dev = stat.dev;
        self.ino = stat.ino;
        self.uid = stat.uid;
        self.gid = stat.gid;
        self.size = stat.size as u32;
    }

    /// Whether `stat` still describes the file this entry recorded.
    ///
    /// A `true` result means "probably unchanged"; racily clean entries
    /// still need a content comparison.
    pub fn stat_matches(&self, stat: &FileStat) -> bool {
        self.mode_matches(stat)
            && self.mtime == stat.mtime
            && self.ctime == stat.ctime
            && self.size == stat.size as u32
            && self.ino == stat.ino
            && self.dev == stat.dev
            && self.uid == stat.uid
            && self.gid == stat.gid
    }

    /// Whether the file type on disk is still the one recorded.
    pub fn mode_matches(&self, stat: &FileStat) -> bool {
        match (self.mode, stat.entry_mode()) {
            (EntryMode::Gitlink, Some(EntryMode::Directory)) => true,
            (recorded, Some(actual)) => recorded == actual,
            (_, None) => false,
        }
    }

    /// Modified at or after `cutoff`: identical stat data cannot prove the
    /// content unchanged.
    pub fn is_racily_clean(&self, cutoff: StatTime) -> bool {
        !cutoff.is_zero() && self.mtime >= cutoff
    }
}

pub(crate) fn compare_key(a: &[u8], a_stage: Stage, b: &[u8], b_stage: Stage) -> Ordering {
    a.cmp(b).then(a_stage.cmp(&b_stage))
}

/// Reject paths that cannot be stored or materialized.
pub fn validate_path(path: &[u8]) -> IndexResult<()> {
    let fail = |reason| {
        Err(IndexError::InvalidPath {
            path: BString::from(path),
            reason,
        })
    };
    if path.is_empty() {
        return fail("empty path");
    }
    if path.contains(&0) {
        return fail("contains NUL");
    }
    if path.starts_with(b"/") || path.ends_with(b"/") {
        return fail("leading or trailing slash");
    }
    for component in path.split_str("/") {
        match component {
            b"" => return fail("empty component"),
            b"." | b".." => return fail("relative component"),
            c if c.eq_ignore_ascii_case(b".git") => return fail("reserved component"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> ObjectId {
        ObjectId::from_bytes(s.as_bytes())
    }

    fn regular_stat() -> FileStat {
        FileStat {
            ctime: StatTime::new(100, 1),
            mtime: StatTime::new(200, 2),
            dev: 7,
            ino: 42,
            mode: 0o100644,
            uid: 1000,
            gid: 1000,
            size: 11,
        }
    }

    #[test]
    fn new_entry_is_merged_with_default_flags() {
        let entry = IndexEntry::new("test.txt", oid("test"), EntryMode::Regular);
        assert_eq!(entry.stage, Stage::Merged);
        assert_eq!(entry.flags, EntryFlags::default());
        assert_eq!(entry.size, 0);
    }

    #[test]
    fn ordering_is_bytewise_then_stage() {
        let a = IndexEntry::new("a", oid("a"), EntryMode::Regular);
        let a_dash = IndexEntry::new("a-b", oid("x"), EntryMode::Regular);
        let a_dir = IndexEntry::new("a/b", oid("x"), EntryMode::Regular);
        assert_eq!(a.cmp_key(&a_dash), Ordering::Less);
        assert_eq!(a_dash.cmp_key(&a_dir), Ordering::Less);

        let ours = IndexEntry::new_staged("c", Stage::Ours, oid("o"), EntryMode::Regular);
        let base = IndexEntry::new_staged("c", Stage::Base, oid("b"), EntryMode::Regular);
        assert_eq!(base.cmp_key(&ours), Ordering::Less);
    }

    #[test]
    fn ordering_ignores_locale_case_folding() {
        let upper = IndexEntry::new("B", oid("b"), EntryMode::Regular);
        let lower = IndexEntry::new("a", oid("a"), EntryMode::Regular);
        assert_eq!(upper.cmp_key(&lower), Ordering::Less);
    }

    #[test]
    fn stat_roundtrip_matches() {
        let mut entry = IndexEntry::new("f", oid("f"), EntryMode::Regular);
        let stat = regular_stat();
        assert!(!entry.stat_matches(&stat));
        entry.update_stat(&stat);
        assert!(entry.stat_matches(&stat));

        let mut touched = stat;
        touched.mtime = StatTime::new(201, 0);
        assert!(!entry.stat_matches(&touched));
    }

    #[test]
    fn executable_bit_flip_is_a_mode_change() {
        let mut entry = IndexEntry::new("f", oid("f"), EntryMode::Regular);
        let mut stat = regular_stat();
        entry.update_stat(&stat);
        stat.mode = 0o100755;
        assert!(!entry.mode_matches(&stat));
        assert!(!entry.stat_matches(&stat));
    }

    #[test]
    fn gitlink_matches_directory() {
        let entry = IndexEntry::new("sub", oid("c"), EntryMode::Gitlink);
        let mut stat = regular_stat();
        stat.mode = 0o040755;
        assert!(entry.mode_matches(&stat));
    }

    #[test]
    fn racily_clean_cutoff() {
        let mut entry = IndexEntry::new("f", oid("f"), EntryMode::Regular);
        entry.mtime = StatTime::new(500, 10);
        assert!(entry.is_racily_clean(StatTime::new(500, 10)));
        assert!(entry.is_racily_clean(StatTime::new(499, 0)));
        assert!(!entry.is_racily_clean(StatTime::new(500, 11)));
        assert!(!entry.is_racily_clean(StatTime::default()));
    }

    #[test]
    fn path_validation() {
        assert!(validate_path(b"src/main.rs").is_ok());
        assert!(validate_path(b"a").is_ok());
        for bad in [
            &b""[..],
            b"/abs",
            b"dir/",
            b"a//b",
            b"./a",
            b"a/../b",
            b".git/config",
            b"sub/.GIT",
            b"nul\0byte",
        ] {
            assert!(
                matches!(validate_path(bad), Err(IndexError::InvalidPath { .. })),
                "{:?} should be rejected",
                bad.as_bstr()
            );
        }
    }

    #[test]
    fn stage_conversions() {
        for stage in [Stage::Merged, Stage::Base, Stage::Ours, Stage::Theirs] {
            assert_eq!(Stage::from_u8(stage.as_u8()), Some(stage));
        }
        assert_eq!(Stage::from_u8(4), None);
        assert!(!Stage::Merged.is_conflict());
        assert!(Stage::Theirs.is_conflict());
    }
}

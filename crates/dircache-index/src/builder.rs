//! Whole-table replacement.

use std::ops::Range;

use bstr::ByteSlice;
use dircache_types::ObjectId;
use tracing::debug;

use crate::cache_tree::collect_tree;
use crate::config::DuplicatePolicy;
use crate::entry::{validate_path, IndexEntry, Stage};
use crate::error::{IndexError, IndexResult};
use crate::index::Index;
use crate::table::{sort_entries, under_range, validate_all};

/// Collects entries in any order and replaces the index table on
/// [`finish`](Builder::finish).
///
/// Nothing reaches the index until `finish` succeeds; dropping a builder
/// discards its work.
#[must_use = "a builder does nothing until finish() is called"]
pub struct Builder<'a> {
    index: &'a mut Index,
    entries: Vec<IndexEntry>,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(index: &'a mut Index) -> Self {
        Self {
            index,
            entries: Vec::new(),
        }
    }

    /// Add an entry. Order does not matter.
    pub fn add(&mut self, entry: IndexEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Carry over every entry of the current table.
    pub fn keep_all(&mut self) -> &mut Self {
        self.entries
            .extend_from_slice(self.index.table().entries());
        self
    }

    /// Carry over the current table's entries at `positions`. Positions past
    /// the end of the table are ignored.
    pub fn keep(&mut self, positions: Range<usize>) -> &mut Self {
        let existing = self.index.table().entries();
        let end = positions.end.min(existing.len());
        let start = positions.start.min(end);
        self.entries.extend_from_slice(&existing[start..end]);
        self
    }

    /// Carry over the current entries below directory `prefix`.
    pub fn keep_under(&mut self, prefix: impl AsRef<[u8]>) -> &mut Self {
        let existing = self.index.table().entries();
        let range = under_range(existing, prefix.as_ref());
        self.entries.extend_from_slice(&existing[range]);
        self
    }

    /// Add every file of tree `tree_id`, recursively, below `prefix` at
    /// `stage`. An empty prefix loads the tree at the top level.
    pub fn add_tree(
        &mut self,
        prefix: impl AsRef<[u8]>,
        stage: Stage,
        tree_id: ObjectId,
    ) -> IndexResult<&mut Self> {
        let prefix = prefix.as_ref();
        let prefix = prefix.strip_suffix(b"/").unwrap_or(prefix);
        let before = self.entries.len();
        collect_tree(
            self.index.store().as_ref(),
            tree_id,
            prefix,
            stage,
            &mut self.entries,
        )?;
        debug!(
            tree = %tree_id.short_hex(),
            prefix = %prefix.as_bstr(),
            added = self.entries.len() - before,
            "loaded tree into builder"
        );
        Ok(self)
    }

    /// Number of entries collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort, validate and install the collected entries.
    ///
    /// On error the index is unchanged.
    pub fn finish(self) -> IndexResult<()> {
        let policy = self.index.config().duplicate_policy;
        let entries = normalize(self.entries, policy)?;
        self.index.replace_table(entries);
        Ok(())
    }
}

/// Bring an arbitrary batch into table order and enforce the table's
/// invariants.
pub(crate) fn normalize(
    mut entries: Vec<IndexEntry>,
    policy: DuplicatePolicy,
) -> IndexResult<Vec<IndexEntry>> {
    for entry in &entries {
        validate_path(&entry.path)?;
    }
    sort_entries(&mut entries);

    let mut unique: Vec<IndexEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match unique.last_mut() {
            Some(last) if last.path == entry.path && last.stage == entry.stage => match policy {
                DuplicatePolicy::Reject => {
                    return Err(IndexError::DuplicateEntry {
                        path: entry.path,
                        stage: entry.stage,
                    })
                }
                DuplicatePolicy::LastWins => *last = entry,
            },
            _ => unique.push(entry),
        }
    }

    validate_all(&unique)?;
    Ok(unique)
}

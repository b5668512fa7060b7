//! Incremental edits merged into the existing table in one pass.

use std::cmp::Ordering;

use bstr::BString;
use tracing::debug;

use crate::entry::{validate_path, IndexEntry};
use crate::error::IndexResult;
use crate::index::Index;
use crate::table::{check_directory_file, check_stages};

/// A single queued change.
#[derive(Clone, Debug)]
enum Edit {
    /// Add or replace one (path, stage).
    Add(IndexEntry),
    /// Drop every stage of one path.
    Remove(BString),
    /// Drop every entry below a directory. Stored with a trailing `/`.
    RemoveTree(BString),
}

impl Edit {
    fn key(&self) -> (&[u8], u8) {
        match self {
            Self::Add(entry) => (entry.path.as_slice(), 1 + entry.stage.as_u8()),
            Self::Remove(path) | Self::RemoveTree(path) => (path.as_slice(), 0),
        }
    }
}

/// Queues adds and removals, then merges them into the table on
/// [`finish`](Editor::finish).
///
/// Edits may be queued in any order. For the same path, removals apply
/// before additions, so `remove(p)` followed by `add(p)` at stage 0
/// resolves a conflict in one batch.
#[must_use = "an editor does nothing until finish() is called"]
pub struct Editor<'a> {
    index: &'a mut Index,
    edits: Vec<Edit>,
}

impl<'a> Editor<'a> {
    pub(crate) fn new(index: &'a mut Index) -> Self {
        Self {
            index,
            edits: Vec::new(),
        }
    }

    /// Add `entry`, replacing any existing entry at the same (path, stage).
    pub fn add(&mut self, entry: IndexEntry) -> &mut Self {
        self.edits.push(Edit::Add(entry));
        self
    }

    /// Remove every stage of `path`.
    pub fn remove(&mut self, path: impl Into<BString>) -> &mut Self {
        self.edits.push(Edit::Remove(path.into()));
        self
    }

    /// Remove every entry strictly below directory `dir`.
    pub fn remove_tree(&mut self, dir: impl Into<BString>) -> &mut Self {
        let mut dir = dir.into();
        if !dir.ends_with(b"/") {
            dir.push(b'/');
        }
        self.edits.push(Edit::RemoveTree(dir));
        self
    }

    /// Number of queued edits.
    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Merge the queued edits into the table.
    ///
    /// On error the index is unchanged.
    pub fn finish(mut self) -> IndexResult<()> {
        for edit in &self.edits {
            if let Edit::Add(entry) = edit {
                validate_path(&entry.path)?;
            }
        }
        self.edits.sort_by(|a, b| a.key().cmp(&b.key()));

        let old = self.index.table().entries();
        let mut merged: Vec<IndexEntry> = Vec::with_capacity(old.len() + self.edits.len());
        let mut touched: Vec<BString> = Vec::new();
        let mut added: Vec<BString> = Vec::new();
        let mut i = 0;

        for edit in self.edits {
            match edit {
                Edit::Remove(path) => {
                    while i < old.len() && old[i].path < path {
                        merged.push(old[i].clone());
                        i += 1;
                    }
                    while i < old.len() && old[i].path == path {
                        touched.push(old[i].path.clone());
                        i += 1;
                    }
                }
                Edit::RemoveTree(dir) => {
                    while i < old.len() && old[i].path < dir {
                        merged.push(old[i].clone());
                        i += 1;
                    }
                    while i < old.len() && old[i].path.starts_with(&dir) {
                        touched.push(old[i].path.clone());
                        i += 1;
                    }
                }
                Edit::Add(entry) => {
                    while i < old.len() && old[i].cmp_key(&entry) == Ordering::Less {
                        merged.push(old[i].clone());
                        i += 1;
                    }
                    let mut unchanged = false;
                    if i < old.len() && old[i].cmp_key(&entry) == Ordering::Equal {
                        unchanged = old[i].same_content(&entry);
                        i += 1;
                    }
                    if !unchanged {
                        touched.push(entry.path.clone());
                    }
                    added.push(entry.path.clone());
                    match merged.last_mut() {
                        Some(last) if last.cmp_key(&entry) == Ordering::Equal => *last = entry,
                        _ => merged.push(entry),
                    }
                }
            }
        }
        merged.extend_from_slice(&old[i..]);

        added.dedup();
        for path in &added {
            check_stages(&merged, path)?;
            check_directory_file(&merged, path)?;
        }

        debug!(
            entries = merged.len(),
            touched = touched.len(),
            "editor merged"
        );
        self.index.install_edited(merged, &touched);
        Ok(())
    }
}

//! Read-only access to an index.

use std::ops::Deref;

use dircache_types::ObjectId;

use crate::cache_tree::CacheTree;
use crate::config::IndexVersion;
use crate::error::IndexResult;
use crate::index::Index;
use crate::stat::StatSource;
use crate::status::{compute, WorkdirStatus};
use crate::table::EntryTable;

/// A shared borrow of an [`Index`] that exposes only read accessors.
///
/// The view dereferences to the [`EntryTable`] for lookups and iteration.
/// It has no builder, editor, read, lock or tree-writing entry point, and
/// while it lives the index cannot be mutated:
///
/// ```
/// # use std::sync::Arc;
/// # use dircache_index::Index;
/// # use dircache_store::InMemoryObjectStore;
/// let index = Index::new("index", Arc::new(InMemoryObjectStore::new()));
/// let view = index.view();
/// assert!(view.is_empty());
/// assert!(view.find("missing").is_none());
/// ```
///
/// Mutation is not reachable through the view:
///
/// ```compile_fail
/// # use std::sync::Arc;
/// # use dircache_index::Index;
/// # use dircache_store::InMemoryObjectStore;
/// let mut index = Index::new("index", Arc::new(InMemoryObjectStore::new()));
/// let view = index.view();
/// view.editor();
/// ```
///
/// ```compile_fail
/// # use std::sync::Arc;
/// # use dircache_index::Index;
/// # use dircache_store::InMemoryObjectStore;
/// let mut index = Index::new("index", Arc::new(InMemoryObjectStore::new()));
/// let view = index.view();
/// view.lock();
/// ```
///
/// And the view keeps the index borrowed:
///
/// ```compile_fail
/// # use std::sync::Arc;
/// # use dircache_index::Index;
/// # use dircache_store::InMemoryObjectStore;
/// let mut index = Index::new("index", Arc::new(InMemoryObjectStore::new()));
/// let view = index.view();
/// index.read().unwrap();
/// assert!(view.is_empty());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct IndexView<'a> {
    index: &'a Index,
}

impl<'a> IndexView<'a> {
    pub(crate) fn new(index: &'a Index) -> Self {
        Self { index }
    }

    pub fn cache_tree(&self) -> &'a CacheTree {
        self.index.cache_tree()
    }

    /// The root tree id if the cache tree is fully valid.
    pub fn cached_tree_id(&self) -> Option<ObjectId> {
        self.index.cache_tree().tree_id()
    }

    pub fn version(&self) -> IndexVersion {
        self.index.version()
    }

    /// Compare the entries with `source`.
    ///
    /// Entries modified at or after the index file's own mtime are reported
    /// as racy rather than clean. An index that was never read from or
    /// committed to disk has no such cutoff.
    pub fn status(&self, source: &dyn StatSource) -> IndexResult<WorkdirStatus> {
        let cutoff = self
            .index
            .snapshot()
            .map(|s| s.mtime)
            .unwrap_or_default();
        compute(self.index.table(), cutoff, source)
    }
}

impl<'a> Deref for IndexView<'a> {
    type Target = EntryTable;

    fn deref(&self) -> &EntryTable {
        self.index.table()
    }
}

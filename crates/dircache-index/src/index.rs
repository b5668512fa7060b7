//! The index: an entry table and cache tree bound to a file on disk.
//!
//! Reading is free. Writing goes through a typestate chain:
//! [`Index::lock`] creates `<path>.lock` and yields an [`IndexLock`],
//! [`IndexLock::write`] serializes into the lock file and yields a
//! [`WrittenIndex`], and [`WrittenIndex::commit`] renames the lock file over
//! the index. Dropping either guard, or calling `unlock`, discards the lock
//! file and leaves the index on disk untouched.

use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bstr::BString;
use dircache_store::ObjectStore;
use dircache_types::ObjectId;
use tracing::{debug, info, warn};

use crate::builder::{normalize, Builder};
use crate::cache_tree::{collect_tree, CacheTree};
use crate::config::{DuplicatePolicy, IndexConfig, IndexVersion, SyncMode};
use crate::editor::Editor;
use crate::entry::{IndexEntry, Stage, StatTime};
use crate::error::{IndexError, IndexResult};
use crate::format;
use crate::lock::LockFile;
use crate::stat::{FileSnapshot, StatSource};
use crate::status::WorkdirStatus;
use crate::table::EntryTable;
use crate::view::IndexView;

/// The staging index.
///
/// Owns the entry table and cache tree exclusively. They change only
/// through [`Builder`], [`Editor`], [`read`](Index::read) and
/// [`read_tree`](Index::read_tree); materializing trees updates the cache
/// tree alone.
pub struct Index {
    path: PathBuf,
    version: IndexVersion,
    table: EntryTable,
    cache_tree: CacheTree,
    snapshot: Option<FileSnapshot>,
    config: IndexConfig,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("entries", &self.table.len())
            .field("cached_tree", &self.cache_tree.tree_id())
            .finish()
    }
}

impl Index {
    /// Create an empty index for `path` without touching the filesystem.
    pub fn new(path: impl Into<PathBuf>, store: Arc<dyn ObjectStore>) -> Self {
        Self::with_config(path, store, IndexConfig::default())
    }

    pub fn with_config(
        path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        config: IndexConfig,
    ) -> Self {
        Self {
            path: path.into(),
            version: config.version,
            table: EntryTable::new(),
            cache_tree: CacheTree::new(),
            snapshot: None,
            config,
            store,
        }
    }

    /// Create an index for `path` and read it if the file exists.
    pub fn open(
        path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        config: IndexConfig,
    ) -> IndexResult<Self> {
        let mut index = Self::with_config(path, store, config);
        index.read()?;
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Format version the next write starts from.
    pub fn version(&self) -> IndexVersion {
        self.version
    }

    /// Request a format version for the next write. Versions 2 and 3 are
    /// still adjusted to what the entries need.
    pub fn set_version(&mut self, version: IndexVersion) {
        self.version = version;
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Lowest-stage entry for `path`.
    pub fn get(&self, path: impl AsRef<[u8]>) -> Option<&IndexEntry> {
        self.table.find(path)
    }

    pub fn table(&self) -> &EntryTable {
        &self.table
    }

    pub fn cache_tree(&self) -> &CacheTree {
        &self.cache_tree
    }

    /// Size and mtime of the index file when it was last read or committed.
    pub fn snapshot(&self) -> Option<FileSnapshot> {
        self.snapshot
    }

    /// A read-only view borrowing this index.
    pub fn view(&self) -> IndexView<'_> {
        IndexView::new(self)
    }

    /// Replace the in-memory state with the file on disk.
    ///
    /// A missing file reads as an empty index. Uncommitted changes are
    /// discarded.
    pub fn read(&mut self) -> IndexResult<()> {
        let snapshot = FileSnapshot::of(&self.path).map_err(|e| IndexError::io(&self.path, e))?;
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.table = EntryTable::new();
                self.cache_tree.clear();
                self.version = self.config.version;
                self.snapshot = None;
                debug!(path = %self.path.display(), "no index file; starting empty");
                return Ok(());
            }
            Err(e) => return Err(IndexError::io(&self.path, e)),
        };

        let decoded = format::decode(&data)?;
        self.version = decoded.version;
        self.table = EntryTable::from_sorted(decoded.entries);
        self.cache_tree = decoded.cache_tree;
        self.snapshot = snapshot;
        info!(
            path = %self.path.display(),
            entries = self.table.len(),
            version = %self.version,
            "index read"
        );
        Ok(())
    }

    /// Whether the file on disk differs from what was last read or
    /// committed.
    pub fn is_outdated(&self) -> IndexResult<bool> {
        let current = FileSnapshot::of(&self.path).map_err(|e| IndexError::io(&self.path, e))?;
        Ok(current != self.snapshot)
    }

    /// Start a whole-table replacement.
    pub fn builder(&mut self) -> Builder<'_> {
        Builder::new(self)
    }

    /// Start an incremental edit.
    pub fn editor(&mut self) -> Editor<'_> {
        Editor::new(self)
    }

    /// Materialize the table as tree objects and return the root tree id.
    ///
    /// Only directories whose cache-tree node is invalid are written.
    pub fn write_tree(&mut self) -> IndexResult<ObjectId> {
        let conflicts = self.table.conflict_paths();
        if !conflicts.is_empty() {
            return Err(IndexError::UnresolvedConflict(
                conflicts.into_iter().map(BString::from).collect(),
            ));
        }
        let (root, written) = self
            .cache_tree
            .update(self.table.entries(), self.store.as_ref())?;
        debug!(root = %root.short_hex(), written, "tree written");
        Ok(root)
    }

    /// Replace the table with the contents of `tree_id`, with every
    /// subtree id already cached.
    pub fn read_tree(&mut self, tree_id: ObjectId) -> IndexResult<()> {
        let mut entries = Vec::new();
        let root = collect_tree(self.store.as_ref(), tree_id, b"", Stage::Merged, &mut entries)?;
        self.table = EntryTable::from_sorted(normalize(entries, DuplicatePolicy::Reject)?);
        self.cache_tree = CacheTree::from_root(root);
        debug!(tree = %tree_id.short_hex(), entries = self.table.len(), "tree read into index");
        Ok(())
    }

    /// Compare the table with the working tree.
    pub fn status(&self, source: &dyn StatSource) -> IndexResult<WorkdirStatus> {
        self.view().status(source)
    }

    /// Take the index lock.
    ///
    /// Fails with [`IndexError::LockContention`] if another writer holds it.
    pub fn lock(&mut self) -> IndexResult<IndexLock<'_>> {
        let lock = LockFile::acquire(&self.path)?;
        Ok(IndexLock { index: self, lock })
    }

    pub(crate) fn replace_table(&mut self, entries: Vec<IndexEntry>) {
        let changed = self
            .cache_tree
            .invalidate_changes(self.table.entries(), &entries);
        self.table = EntryTable::from_sorted(entries);
        debug!(entries = self.table.len(), changed, "table replaced");
    }

    pub(crate) fn install_edited(&mut self, entries: Vec<IndexEntry>, touched: &[BString]) {
        for path in touched {
            self.cache_tree.invalidate_path(path);
        }
        self.table = EntryTable::from_sorted(entries);
    }
}

/// The index while this process holds its lock.
#[derive(Debug)]
#[must_use = "dropping the lock releases it without writing"]
pub struct IndexLock<'a> {
    index: &'a mut Index,
    lock: LockFile,
}

impl<'a> IndexLock<'a> {
    pub fn index(&self) -> &Index {
        self.index
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn builder(&mut self) -> Builder<'_> {
        self.index.builder()
    }

    pub fn editor(&mut self) -> Editor<'_> {
        self.index.editor()
    }

    pub fn write_tree(&mut self) -> IndexResult<ObjectId> {
        self.index.write_tree()
    }

    /// Serialize the table and cache tree into the lock file.
    ///
    /// Entries modified in the current second get a zero size first, in
    /// memory and on disk, so a later stat comparison cannot call them
    /// clean.
    pub fn write(mut self) -> IndexResult<WrittenIndex<'a>> {
        // Filesystems may keep only whole seconds.
        let cutoff = StatTime::new(StatTime::now().secs, 0);
        let smudged = self.index.table.smudge_racily_clean(cutoff);
        if smudged > 0 {
            debug!(smudged, "smudged racily clean entries");
        }

        let index = &mut *self.index;
        let version = format::effective_version(index.version, index.table.entries());
        let lock_path = self.lock.path().to_path_buf();
        let file = self
            .lock
            .file_mut()
            .map_err(|e| IndexError::io(&lock_path, e))?;
        let buffered = format::encode(
            BufWriter::new(file),
            index.table.entries(),
            &index.cache_tree,
            version,
        )
        .map_err(|e| IndexError::io(&lock_path, e))?;
        let file = buffered
            .into_inner()
            .map_err(|e| IndexError::io(&lock_path, e.into_error()))?;
        if index.config.sync_mode == SyncMode::EveryWrite {
            file.sync_all().map_err(|e| IndexError::io(&lock_path, e))?;
        }
        index.version = version;

        info!(
            path = %lock_path.display(),
            entries = index.table.len(),
            version = %version,
            "index written"
        );
        Ok(WrittenIndex {
            index: self.index,
            lock: self.lock,
        })
    }

    /// Release the lock without writing.
    pub fn unlock(self) {
        self.lock.unlock();
    }
}

/// The index after its new content has been staged in the lock file.
#[derive(Debug)]
#[must_use = "dropping a written index discards the write"]
pub struct WrittenIndex<'a> {
    index: &'a mut Index,
    lock: LockFile,
}

impl WrittenIndex<'_> {
    pub fn index(&self) -> &Index {
        self.index
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Atomically replace the index file with the lock file.
    ///
    /// On failure the lock file stays on disk.
    pub fn commit(self) -> IndexResult<()> {
        let Self { index, lock } = self;
        lock.commit()?;
        index.snapshot = match FileSnapshot::of(&index.path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(path = %index.path.display(), error = %e, "cannot stat committed index");
                None
            }
        };
        info!(
            path = %index.path.display(),
            entries = index.table.len(),
            "index committed"
        );
        Ok(())
    }

    /// Discard the staged write and release the lock.
    pub fn unlock(self) {
        self.lock.unlock();
    }
}

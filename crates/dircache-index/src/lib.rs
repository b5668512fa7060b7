//! Staging index for dircache.
//!
//! The index records what the next commit will contain and caches
//! working-tree stat data so that unchanged files need not be rehashed.
//! It is byte-compatible with the standard `DIRC` index format using
//! SHA-256 object names.
//!
//! # Key Types
//!
//! - [`Index`] -- The entry table and cache tree bound to an index file
//! - [`EntryTable`] -- Entries sorted by (path bytes, stage), unique
//! - [`CacheTree`] -- Cached subtree ids reused by [`Index::write_tree`]
//! - [`Builder`] / [`Editor`] -- Whole-table and incremental mutation
//! - [`IndexLock`] / [`WrittenIndex`] -- The lock, write, commit chain
//! - [`IndexView`] -- Read-only borrow of an index
//! - [`WorkdirStatus`] -- Result of comparing entries with the working tree
//!
//! # Example
//!
//! ```
//! # use std::sync::Arc;
//! # use dircache_index::{Index, IndexConfig, IndexEntry};
//! # use dircache_store::{Blob, EntryMode, InMemoryObjectStore};
//! # let dir = tempfile::tempdir().unwrap();
//! let store = Arc::new(InMemoryObjectStore::new());
//! let mut index = Index::open(dir.path().join("index"), store, IndexConfig::default())?;
//!
//! let blob = Blob::new(b"hello\n".to_vec());
//! let mut editor = index.editor();
//! editor.add(IndexEntry::new("src/hello.txt", blob.id(), EntryMode::Regular));
//! editor.finish()?;
//!
//! let tree = index.write_tree()?;
//! index.lock()?.write()?.commit()?;
//! assert_eq!(index.view().cached_tree_id(), Some(tree));
//! # Ok::<(), dircache_index::IndexError>(())
//! ```

pub mod builder;
pub mod cache_tree;
pub mod config;
pub mod editor;
pub mod entry;
pub mod error;
mod format;
pub mod index;
pub mod lock;
pub mod stat;
pub mod status;
pub mod table;
pub mod view;

pub use builder::Builder;
pub use cache_tree::{CacheNode, CacheTree};
pub use config::{DuplicatePolicy, IndexConfig, IndexVersion, SyncMode};
pub use editor::Editor;
pub use entry::{validate_path, EntryFlags, IndexEntry, Stage, StatTime};
pub use error::{IndexError, IndexResult};
pub use index::{Index, IndexLock, WrittenIndex};
pub use lock::{lock_path_for, LOCK_SUFFIX};
pub use stat::{FileSnapshot, FileStat, StatSource, WorkdirStat};
pub use status::{FileStatus, StatusEntry, WorkdirStatus};
pub use table::EntryTable;
pub use view::IndexView;

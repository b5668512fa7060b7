//! Error types for the index crate.

use std::io;
use std::path::{Path, PathBuf};

use bstr::BString;
use dircache_types::ObjectId;

use crate::entry::Stage;

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The on-disk index is malformed.
    #[error("malformed index at offset {offset}: {reason}")]
    Format { offset: usize, reason: String },

    /// The trailing checksum does not match the file contents.
    #[error("index checksum mismatch")]
    ChecksumMismatch,

    /// The header names a format version this crate cannot read.
    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    /// A mandatory (lowercase-signature) extension is not understood.
    #[error("unsupported required index extension: {0}")]
    UnsupportedExtension(String),

    /// The cached tree extension disagrees with the entry table.
    #[error("corrupt cache tree: {0}")]
    CorruptCacheTree(String),

    /// Two entries share the same (path, stage) under the reject policy.
    #[error("duplicate index entry: {path} at stage {stage}")]
    DuplicateEntry { path: BString, stage: Stage },

    /// A path carries a merged entry and conflict stages at once.
    #[error("path has both merged and conflict stages: {0}")]
    MixedStages(BString),

    /// A path is tracked as a file and as a directory at once.
    #[error("path is both a file and a directory: {0}")]
    DirectoryFileConflict(BString),

    /// An invalid path was provided.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: BString, reason: &'static str },

    /// The lock file already exists; another writer is in progress.
    #[error("index is locked: {} already exists", .0.display())]
    LockContention(PathBuf),

    /// A tree cannot be written while conflict stages remain.
    #[error("unresolved conflict at {}", join_paths(.0))]
    UnresolvedConflict(Vec<BString>),

    /// An object referenced by the index was not found in the store.
    #[error("object not found in store: {0}")]
    ObjectNotFound(ObjectId),

    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] dircache_store::StoreError),

    /// Filesystem operation failed on the named path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn format(offset: usize, reason: impl Into<String>) -> Self {
        Self::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry after another writer finishes.
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention(_))
    }
}

fn join_paths(paths: &[BString]) -> String {
    paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;

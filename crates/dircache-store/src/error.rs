use dircache_types::ObjectId;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed to read or persist an object.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored bytes do not decode as the expected object kind.
    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: ObjectId, reason: String },

    /// The object hashed to the all-zero id, which is reserved.
    #[error("cannot store object with null ID")]
    NullObjectId,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

use dircache_types::ObjectId;

use crate::error::StoreResult;
use crate::object::{StoredObject, Tree};

/// Content-addressed object database as seen by the index.
///
/// Ids are derived from content, so writing the same object twice is a
/// no-op that returns the same id. Implementations are shared across
/// threads behind an `Arc`.
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, or `Ok(None)` if the id is unknown.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Store an object and return its id.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    fn exists(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Store a directory listing and return its tree id.
    ///
    /// This is the only write the index issues. Backends with a cheaper
    /// tree path may override it.
    fn insert_tree(&self, tree: &Tree) -> StoreResult<ObjectId> {
        self.write(&tree.to_stored_object())
    }
}

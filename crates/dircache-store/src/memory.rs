use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use dircache_types::ObjectId;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::traits::ObjectStore;

/// Object store held entirely in memory.
///
/// Used by tests and by callers that materialize trees only to learn their
/// ids. Every `write` call is counted, including ones that find the object
/// already present, so callers can tell how many trees a materialization
/// produced.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
    writes: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct objects held.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `write` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of distinct objects of `kind`.
    pub fn count_of(&self, kind: ObjectKind) -> usize {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|obj| obj.kind == kind)
            .count()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        Ok(self.objects.read().expect("lock poisoned").get(id).cloned())
    }

    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId> {
        let id = object.compute_id();
        if id.is_null() {
            return Err(StoreError::NullObjectId);
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.write().expect("lock poisoned");
        if !objects.contains_key(&id) {
            objects.insert(id, object.clone());
            trace!(%id, kind = %object.kind, size = object.size, "object stored");
        }
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(id))
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("objects", &self.len())
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Blob, EntryMode, Tree, TreeEntry};
    use std::sync::Arc;
    use std::thread;

    fn listing() -> Tree {
        Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "README", Blob::new(b"hi".to_vec()).id()),
            TreeEntry::new(EntryMode::Directory, "src", Tree::empty().id()),
        ])
    }

    #[test]
    fn inserted_tree_reads_back() {
        let store = InMemoryObjectStore::new();
        let tree = listing();
        let id = store.insert_tree(&tree).unwrap();
        assert_eq!(id, tree.id());
        assert!(store.exists(&id).unwrap());

        let stored = store.read(&id).unwrap().unwrap();
        assert_eq!(stored.kind, ObjectKind::Tree);
        assert_eq!(Tree::from_stored_object(&stored).unwrap(), tree);
    }

    #[test]
    fn rewrites_are_counted_but_not_duplicated() {
        let store = InMemoryObjectStore::new();
        let tree = listing();
        store.insert_tree(&tree).unwrap();
        store.insert_tree(&tree).unwrap();
        store
            .write(&Blob::new(b"hi".to_vec()).to_stored_object())
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.write_count(), 3);
        assert_eq!(store.count_of(ObjectKind::Tree), 1);
        assert_eq!(store.count_of(ObjectKind::Blob), 1);
    }

    #[test]
    fn unknown_id_reads_as_none() {
        let store = InMemoryObjectStore::new();
        let id = Tree::empty().id();
        assert!(store.read(&id).unwrap().is_none());
        assert!(!store.exists(&id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let store = Arc::new(InMemoryObjectStore::new());
        let handles: Vec<_> = (0..4u8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let tree = Tree::new(vec![TreeEntry::new(
                        EntryMode::Regular,
                        "f",
                        Blob::new(vec![i]).id(),
                    )]);
                    store.insert_tree(&tree).unwrap()
                })
            })
            .collect();
        let ids: Vec<ObjectId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(store.len(), 4);
        for id in ids {
            assert!(store.exists(&id).unwrap());
        }
    }
}

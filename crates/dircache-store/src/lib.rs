//! Content-addressed object storage for dircache.
//!
//! This crate defines the object model the index materializes into and the
//! storage interface it calls. Every object is identified by the SHA-256 of
//! its canonical bytes behind a `"<kind> <len>\0"` header.
//!
//! [`Blob`] and [`Tree`] are the two kinds the index deals in: entries name
//! blobs, and materializing the cache tree writes trees through an
//! [`ObjectStore`]. [`InMemoryObjectStore`] backs tests and callers that
//! only need tree ids.
//!
//! Stores never look inside the bytes they keep. Writing is idempotent
//! because the id is a function of the content.

pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectStore;
pub use object::{Blob, EntryMode, ObjectKind, StoredObject, Tree, TreeEntry};
pub use traits::ObjectStore;

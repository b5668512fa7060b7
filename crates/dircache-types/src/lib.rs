//! Foundation types for dircache.
//!
//! Every other dircache crate depends on `dircache-types` for the object
//! identifier shared by the index, the object store and the hashing layer.
//!
//! # Key Types
//!
//! - [`ObjectId`]: 32-byte SHA-256 object name
//! - [`TypeError`]: why an id failed to parse

pub mod error;
pub mod object;

pub use error::TypeError;
pub use object::{ObjectId, OBJECT_ID_LEN};

//! Hashing primitives for dircache.
//!
//! [`ContentHasher`] names objects with the standard SHA-256
//! `"<kind> <len>\0"` header scheme. [`ChecksumWriter`] and
//! [`verify_trailer`] handle the whole-file checksum that ends the index.

pub mod checksum;
pub mod hasher;

pub use checksum::{verify_trailer, ChecksumWriter, TRAILER_LEN};
pub use hasher::ContentHasher;

use dircache_types::ObjectId;
use sha2::{Digest, Sha256};

/// Names objects the way the standard tool does: SHA-256 over
/// `"<kind> <len>\0"` followed by the payload.
///
/// The kind prefix keeps a blob and a tree with the same bytes apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentHasher {
    kind: &'static str,
}

impl ContentHasher {
    pub const BLOB: Self = Self::new("blob");
    pub const TREE: Self = Self::new("tree");

    /// Hasher for another object kind, such as `"commit"`.
    pub const fn new(kind: &'static str) -> Self {
        Self { kind }
    }

    pub fn hash(&self, data: &[u8]) -> ObjectId {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(data);
        ObjectId::from_hash(hasher.finalize().into())
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

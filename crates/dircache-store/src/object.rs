use std::cmp::Ordering;
use std::fmt;

use bstr::{BString, ByteSlice};
use dircache_crypto::ContentHasher;
use dircache_types::{ObjectId, OBJECT_ID_LEN};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// What a stored object's bytes encode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// File contents.
    Blob,
    /// A directory listing.
    Tree,
}

impl ObjectKind {
    fn hasher(self) -> ContentHasher {
        match self {
            Self::Blob => ContentHasher::BLOB,
            Self::Tree => ContentHasher::TREE,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hasher().kind())
    }
}

/// Raw bytes tagged with their kind, as handed to an [`ObjectStore`].
///
/// [`ObjectStore`]: crate::ObjectStore
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    /// Length of `data`.
    pub size: u64,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        Self {
            kind,
            size: data.len() as u64,
            data,
        }
    }

    /// The id this object is stored under.
    pub fn compute_id(&self) -> ObjectId {
        self.kind.hasher().hash(&self.data)
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::CorruptObject {
            id: self.compute_id(),
            reason: reason.into(),
        }
    }
}

/// File contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn id(&self) -> ObjectId {
        ContentHasher::BLOB.hash(&self.data)
    }

    pub fn to_stored_object(&self) -> StoredObject {
        StoredObject::new(ObjectKind::Blob, self.data.clone())
    }

    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        match obj.kind {
            ObjectKind::Blob => Ok(Self::new(obj.data.clone())),
            other => Err(obj.corrupt(format!("expected blob, got {other}"))),
        }
    }
}

/// The type of a tree or index entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// `100644`
    Regular,
    /// `100755`
    Executable,
    /// `120000`
    Symlink,
    /// `160000`: a commit of a nested repository.
    Gitlink,
    /// `40000`: a subtree.
    Directory,
}

impl EntryMode {
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Directory => 0o040000,
        }
    }

    /// Parse the mode bits of a tree or index entry.
    ///
    /// `100664`, written by very old tools, reads as [`EntryMode::Regular`].
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        Some(match bits {
            0o100644 | 0o100664 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Directory,
            _ => return None,
        })
    }

    /// Whether the entry names a subtree.
    pub fn is_tree(&self) -> bool {
        *self == Self::Directory
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// One name in a tree listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: EntryMode,
    /// A single path component.
    pub name: BString,
    pub object_id: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<BString>, object_id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            object_id,
        }
    }

    /// The name as it takes part in ordering: subtrees compare as if
    /// followed by `/`.
    fn sort_key(&self) -> impl Iterator<Item = u8> + '_ {
        let slash = self.mode.is_tree().then_some(b'/');
        self.name.iter().copied().chain(slash)
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(other.sort_key())
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A directory listing in canonical order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree, sorting `entries` into canonical order.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort();
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// `<mode in octal, unpadded> SP <name> NUL <raw id>` per entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * (OBJECT_ID_LEN + 24));
        for entry in &self.entries {
            out.extend_from_slice(format!("{:o} ", entry.mode.mode_bits()).as_bytes());
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.object_id.as_bytes());
        }
        out
    }

    pub fn id(&self) -> ObjectId {
        ContentHasher::TREE.hash(&self.to_bytes())
    }

    pub fn to_stored_object(&self) -> StoredObject {
        StoredObject::new(ObjectKind::Tree, self.to_bytes())
    }

    /// Parse a stored tree. Entry order is taken as stored.
    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        if obj.kind != ObjectKind::Tree {
            return Err(obj.corrupt(format!("expected tree, got {}", obj.kind)));
        }

        let mut entries = Vec::new();
        let mut rest = obj.data.as_slice();
        while !rest.is_empty() {
            let (mode, after) = rest
                .split_once_str(" ")
                .ok_or_else(|| obj.corrupt("missing mode separator"))?;
            let bits = std::str::from_utf8(mode)
                .ok()
                .and_then(|s| u32::from_str_radix(s, 8).ok())
                .ok_or_else(|| obj.corrupt(format!("bad mode {:?}", mode.as_bstr())))?;
            let mode = EntryMode::from_mode_bits(bits)
                .ok_or_else(|| obj.corrupt(format!("unknown mode {bits:o}")))?;

            let (name, after) = after
                .split_once_str("\0")
                .ok_or_else(|| obj.corrupt("unterminated entry name"))?;
            if after.len() < OBJECT_ID_LEN {
                return Err(obj.corrupt(format!("truncated id for {:?}", name.as_bstr())));
            }
            let (id, after) = after.split_at(OBJECT_ID_LEN);
            let object_id = ObjectId::from_slice(id).map_err(|e| obj.corrupt(e.to_string()))?;

            entries.push(TreeEntry::new(mode, name, object_id));
            rest = after;
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&TreeEntry> {
        let name = name.as_ref();
        self.entries.iter().find(|e| e.name.as_slice() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ObjectId {
        Blob::new(s.as_bytes().to_vec()).id()
    }

    fn names(tree: &Tree) -> Vec<String> {
        tree.entries.iter().map(|e| e.name.to_string()).collect()
    }

    #[test]
    fn blob_id_is_the_stored_id() {
        let blob = Blob::new(b"fn main() {}\n".to_vec());
        let stored = blob.to_stored_object();
        assert_eq!(stored.size, 13);
        assert_eq!(stored.compute_id(), blob.id());
        assert_eq!(Blob::from_stored_object(&stored).unwrap(), blob);
    }

    #[test]
    fn tree_bytes_are_not_a_blob() {
        let stored = Tree::empty().to_stored_object();
        assert!(matches!(
            Blob::from_stored_object(&stored),
            Err(StoreError::CorruptObject { .. })
        ));
        assert_ne!(stored.compute_id(), Blob::new(Vec::new()).id());
    }

    #[test]
    fn subtrees_sort_as_if_slash_terminated() {
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Directory, "lib", id("t")),
            TreeEntry::new(EntryMode::Regular, "lib.rs", id("a")),
            TreeEntry::new(EntryMode::Regular, "lib-old", id("b")),
            TreeEntry::new(EntryMode::Regular, "Cargo.toml", id("c")),
        ]);
        assert_eq!(names(&tree), ["Cargo.toml", "lib-old", "lib.rs", "lib"]);

        let files = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "lib.rs", id("a")),
            TreeEntry::new(EntryMode::Regular, "lib", id("b")),
        ]);
        assert_eq!(names(&files), ["lib", "lib.rs"]);
    }

    #[test]
    fn stored_tree_parses_back() {
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Executable, "build.sh", id("sh")),
            TreeEntry::new(EntryMode::Symlink, "latest", id("link")),
            TreeEntry::new(EntryMode::Gitlink, "vendor", id("commit")),
            TreeEntry::new(EntryMode::Directory, "src", Tree::empty().id()),
        ]);
        let stored = tree.to_stored_object();
        assert_eq!(stored.compute_id(), tree.id());
        let parsed = Tree::from_stored_object(&stored).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.get("vendor").unwrap().mode, EntryMode::Gitlink);
        assert!(parsed.get("missing").is_none());
        assert_eq!(parsed.len(), 4);
    }

    #[test]
    fn directory_mode_is_written_without_padding() {
        let tree = Tree::new(vec![TreeEntry::new(EntryMode::Directory, "d", ObjectId::null())]);
        let bytes = tree.to_bytes();
        assert!(bytes.starts_with(b"40000 d\0"));
        assert_eq!(bytes.len(), 8 + OBJECT_ID_LEN);
    }

    #[test]
    fn malformed_trees_are_corrupt() {
        let good = Tree::new(vec![TreeEntry::new(EntryMode::Regular, "f", id("f"))]).to_bytes();
        let cases: Vec<Vec<u8>> = vec![
            good[..good.len() - 1].to_vec(),
            b"100644".to_vec(),
            b"100644 f".to_vec(),
            b"99x f\0".to_vec(),
            [b"100600 f\0".as_slice(), &[0u8; OBJECT_ID_LEN]].concat(),
        ];
        for data in cases {
            let stored = StoredObject::new(ObjectKind::Tree, data);
            assert!(matches!(
                Tree::from_stored_object(&stored),
                Err(StoreError::CorruptObject { .. })
            ));
        }
    }

    #[test]
    fn empty_tree_has_standard_name() {
        assert_eq!(
            Tree::empty().id().to_hex(),
            "6ef19b41225c5369f1c104d45d8d85efa9b057b53b14b4b9b939dd74decc5321"
        );
    }

    #[test]
    fn mode_bits() {
        for mode in [
            EntryMode::Regular,
            EntryMode::Executable,
            EntryMode::Symlink,
            EntryMode::Gitlink,
            EntryMode::Directory,
        ] {
            assert_eq!(EntryMode::from_mode_bits(mode.mode_bits()), Some(mode));
        }
        assert_eq!(EntryMode::from_mode_bits(0o100664), Some(EntryMode::Regular));
        assert_eq!(EntryMode::from_mode_bits(0o777), None);
        assert_eq!(EntryMode::Directory.to_string(), "040000");
        assert_eq!(ObjectKind::Tree.to_string(), "tree");
    }
}

//! Cached subtree ids layered over the entry table.
//!
//! Each [`CacheNode`] stands for one directory. A valid node remembers how
//! many table entries its directory covers and the id of the tree object
//! they produced, so materialization can skip the whole range. Any edit
//! below a directory invalidates that node and every ancestor.

use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use dircache_store::{EntryMode, ObjectStore, Tree, TreeEntry};
use dircache_types::{ObjectId, OBJECT_ID_LEN};
use tracing::{debug, trace};

use crate::entry::{IndexEntry, Stage};
use crate::error::{IndexError, IndexResult};
use crate::table::under_range;

/// One directory level of the cache tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheNode {
    name: BString,
    entry_count: usize,
    id: Option<ObjectId>,
    children: Vec<CacheNode>,
}

impl CacheNode {
    fn new(name: impl Into<BString>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Directory name relative to the parent; empty for the root.
    pub fn name(&self) -> &BStr {
        self.name.as_bstr()
    }

    /// Number of table entries covered, known only while the node is valid.
    pub fn entry_count(&self) -> Option<usize> {
        self.id.map(|_| self.entry_count)
    }

    /// The cached tree id, if nothing below has changed since it was built.
    pub fn tree_id(&self) -> Option<ObjectId> {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_some()
    }

    /// Immediate subdirectories, sorted by name.
    pub fn children(&self) -> &[CacheNode] {
        &self.children
    }

    pub fn child(&self, name: impl AsRef<[u8]>) -> Option<&CacheNode> {
        self.child_position(name.as_ref())
            .ok()
            .map(|i| &self.children[i])
    }

    fn child_position(&self, name: &[u8]) -> Result<usize, usize> {
        self.children
            .binary_search_by(|c| c.name.as_slice().cmp(name))
    }

    fn invalidate(&mut self) {
        self.id = None;
        self.entry_count = 0;
    }

    fn sort_children(&mut self) {
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// The cache tree: a [`CacheNode`] per directory, rooted at the empty path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheTree {
    root: CacheNode,
}

impl CacheTree {
    /// An empty, fully invalid cache tree.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_root(root: CacheNode) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &CacheNode {
        &self.root
    }

    /// The cached root tree id, if the whole table is unchanged since the
    /// last materialization.
    pub fn tree_id(&self) -> Option<ObjectId> {
        self.root.id
    }

    /// The node for directory `dir` (slash separated, no trailing slash).
    pub fn find(&self, dir: impl AsRef<[u8]>) -> Option<&CacheNode> {
        let dir = dir.as_ref();
        let mut node = &self.root;
        if dir.is_empty() {
            return Some(node);
        }
        for component in dir.split_str("/") {
            node = node.child(component)?;
        }
        Some(node)
    }

    /// Invalidate every node on the way from the root to the directory
    /// holding `path`. Siblings are left untouched.
    pub(crate) fn invalidate_path(&mut self, path: &[u8]) {
        let mut node = &mut self.root;
        node.invalidate();
        let dir_end = path.rfind_byte(b'/').unwrap_or(0);
        if dir_end == 0 {
            return;
        }
        for component in path[..dir_end].split_str("/") {
            match node.child_position(component) {
                Ok(i) => {
                    node = &mut node.children[i];
                    node.invalidate();
                }
                Err(_) => break,
            }
        }
    }

    /// Walk two sorted tables side by side and invalidate the directories
    /// of every entry that was added, removed or changed. Returns how many
    /// entries differed.
    pub(crate) fn invalidate_changes(&mut self, old: &[IndexEntry], new: &[IndexEntry]) -> usize {
        let (mut i, mut j, mut changed) = (0, 0, 0);
        while i < old.len() || j < new.len() {
            let ord = match (old.get(i), new.get(j)) {
                (Some(a), Some(b)) => a.cmp_key(b),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match ord {
                Ordering::Less => {
                    self.invalidate_path(&old[i].path);
                    changed += 1;
                    i += 1;
                }
                Ordering::Greater => {
                    self.invalidate_path(&new[j].path);
                    changed += 1;
                    j += 1;
                }
                Ordering::Equal => {
                    if !old[i].same_content(&new[j]) {
                        self.invalidate_path(&new[j].path);
                        changed += 1;
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        changed
    }

    pub(crate) fn clear(&mut self) {
        self.root = CacheNode::default();
    }

    /// Produce the root tree id for `entries`, reusing every valid node and
    /// writing trees only for invalid ones.
    ///
    /// Returns the root id and the number of tree objects written. The
    /// caller must have ruled out conflict stages.
    pub(crate) fn update(
        &mut self,
        entries: &[IndexEntry],
        store: &dyn ObjectStore,
    ) -> IndexResult<(ObjectId, usize)> {
        let mut materializer = Materializer {
            store,
            written: 0,
            empty: Tree::empty().id(),
        };
        let built = materializer.node(&mut self.root, entries, b"")?;
        if built.count != entries.len() {
            return Err(IndexError::CorruptCacheTree(format!(
                "root covers {} of {} entries",
                built.count,
                entries.len()
            )));
        }
        debug!(
            root = %built.id.short_hex(),
            written = materializer.written,
            "cache tree updated"
        );
        Ok((built.id, materializer.written))
    }

    /// Check every valid node against the table it claims to describe.
    pub(crate) fn verify(&self, entries: &[IndexEntry]) -> IndexResult<()> {
        verify_node(&self.root, entries, &mut BString::default())
    }

    /// Serialize as the body of a `TREE` extension.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        encode_node(&self.root, out);
    }

    /// Parse the body of a `TREE` extension.
    pub(crate) fn decode(data: &[u8]) -> IndexResult<Self> {
        let mut pos = 0;
        let root = decode_node(data, &mut pos, 0)?;
        if !root.name.is_empty() {
            return Err(IndexError::CorruptCacheTree("root has a name".into()));
        }
        if pos != data.len() {
            return Err(IndexError::CorruptCacheTree(format!(
                "{} trailing bytes",
                data.len() - pos
            )));
        }
        Ok(Self { root })
    }

    /// Whether there is anything worth persisting.
    pub(crate) fn is_empty(&self) -> bool {
        !self.root.is_valid() && self.root.children.is_empty()
    }
}

struct Built {
    count: usize,
    id: ObjectId,
}

struct Materializer<'a> {
    store: &'a dyn ObjectStore,
    written: usize,
    empty: ObjectId,
}

impl Materializer<'_> {
    /// Materialize the directory `base` (empty or ending in `/`), whose
    /// entries start at `entries[0]` and run until the first path outside
    /// `base`.
    fn node(
        &mut self,
        node: &mut CacheNode,
        entries: &[IndexEntry],
        base: &[u8],
    ) -> IndexResult<Built> {
        if let Some(id) = node.id {
            let count = node.entry_count;
            let covered = count <= entries.len()
                && (count == 0 || entries[count - 1].path.starts_with(base))
                && entries.get(count).map_or(true, |e| !e.path.starts_with(base));
            if !covered {
                return Err(IndexError::CorruptCacheTree(format!(
                    "stale entry count {count} for {:?}",
                    base.as_bstr()
                )));
            }
            trace!(dir = %base.as_bstr(), "reusing cached tree");
            return Ok(Built { count, id });
        }

        let mut previous = std::mem::take(&mut node.children);
        let mut listing = Vec::new();
        let mut i = 0;
        while let Some(entry) = entries.get(i) {
            let Some(rest) = entry.path.strip_prefix(base) else {
                break;
            };
            if entry.stage != Stage::Merged {
                return Err(IndexError::UnresolvedConflict(vec![entry.path.clone()]));
            }
            match rest.find_byte(b'/') {
                Some(slash) => {
                    let name = &rest[..slash];
                    let mut child =
                        match previous.binary_search_by(|c| c.name.as_slice().cmp(name)) {
                            Ok(p) => previous.remove(p),
                            Err(_) => CacheNode::new(name),
                        };
                    let mut child_base = base.to_vec();
                    child_base.extend_from_slice(name);
                    child_base.push(b'/');
                    let built = self.node(&mut child, &entries[i..], &child_base)?;
                    if built.id != self.empty {
                        listing.push(TreeEntry::new(EntryMode::Directory, name, built.id));
                    }
                    node.children.push(child);
                    i += built.count;
                }
                None => {
                    if !entry.flags.intent_to_add {
                        listing.push(TreeEntry::new(entry.mode, rest, entry.object_id));
                    }
                    i += 1;
                }
            }
        }
        node.sort_children();

        let id = self.store.insert_tree(&Tree::new(listing))?;
        self.written += 1;
        node.entry_count = i;
        node.id = Some(id);
        trace!(dir = %base.as_bstr(), entries = i, tree = %id.short_hex(), "wrote tree");
        Ok(Built { count: i, id })
    }
}

fn verify_node(node: &CacheNode, entries: &[IndexEntry], dir: &mut BString) -> IndexResult<()> {
    if let Some(count) = node.entry_count() {
        let actual = under_range(entries, dir.as_slice()).len();
        if actual != count {
            return Err(IndexError::CorruptCacheTree(format!(
                "{:?} records {count} entries, table has {actual}",
                dir.as_bstr()
            )));
        }
    }
    for child in &node.children {
        let len = dir.len();
        if !dir.is_empty() {
            dir.push(b'/');
        }
        dir.extend_from_slice(&child.name);
        let result = verify_node(child, entries, dir);
        dir.truncate(len);
        result?;
    }
    Ok(())
}

fn encode_node(node: &CacheNode, out: &mut Vec<u8>) {
    out.extend_from_slice(&node.name);
    out.push(0);
    let count = match node.id {
        Some(_) => node.entry_count as i64,
        None => -1,
    };
    out.extend_from_slice(format!("{count} {}\n", node.children.len()).as_bytes());
    if let Some(id) = node.id {
        out.extend_from_slice(id.as_bytes());
    }
    for child in &node.children {
        encode_node(child, out);
    }
}

const MAX_DEPTH: usize = 4096;

fn decode_node(data: &[u8], pos: &mut usize, depth: usize) -> IndexResult<CacheNode> {
    let corrupt = |reason: &str| IndexError::CorruptCacheTree(reason.to_string());
    if depth > MAX_DEPTH {
        return Err(corrupt("nesting too deep"));
    }

    let rest = &data[*pos..];
    let nul = rest.find_byte(0).ok_or_else(|| corrupt("unterminated name"))?;
    let name = BString::from(&rest[..nul]);
    if name.contains(&b'/') {
        return Err(corrupt("directory name contains '/'"));
    }
    let rest = &rest[nul + 1..];
    let lf = rest
        .find_byte(b'\n')
        .ok_or_else(|| corrupt("unterminated counts"))?;
    let counts = std::str::from_utf8(&rest[..lf]).map_err(|_| corrupt("non-ascii counts"))?;
    let (count, subtrees) = counts
        .split_once(' ')
        .ok_or_else(|| corrupt("missing subtree count"))?;
    let count: i64 = count.parse().map_err(|_| corrupt("bad entry count"))?;
    let subtrees: usize = subtrees.parse().map_err(|_| corrupt("bad subtree count"))?;
    *pos += nul + 1 + lf + 1;

    let mut node = CacheNode::new(name);
    match count {
        -1 => {}
        n if n >= 0 => {
            let raw = data
                .get(*pos..*pos + OBJECT_ID_LEN)
                .ok_or_else(|| corrupt("truncated tree id"))?;
            node.id = Some(ObjectId::from_slice(raw).map_err(|e| corrupt(&e.to_string()))?);
            node.entry_count = n as usize;
            *pos += OBJECT_ID_LEN;
        }
        _ => return Err(corrupt("negative entry count")),
    }

    for _ in 0..subtrees {
        if *pos >= data.len() {
            return Err(corrupt("missing subtree"));
        }
        let child = decode_node(data, pos, depth + 1)?;
        node.children.push(child);
    }
    node.sort_children();
    if node.children.windows(2).any(|w| w[0].name == w[1].name) {
        return Err(corrupt("duplicate subtree name"));
    }
    Ok(node)
}

/// Load `tree_id` recursively, appending every non-tree entry as a path
/// under `prefix` at `stage`. Returns a valid cache node describing what
/// was loaded.
pub(crate) fn collect_tree(
    store: &dyn ObjectStore,
    tree_id: ObjectId,
    prefix: &[u8],
    stage: Stage,
    out: &mut Vec<IndexEntry>,
) -> IndexResult<CacheNode> {
    let object = store
        .read(&tree_id)?
        .ok_or(IndexError::ObjectNotFound(tree_id))?;
    let tree = Tree::from_stored_object(&object)?;

    let start = out.len();
    let mut node = CacheNode::default();
    for item in &tree.entries {
        let mut path = BString::from(prefix);
        if !path.is_empty() {
            path.push(b'/');
        }
        path.extend_from_slice(&item.name);
        if item.mode.is_tree() {
            let mut child = collect_tree(store, item.object_id, &path, stage, out)?;
            child.name = item.name.clone();
            node.children.push(child);
        } else {
            out.push(IndexEntry::new_staged(path, stage, item.object_id, item.mode));
        }
    }
    node.sort_children();
    node.entry_count = out.len() - start;
    node.id = Some(tree_id);
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::sort_entries;
    use dircache_store::{Blob, InMemoryObjectStore};

    fn entry(path: &str) -> IndexEntry {
        let blob = Blob::new(path.as_bytes().to_vec());
        IndexEntry::new(path, blob.id(), EntryMode::Regular)
    }

    fn entries(paths: &[&str]) -> Vec<IndexEntry> {
        let mut v: Vec<_> = paths.iter().map(|p| entry(p)).collect();
        sort_entries(&mut v);
        v
    }

    #[test]
    fn materializes_nested_directories() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["b/d", "a", "b/c"]);
        let mut tree = CacheTree::new();
        let (root, written) = tree.update(&table, &store).unwrap();
        assert_eq!(written, 2);

        let b = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "c", entry("b/c").object_id),
            TreeEntry::new(EntryMode::Regular, "d", entry("b/d").object_id),
        ]);
        let expected = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "a", entry("a").object_id),
            TreeEntry::new(EntryMode::Directory, "b", b.id()),
        ]);
        assert_eq!(root, expected.id());
        assert_eq!(tree.find("b").unwrap().tree_id(), Some(b.id()));
        assert_eq!(tree.find("b").unwrap().entry_count(), Some(2));
        assert_eq!(tree.root().entry_count(), Some(3));
        assert!(store.exists(&root).unwrap());
    }

    #[test]
    fn valid_tree_writes_nothing() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["x/1", "y/2", "z"]);
        let mut tree = CacheTree::new();
        let (first, _) = tree.update(&table, &store).unwrap();
        let (second, written) = tree.update(&table, &store).unwrap();
        assert_eq!(first, second);
        assert_eq!(written, 0);
    }

    #[test]
    fn invalidation_only_touches_ancestors() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["lib/a", "src/deep/x", "src/y", "top"]);
        let mut tree = CacheTree::new();
        tree.update(&table, &store).unwrap();
        let lib_before = tree.find("lib").unwrap().tree_id();

        tree.invalidate_path(b"src/deep/x");
        assert!(!tree.root().is_valid());
        assert!(!tree.find("src").unwrap().is_valid());
        assert!(!tree.find("src/deep").unwrap().is_valid());
        assert!(tree.find("lib").unwrap().is_valid());

        let mut changed = table.clone();
        changed[1].object_id = Blob::new(b"new".to_vec()).id();
        let (_, written) = tree.update(&changed, &store).unwrap();
        assert_eq!(written, 3);
        assert_eq!(tree.find("lib").unwrap().tree_id(), lib_before);
    }

    #[test]
    fn root_rebuild_reuses_every_sibling_directory() {
        let store = InMemoryObjectStore::new();
        let mut paths: Vec<String> = (0..50).map(|i| format!("d{i:02}/f")).collect();
        paths.extend(["a/x", "a-b/x", "a.c/x", "top"].map(String::from));
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let table = entries(&refs);
        let mut tree = CacheTree::new();
        let (_, first) = tree.update(&table, &store).unwrap();
        assert_eq!(first, 54);

        tree.invalidate_path(b"top");
        let (_, written) = tree.update(&table, &store).unwrap();
        assert_eq!(written, 1);
        let names: Vec<&BStr> = tree.root().children().iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), 53);
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(tree.find("a-b").unwrap().is_valid());
    }

    #[test]
    fn removed_directories_are_pruned() {
        let store = InMemoryObjectStore::new();
        let mut tree = CacheTree::new();
        tree.update(&entries(&["gone/f", "keep/g"]), &store).unwrap();
        assert!(tree.find("gone").is_some());

        tree.invalidate_path(b"gone/f");
        tree.update(&entries(&["keep/g", "new/h"]), &store).unwrap();
        assert!(tree.find("gone").is_none());
        assert!(tree.find("new").unwrap().is_valid());
        assert!(tree.find("keep").unwrap().is_valid());
    }

    #[test]
    fn intent_to_add_is_counted_but_not_listed() {
        let store = InMemoryObjectStore::new();
        let mut table = entries(&["a", "b"]);
        table[1].flags.intent_to_add = true;
        let mut tree = CacheTree::new();
        let (root, _) = tree.update(&table, &store).unwrap();
        let expected = Tree::new(vec![TreeEntry::new(
            EntryMode::Regular,
            "a",
            table[0].object_id,
        )]);
        assert_eq!(root, expected.id());
        assert_eq!(tree.root().entry_count(), Some(2));
    }

    #[test]
    fn conflict_stage_refuses_to_materialize() {
        let store = InMemoryObjectStore::new();
        let mut table = entries(&["a", "m"]);
        table[1].stage = Stage::Ours;
        let err = CacheTree::new().update(&table, &store).unwrap_err();
        assert!(matches!(err, IndexError::UnresolvedConflict(paths) if paths == ["m"]));
    }

    #[test]
    fn extension_roundtrip_preserves_validity() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["a", "b/c", "b/d", "e/f/g"]);
        let mut tree = CacheTree::new();
        tree.update(&table, &store).unwrap();
        tree.invalidate_path(b"e/f/g");

        let mut bytes = Vec::new();
        tree.encode(&mut bytes);
        let decoded = CacheTree::decode(&bytes).unwrap();
        assert_eq!(decoded, tree);
        assert!(decoded.find("b").unwrap().is_valid());
        assert!(!decoded.find("e/f").unwrap().is_valid());
        decoded.verify(&table).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_counts() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["a", "b/c", "b/d"]);
        let mut tree = CacheTree::new();
        tree.update(&table, &store).unwrap();

        let shorter = entries(&["a", "b/c"]);
        assert!(matches!(
            tree.verify(&shorter),
            Err(IndexError::CorruptCacheTree(_))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(CacheTree::decode(b"no-nul").is_err());
        assert!(CacheTree::decode(b"\0x 0\n").is_err());
        assert!(CacheTree::decode(b"\0-2 0\n").is_err());
        assert!(CacheTree::decode(b"\01 0\nshort").is_err());
        assert!(CacheTree::decode(b"\0-1 1\n").is_err());
        assert!(CacheTree::decode(b"\0-1 0\n").unwrap().is_empty());
    }

    #[test]
    fn collect_tree_flattens_in_table_order() {
        let store = InMemoryObjectStore::new();
        let table = entries(&["a-b", "a/x", "a/y/z", "c"]);
        let (root, _) = CacheTree::new().update(&table, &store).unwrap();

        let mut out = Vec::new();
        let node = collect_tree(&store, root, b"", Stage::Merged, &mut out).unwrap();
        let paths: Vec<_> = out.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(paths, ["a-b", "a/x", "a/y/z", "c"]);
        assert_eq!(node.entry_count(), Some(4));
        assert_eq!(node.child("a").unwrap().entry_count(), Some(2));

        let missing = ObjectId::from_bytes(b"missing");
        assert!(matches!(
            collect_tree(&store, missing, b"", Stage::Merged, &mut Vec::new()),
            Err(IndexError::ObjectNotFound(id)) if id == missing
        ));
    }

    #[test]
    fn diff_walk_invalidates_changed_directories_only() {
        let store = InMemoryObjectStore::new();
        let old = entries(&["a/1", "b/2", "c/3"]);
        let mut tree = CacheTree::new();
        tree.update(&old, &store).unwrap();

        let mut new = entries(&["a/1", "b/2", "d/4"]);
        new[1].object_id = Blob::new(b"edited".to_vec()).id();
        assert_eq!(tree.invalidate_changes(&old, &new), 3);
        assert!(tree.find("a").unwrap().is_valid());
        assert!(!tree.find("b").unwrap().is_valid());
        assert!(!tree.find("c").unwrap().is_valid());
        assert!(!tree.root().is_valid());

        let mut restat = old.clone();
        restat[0].size = 99;
        let mut fresh = CacheTree::new();
        fresh.update(&old, &store).unwrap();
        assert_eq!(fresh.invalidate_changes(&old, &restat), 0);
        assert!(fresh.root().is_valid());
    }
}

//! Reading and building Git tree objects.
//!
//! The codec here is bit-exact with Git: a tree serialised from a listing
//! hashes to the same object id Git would produce for the same entries,
//! regardless of whether the backing object database lives on disk or in
//! memory. All tree walks are *flat*: one level, no recursion into
//! subtrees.

use std::cmp::Ordering;
use std::collections::HashMap;

use bstr::BString;
use git2::ObjectType;

use crate::odb::{self, Odb};
use crate::oid::{self, IdError, ObjectId, ObjectKind};

/// One node of a tree listing: an entry name and the kind of object it
/// references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    pub name: BString,
    pub kind: ObjectKind,
}

impl TreeNode {
    pub fn new(name: impl Into<BString>, kind: ObjectKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A flat tree listing, keyed by raw object id. Multiple nodes may share
/// an id when identical content is reused under different names; for a
/// given id, either all nodes are trees or none is.
pub type TreeEntries = HashMap<ObjectId, Vec<TreeNode>>;

/// A batched symlink predicate: returns `true` iff every symlink behind
/// the given ids has a non-upwards target.
pub type SymlinksCheck<'a> = &'a dyn Fn(&[ObjectId]) -> bool;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed tree object")]
    Malformed,
    #[error("unsupported tree-entry mode {0:o}")]
    UnsupportedMode(u32),
    #[error("invalid tree-entry name {0:?}")]
    InvalidName(BString),
    #[error("object {0} is not a tree")]
    NotATree(ObjectId),
    #[error("upwards symlink in tree {0}")]
    UnsafeSymlink(ObjectId),
    #[error("no symlink check provided")]
    MissingSymlinksCheck,
    #[error("tree entry {0:?} not found")]
    EntryNotFound(BString),
    #[error("object {1} referenced by tree entry {0:?} not found")]
    MissingEntryObject(BString, ObjectId),
    #[error("tree entry {0:?} does not match the kind of object {1}")]
    KindMismatch(BString, ObjectId),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Odb(#[from] odb::Error),
}

/// Read a tree from the database and list its immediate entries.
///
/// Entries with unsupported modes fail the walk, unless `ignore_special`
/// is set, in which case they (and symlinks) are skipped silently. When
/// `ignore_special` is not set, all symlink entries are collected after
/// the walk, deduplicated by id, and handed to `check_symlinks` in one
/// batch; a negative answer fails the walk with [`Error::UnsafeSymlink`].
pub fn read_tree(
    odb: &Odb,
    id: &ObjectId,
    check_symlinks: Option<SymlinksCheck>,
    ignore_special: bool,
) -> Result<TreeEntries, Error> {
    let (kind, _) = odb.read_header(id)?;
    if kind != ObjectType::Tree {
        return Err(Error::NotATree(*id));
    }
    let data = odb.read(id)?;
    let entries = parse(&data, ignore_special)?;

    // Non-upwardness cannot be checked entry by entry without reading
    // blobs mid-walk; gather the candidates and check them in bulk. This
    // is only needed for ignore_special == false, since otherwise no
    // symlink makes it into the listing.
    if !ignore_special {
        let symlinks = entries
            .iter()
            .filter(|(_, nodes)| nodes.iter().any(|n| n.kind.is_symlink()))
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        let check = check_symlinks.ok_or(Error::MissingSymlinksCheck)?;
        if !check(&symlinks) {
            return Err(Error::UnsafeSymlink(*id));
        }
    }

    debug_assert!(validate_entries(&entries));

    Ok(entries)
}

/// Build a tree object from a listing and write it to the database.
///
/// Every referenced object must be known to the database and agree with
/// its node kind, tree versus non-tree. An empty listing is legal and
/// yields the canonical empty tree.
pub fn create_tree(odb: &Odb, entries: &TreeEntries) -> Result<ObjectId, Error> {
    debug_assert!(validate_entries(entries));

    for (id, nodes) in entries.iter() {
        for node in nodes {
            let (kind, _) = odb.read_header(id).map_err(|e| match e {
                odb::Error::NotFound(_) => Error::MissingEntryObject(node.name.clone(), *id),
                e => Error::Odb(e),
            })?;
            if (kind == ObjectType::Tree) != node.kind.is_tree() {
                return Err(Error::KindMismatch(node.name.clone(), *id));
            }
        }
    }
    let data = serialize(entries)?;

    Ok(odb.write(&data, ObjectType::Tree)?)
}

/// Look up an entry by slash-separated path, one flat tree read per
/// component. Empty components and `.` are skipped; `..` does not
/// resolve. No symlink checks are performed.
pub fn entry_by_path(
    odb: &Odb,
    root: &ObjectId,
    rel_path: &str,
) -> Result<(ObjectId, ObjectKind), Error> {
    let mut id = *root;
    let mut kind = ObjectKind::Tree;

    for comp in rel_path.split('/') {
        if comp.is_empty() || comp == "." {
            continue;
        }
        if comp == ".." {
            return Err(Error::EntryNotFound(BString::from(comp)));
        }
        if !kind.is_tree() {
            return Err(Error::NotATree(id));
        }
        let data = odb.read(&id)?;
        let entries = parse(&data, true)?;
        (id, kind) = entries
            .iter()
            .find_map(|(eid, nodes)| {
                nodes
                    .iter()
                    .find(|n| n.name.as_slice() == comp.as_bytes())
                    .map(|n| (*eid, n.kind))
            })
            .ok_or_else(|| Error::EntryNotFound(BString::from(comp)))?;
    }

    Ok((id, kind))
}

/// Serialise a listing into Git's tree wire format: `mode SP name NUL
/// raw-id` records, sorted the way Git sorts tree entries.
pub fn serialize(entries: &TreeEntries) -> Result<Vec<u8>, Error> {
    let mut flat = Vec::new();
    for (id, nodes) in entries.iter() {
        for node in nodes {
            validate_name(&node.name)?;
            flat.push((node, id));
        }
    }
    flat.sort_by(|(a, _), (b, _)| {
        entry_order(&a.name, a.kind.is_tree(), &b.name, b.kind.is_tree())
    });

    let mut data = Vec::new();
    for (node, id) in flat {
        data.extend_from_slice(node.kind.mode_bytes());
        data.push(b' ');
        data.extend_from_slice(node.name.as_slice());
        data.push(0);
        data.extend_from_slice(id.as_bytes());
    }

    Ok(data)
}

/// Parse serialised tree bytes into a flat listing.
pub fn parse(data: &[u8], ignore_special: bool) -> Result<TreeEntries, Error> {
    let mut entries = TreeEntries::new();
    let mut rest = data;

    while !rest.is_empty() {
        let sp = rest
            .iter()
            .position(|b| *b == b' ')
            .ok_or(Error::Malformed)?;
        let mode = parse_mode(&rest[..sp])?;
        rest = &rest[sp + 1..];

        let nul = rest.iter().position(|b| *b == 0).ok_or(Error::Malformed)?;
        let name = &rest[..nul];
        rest = &rest[nul + 1..];

        if rest.len() < oid::RAW_LEN {
            return Err(Error::Malformed);
        }
        let (raw, tail) = rest.split_at(oid::RAW_LEN);
        rest = tail;
        let id = ObjectId::from_raw(raw)?;

        match ObjectKind::from_tree_mode(mode) {
            // Symlinks count as special entries: when skipping, they do
            // not make it into the listing either.
            Some(kind) if ignore_special && kind.is_symlink() => continue,
            Some(kind) => entries
                .entry(id)
                .or_default()
                .push(TreeNode::new(name, kind)),
            None if ignore_special => continue,
            None => return Err(Error::UnsupportedMode(mode)),
        }
    }

    Ok(entries)
}

/// Whether a symlink target stays within its starting directory when
/// resolved lexically.
pub fn path_is_non_upwards(target: &[u8]) -> bool {
    if target.starts_with(b"/") {
        return false;
    }
    let mut depth = 0i64;
    for comp in target.split(|b| *b == b'/') {
        if comp.is_empty() || comp == b"." {
            continue;
        }
        if comp == b".." {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        } else {
            depth += 1;
        }
    }
    true
}

/// For a given raw id, either all nodes are trees or none of them.
pub(crate) fn validate_entries(entries: &TreeEntries) -> bool {
    entries.values().all(|nodes| {
        nodes.iter().all(|n| n.kind.is_tree()) || !nodes.iter().any(|n| n.kind.is_tree())
    })
}

fn validate_name(name: &BString) -> Result<(), Error> {
    let bytes = name.as_slice();
    if bytes.is_empty()
        || bytes == b"."
        || bytes == b".."
        || bytes.contains(&b'/')
        || bytes.contains(&0)
    {
        return Err(Error::InvalidName(name.clone()));
    }
    Ok(())
}

fn parse_mode(field: &[u8]) -> Result<u32, Error> {
    if field.is_empty() || field.len() > 6 {
        return Err(Error::Malformed);
    }
    let mut mode = 0u32;
    for b in field {
        match b {
            b'0'..=b'7' => mode = mode * 8 + u32::from(b - b'0'),
            _ => return Err(Error::Malformed),
        }
    }
    Ok(mode)
}

/// Git's tree-entry ordering: byte-lexicographic on names, with directory
/// names compared as if they were suffixed by `/`.
fn entry_order(a: &[u8], a_is_tree: bool, b: &[u8], b_is_tree: bool) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {}
        ord => return ord,
    }
    let ca = a
        .get(common)
        .copied()
        .unwrap_or(if a_is_tree { b'/' } else { 0 });
    let cb = b
        .get(common)
        .copied()
        .unwrap_or(if b_is_tree { b'/' } else { 0 });
    ca.cmp(&cb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odb::memory::MemoryBackend;

    const EMPTY_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
    const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    fn id(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    fn memory_odb(entries: &TreeEntries) -> std::sync::Arc<Odb> {
        let odb = Odb::new_in_memory();
        odb.add_backend(Box::new(MemoryBackend::new().with_headers(entries)), 0);
        odb
    }

    #[test]
    fn test_empty_tree_identity() {
        let entries = TreeEntries::new();
        let odb = memory_odb(&entries);
        let tree = create_tree(&odb, &entries).unwrap();

        assert_eq!(tree, id(EMPTY_TREE));
        assert_eq!(odb.read(&tree).unwrap(), b"");
    }

    #[test]
    fn test_single_file_tree_bytes() {
        let blob = id(EMPTY_BLOB);
        let mut entries = TreeEntries::new();
        entries.insert(blob, vec![TreeNode::new("a.txt", ObjectKind::File)]);

        let data = serialize(&entries).unwrap();
        let mut expected = b"100644 a.txt\0".to_vec();
        expected.extend_from_slice(blob.as_bytes());
        assert_eq!(data, expected);

        // Ids computed by `git write-tree` for the same listings.
        let odb = memory_odb(&entries);
        let tree = create_tree(&odb, &entries).unwrap();
        assert_eq!(tree, id("65a457425a679cbe9adf0d2741785d3ceabb44a7"));

        let mut entries = TreeEntries::new();
        entries.insert(blob, vec![TreeNode::new("a", ObjectKind::File)]);
        let tree = create_tree(&memory_odb(&entries), &entries).unwrap();
        assert_eq!(tree, id("496d6428b9cf92981dc9495211e6e1120fb6f2ba"));
    }

    #[test]
    fn test_git_sort_order() {
        // Git sorts directory names as if suffixed by '/': "foo.bar"
        // sorts before the directory "foo".
        let blob = id(EMPTY_BLOB);
        let subtree = id(EMPTY_TREE);
        let mut entries = TreeEntries::new();
        entries.insert(
            blob,
            vec![
                TreeNode::new("foo.bar", ObjectKind::File),
                TreeNode::new("bar", ObjectKind::File),
            ],
        );
        entries.insert(subtree, vec![TreeNode::new("foo", ObjectKind::Tree)]);

        let data = serialize(&entries).unwrap();
        let names = parse_names(&data);
        assert_eq!(names, vec!["bar", "foo.bar", "foo"]);
    }

    fn parse_names(data: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let sp = rest.iter().position(|b| *b == b' ').unwrap();
            rest = &rest[sp + 1..];
            let nul = rest.iter().position(|b| *b == 0).unwrap();
            names.push(String::from_utf8(rest[..nul].to_vec()).unwrap());
            rest = &rest[nul + 1 + oid::RAW_LEN..];
        }
        names
    }

    #[test]
    fn test_parse_roundtrip() {
        let blob = id(EMPTY_BLOB);
        let subtree = id(EMPTY_TREE);
        let mut entries = TreeEntries::new();
        entries.insert(
            blob,
            vec![
                TreeNode::new("a.txt", ObjectKind::File),
                TreeNode::new("run.sh", ObjectKind::Executable),
            ],
        );
        entries.insert(subtree, vec![TreeNode::new("src", ObjectKind::Tree)]);

        let data = serialize(&entries).unwrap();
        let mut parsed = parse(&data, false).unwrap();
        for nodes in parsed.values_mut() {
            nodes.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let mut expected = entries;
        for nodes in expected.values_mut() {
            nodes.sort_by(|a, b| a.name.cmp(&b.name));
        }
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse(b"100644", false), Err(Error::Malformed)));
        assert!(matches!(
            parse(b"100644 a.txt\0shortid", false),
            Err(Error::Malformed)
        ));
        assert!(matches!(
            parse(b"10x644 a.txt\0", false),
            Err(Error::Malformed)
        ));
    }

    #[test]
    fn test_unsupported_mode() {
        // A gitlink (submodule) entry.
        let mut data = b"160000 sub\0".to_vec();
        data.extend_from_slice(id(EMPTY_BLOB).as_bytes());

        assert!(matches!(
            parse(&data, false),
            Err(Error::UnsupportedMode(0o160000))
        ));
        // Allowed, but not stored.
        assert!(parse(&data, true).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let blob = id(EMPTY_BLOB);
        for name in ["", ".", "..", "a/b"] {
            let mut entries = TreeEntries::new();
            entries.insert(blob, vec![TreeNode::new(name, ObjectKind::File)]);
            assert!(
                matches!(serialize(&entries), Err(Error::InvalidName(_))),
                "name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_create_tree_validates_children() {
        let blob = id(EMPTY_BLOB);
        let mut entries = TreeEntries::new();
        entries.insert(blob, vec![TreeNode::new("a.txt", ObjectKind::File)]);

        // The referenced blob is unknown to an empty database.
        let odb = Odb::new_in_memory();
        odb.add_backend(Box::new(MemoryBackend::new()), 0);
        assert!(matches!(
            create_tree(&odb, &entries),
            Err(Error::MissingEntryObject(..))
        ));

        // A listing that disagrees with the database about the kind.
        let mut mislabeled = TreeEntries::new();
        mislabeled.insert(blob, vec![TreeNode::new("a", ObjectKind::Tree)]);
        let odb = memory_odb(&entries);
        assert!(matches!(
            create_tree(&odb, &mislabeled),
            Err(Error::KindMismatch(..))
        ));
    }

    #[test]
    fn test_read_tree_symlink_batch() {
        let target = id("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        let blob = id(EMPTY_BLOB);
        let mut entries = TreeEntries::new();
        entries.insert(target, vec![TreeNode::new("link", ObjectKind::Symlink)]);
        entries.insert(blob, vec![TreeNode::new("a.txt", ObjectKind::File)]);

        let odb = memory_odb(&entries);
        let tree = create_tree(&odb, &entries).unwrap();

        // The checker receives the symlink candidates, deduplicated.
        let seen = std::cell::RefCell::new(Vec::new());
        let ok = |ids: &[ObjectId]| {
            seen.borrow_mut().extend_from_slice(ids);
            true
        };
        let listing = read_tree(&odb, &tree, Some(&ok), false).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(seen.borrow().as_slice(), &[target]);

        // A refusing checker fails the walk.
        let refuse = |_: &[ObjectId]| false;
        assert!(matches!(
            read_tree(&odb, &tree, Some(&refuse), false),
            Err(Error::UnsafeSymlink(_))
        ));

        // Skipping special entries omits the symlink and needs no checker.
        let listing = read_tree(&odb, &tree, None, true).unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing.contains_key(&blob));

        // A missing checker is an error when one is required.
        assert!(matches!(
            read_tree(&odb, &tree, None, false),
            Err(Error::MissingSymlinksCheck)
        ));
    }

    #[test]
    fn test_read_tree_rejects_non_tree() {
        let blob = id(EMPTY_BLOB);
        let mut entries = TreeEntries::new();
        entries.insert(blob, vec![TreeNode::new("a.txt", ObjectKind::File)]);
        let odb = memory_odb(&entries);

        assert!(matches!(
            read_tree(&odb, &blob, None, true),
            Err(Error::NotATree(_))
        ));
    }

    #[test]
    fn test_entry_by_path() {
        let blob = id(EMPTY_BLOB);
        let mut inner = TreeEntries::new();
        inner.insert(blob, vec![TreeNode::new("file", ObjectKind::File)]);

        let odb = memory_odb(&inner);
        let subtree = create_tree(&odb, &inner).unwrap();

        let mut outer = TreeEntries::new();
        outer.insert(subtree, vec![TreeNode::new("dir", ObjectKind::Tree)]);
        let root = create_tree(&odb, &outer).unwrap();

        assert_eq!(
            entry_by_path(&odb, &root, "dir").unwrap(),
            (subtree, ObjectKind::Tree)
        );
        assert_eq!(
            entry_by_path(&odb, &root, "dir/file").unwrap(),
            (blob, ObjectKind::File)
        );
        // Empty components and `.` are skipped.
        assert_eq!(
            entry_by_path(&odb, &root, "./dir//file").unwrap(),
            (blob, ObjectKind::File)
        );
        assert!(matches!(
            entry_by_path(&odb, &root, "missing"),
            Err(Error::EntryNotFound(_))
        ));
        assert!(matches!(
            entry_by_path(&odb, &root, "../escape"),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_non_upwards_paths() {
        assert!(path_is_non_upwards(b"file"));
        assert!(path_is_non_upwards(b"a/b/c"));
        assert!(path_is_non_upwards(b"a/../b"));
        assert!(path_is_non_upwards(b"./a"));
        assert!(!path_is_non_upwards(b".."));
        assert!(!path_is_non_upwards(b"../escape"));
        assert!(!path_is_non_upwards(b"a/../../b"));
        assert!(!path_is_non_upwards(b"/absolute"));
    }
}

//! Object identifiers and object kinds.

use std::fmt;
use std::str::FromStr;

/// Length of a raw object id, in bytes.
pub const RAW_LEN: usize = 20;
/// Length of a hex-encoded object id, in characters.
pub const HEX_LEN: usize = 40;

#[derive(thiserror::Error, Debug)]
pub enum IdError {
    #[error("raw object id must be {RAW_LEN} bytes, got {0}")]
    RawLength(usize),
    #[error("hex object id must be {HEX_LEN} characters, got {0}")]
    HexLength(usize),
    #[error("hex object id contains a non-hex character")]
    HexDigit,
}

/// A Git object id.
///
/// Raw form is exactly 20 bytes; hex form is exactly 40 lowercase hex
/// characters. Conversions between the two are total and bijective.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(git2::Oid);

impl ObjectId {
    /// Parse an id from its 20-byte raw form.
    pub fn from_raw(raw: &[u8]) -> Result<Self, IdError> {
        if raw.len() != RAW_LEN {
            return Err(IdError::RawLength(raw.len()));
        }
        git2::Oid::from_bytes(raw)
            .map(Self)
            .map_err(|_| IdError::RawLength(raw.len()))
    }

    /// Parse an id from its 40-character lowercase hex form.
    pub fn from_hex(hex: &str) -> Result<Self, IdError> {
        if hex.len() != HEX_LEN {
            return Err(IdError::HexLength(hex.len()));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(IdError::HexDigit);
        }
        git2::Oid::from_str(hex).map(Self).map_err(|_| IdError::HexDigit)
    }

    /// The raw 20-byte form.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<git2::Oid> for ObjectId {
    fn from(oid: git2::Oid) -> Self {
        Self(oid)
    }
}

impl From<ObjectId> for git2::Oid {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl From<&ObjectId> for git2::Oid {
    fn from(id: &ObjectId) -> Self {
        id.0
    }
}

/// The kind of object a tree entry references.
///
/// Files, executables and symlinks are all stored as blobs; trees are
/// stored as trees. Anything else (submodules, unreadable entries) is
/// unsupported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    File,
    Executable,
    Symlink,
    Tree,
}

impl ObjectKind {
    /// Map a tree-entry filesystem mode to an object kind.
    pub fn from_tree_mode(mode: u32) -> Option<Self> {
        match mode {
            0o100644 => Some(Self::File),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o040000 => Some(Self::Tree),
            _ => None,
        }
    }

    /// The filesystem mode of this kind, as serialised in tree objects.
    pub fn tree_mode(&self) -> u32 {
        match self {
            Self::File => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Tree => 0o040000,
        }
    }

    /// The mode field exactly as Git spells it on the wire.
    pub(crate) fn mode_bytes(&self) -> &'static [u8] {
        match self {
            Self::File => b"100644",
            Self::Executable => b"100755",
            Self::Symlink => b"120000",
            // Git writes tree modes without the leading zero.
            Self::Tree => b"40000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Executable => write!(f, "executable"),
            Self::Symlink => write!(f, "symlink"),
            Self::Tree => write!(f, "tree"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_raw_roundtrip() {
        let hex = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";
        let id = ObjectId::from_hex(hex).unwrap();

        assert_eq!(id.to_hex(), hex);
        assert_eq!(id.as_bytes().len(), RAW_LEN);
        assert_eq!(ObjectId::from_raw(id.as_bytes()).unwrap(), id);
    }

    #[test]
    fn test_invalid_ids() {
        assert!(matches!(
            ObjectId::from_raw(&[0; 19]),
            Err(IdError::RawLength(19))
        ));
        assert!(matches!(
            ObjectId::from_raw(&[0; 21]),
            Err(IdError::RawLength(21))
        ));
        assert!(matches!(
            ObjectId::from_hex("e69de29"),
            Err(IdError::HexLength(7))
        ));
        // Uppercase is rejected: hex ids are lowercase by contract.
        assert!(matches!(
            ObjectId::from_hex("E69DE29BB2D1D6434B8B29AE775AD8C2E48C5391"),
            Err(IdError::HexDigit)
        ));
        assert!(matches!(
            ObjectId::from_hex("g69de29bb2d1d6434b8b29ae775ad8c2e48c5391"),
            Err(IdError::HexDigit)
        ));
    }

    #[test]
    fn test_mode_mapping() {
        for (mode, kind) in [
            (0o100644, ObjectKind::File),
            (0o100755, ObjectKind::Executable),
            (0o120000, ObjectKind::Symlink),
            (0o040000, ObjectKind::Tree),
        ] {
            assert_eq!(ObjectKind::from_tree_mode(mode), Some(kind));
            assert_eq!(kind.tree_mode(), mode);
        }
        // Submodules and unreadable entries are unsupported.
        assert_eq!(ObjectKind::from_tree_mode(0o160000), None);
        assert_eq!(ObjectKind::from_tree_mode(0o000000), None);
    }

    #[test]
    fn test_predicates() {
        assert!(ObjectKind::Tree.is_tree());
        assert!(!ObjectKind::Symlink.is_tree());
        assert!(ObjectKind::Symlink.is_symlink());
        assert!(!ObjectKind::File.is_symlink());
    }
}

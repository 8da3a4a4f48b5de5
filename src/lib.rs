//! A content-addressed Git object layer for build tooling.
//!
//! The crate provides a single repository handle, [`repo::GitRepo`], with
//! two modes: *real* handles are backed by an on-disk Git repository and
//! can commit, tag and fetch; *fake* handles wrap a bare object database
//! (usually in-memory) and support only object reads, writes and shallow
//! tree synthesis. Both modes produce bit-exact Git object identity, so a
//! tree built in memory hashes to the same id as one written to disk.
#![cfg_attr(not(test), warn(clippy::unwrap_used))]

pub mod odb;
pub mod oid;
pub mod repo;
pub mod tmp;
pub mod tree;

#[cfg(any(test, feature = "test"))]
pub mod test;

pub use odb::Odb;
pub use oid::{ObjectId, ObjectKind};
pub use repo::GitRepo;
pub use tree::{TreeEntries, TreeNode};

pub use git2 as raw;

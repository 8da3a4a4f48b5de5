//! Shared test fixtures.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::odb::Odb;
use crate::oid::ObjectId;
use crate::repo::GitRepo;
use crate::tree;

/// Create a working repository at the given path with a small source
/// layout, ready to be staged and committed.
pub fn repository(path: &Path) -> GitRepo {
    let repo = GitRepo::init_and_open(path, false).expect("repository init");
    let workdir = repo.path().to_path_buf();

    fs::create_dir_all(workdir.join("src")).expect("create src dir");
    fs::write(workdir.join("README"), "Hello World!\n").expect("write README");
    fs::write(workdir.join("src").join("main.rs"), "fn main() {}\n").expect("write main.rs");

    repo
}

/// A symlink checker that reads each target blob from the given database
/// and accepts the batch iff every target is non-upwards. Unreadable
/// targets are rejected.
pub fn non_upwards_checker(odb: Arc<Odb>) -> impl Fn(&[ObjectId]) -> bool {
    move |ids: &[ObjectId]| {
        ids.iter().all(|id| {
            odb.read(id)
                .map(|target| tree::path_is_non_upwards(&target))
                .unwrap_or(false)
        })
    }
}

//! Tagged temporary directories.

use std::io;

use tempfile::TempDir;

/// Create a temporary directory whose name carries the given tag, for
/// recognisability in process listings and crash leftovers. The directory
/// is removed when the handle is dropped, on all exit paths.
pub fn typed_tmp_dir(tag: &str) -> io::Result<TempDir> {
    tempfile::Builder::new()
        .prefix(&format!("{tag}-"))
        .tempdir()
}

//! A backend that forwards received packs into another object database.
//!
//! Installed at maximum priority on a throwaway repository, it makes the
//! packs received by a fetch land in the *target* database instead. Only
//! `write_pack` and `exists` do real work; everything else is unsupported
//! so that lookups for local state never spuriously resolve to target
//! objects.

use std::io;
use std::sync::Arc;

use super::{Backend, Error, Odb};
use crate::oid::ObjectId;

pub struct FetchIntoBackend {
    target: Arc<Odb>,
}

impl FetchIntoBackend {
    pub fn new(target: Arc<Odb>) -> Self {
        Self { target }
    }
}

impl Backend for FetchIntoBackend {
    fn exists(&self, id: &ObjectId) -> bool {
        self.target.exists(id)
    }

    fn write_pack(&self, pack: &mut dyn io::Read) -> Result<(), Error> {
        self.target.write_pack(pack)
    }
}

#[cfg(test)]
mod tests {
    use git2::ObjectType;

    use super::super::memory::MemoryBackend;
    use super::*;

    #[test]
    fn test_only_exists_and_packs_are_forwarded() {
        let target = Odb::new_in_memory();
        target.add_backend(Box::new(MemoryBackend::new()), 0);
        let id = target.write(b"", ObjectType::Tree).unwrap();

        let backend = FetchIntoBackend::new(target.clone());

        assert!(backend.exists(&id));
        // Reads must not resolve to target objects.
        assert!(matches!(backend.read(&id), Err(Error::Unsupported)));
        assert!(matches!(backend.read_header(&id), Err(Error::Unsupported)));
        assert!(matches!(
            backend.write(b"", ObjectType::Tree),
            Err(Error::Unsupported)
        ));
    }
}

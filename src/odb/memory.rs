//! An in-memory object-database backend.
//!
//! This backend exists to support *shallow* tree synthesis: it can store
//! solid tree objects, and it can report headers for blobs referenced by
//! those trees without holding their content. That is enough for tree
//! construction to validate child entries against the database while the
//! actual blob bytes live in a content-addressable store elsewhere.

use std::collections::HashMap;
use std::sync::RwLock;

use git2::ObjectType;

use super::{read, write, Backend, Error};
use crate::oid::ObjectId;
use crate::tree::TreeEntries;

#[derive(Default)]
pub struct MemoryBackend {
    /// Object headers only: the kind reported for ids known from a tree
    /// listing. Sizes are not tracked; headers are consulted to verify
    /// type before a tree walk, never to size buffers.
    headers: RwLock<HashMap<ObjectId, ObjectType>>,
    /// Solid tree objects, stored as their serialised bytes.
    trees: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with a serialised tree under the given id. The id
    /// is trusted; callers that care must verify it matches the bytes.
    pub fn with_tree(self, id: ObjectId, data: Vec<u8>) -> Self {
        write(&self.trees).insert(id, data);
        self
    }

    /// Seed object headers from a tree listing, so that every child the
    /// listing references appears to exist in the database.
    pub fn with_headers(self, entries: &TreeEntries) -> Self {
        {
            let mut headers = write(&self.headers);
            for (id, nodes) in entries.iter() {
                if let Some(first) = nodes.first() {
                    let kind = if first.kind.is_tree() {
                        ObjectType::Tree
                    } else {
                        ObjectType::Blob
                    };
                    headers.insert(*id, kind);
                }
            }
        }
        self
    }
}

impl Backend for MemoryBackend {
    fn read_header(&self, id: &ObjectId) -> Result<(ObjectType, usize), Error> {
        if let Some(data) = read(&self.trees).get(id) {
            return Ok((ObjectType::Tree, data.len()));
        }
        // Pretend the object is in the database; the size is ignored.
        if let Some(kind) = read(&self.headers).get(id) {
            return Ok((*kind, 0));
        }
        Err(Error::NotFound(*id))
    }

    fn read(&self, id: &ObjectId) -> Result<Vec<u8>, Error> {
        // Only trees are materialisable: headers carry no content.
        read(&self.trees)
            .get(id)
            .cloned()
            .ok_or(Error::NotFound(*id))
    }

    fn exists(&self, id: &ObjectId) -> bool {
        read(&self.trees).contains_key(id) || read(&self.headers).contains_key(id)
    }

    fn write(&self, data: &[u8], kind: ObjectType) -> Result<ObjectId, Error> {
        if kind != ObjectType::Tree {
            return Err(Error::InvalidKind(kind));
        }
        let id = ObjectId::from(git2::Oid::hash_object(kind, data)?);
        write(&self.trees)
            .entry(id)
            .or_insert_with(|| data.to_vec());

        Ok(id)
    }
}

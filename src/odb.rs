//! The object database handle.
//!
//! An [`Odb`] owns the object store of one repository. Lookups consult a
//! priority-ordered list of [`Backend`]s — the first backend that answers
//! wins — which is how the in-memory and fetch-into backends plug into the
//! same dispatch as the on-disk store. Reads take the backend table's lock
//! shared; writes and backend registration take it exclusive.

pub mod fetch;
pub mod memory;

use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use git2::ObjectType;

use crate::oid::ObjectId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("object {0} not found in database")]
    NotFound(ObjectId),
    #[error("operation not supported by this backend")]
    Unsupported,
    #[error("refusing to write {0} object")]
    InvalidKind(ObjectType),
    #[error("git: {0}")]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Whether the given error corresponds to a "not found" error from libgit2.
pub(crate) fn is_not_found_err(err: &git2::Error) -> bool {
    err.code() == git2::ErrorCode::NotFound
}

/// A pluggable object-database backend.
///
/// Operations a backend does not implement return [`Error::Unsupported`],
/// which makes the dispatch in [`Odb`] fall through to the next backend;
/// any other error aborts the lookup.
pub trait Backend: Send + Sync {
    fn read_header(&self, id: &ObjectId) -> Result<(ObjectType, usize), Error> {
        let _ = id;
        Err(Error::Unsupported)
    }

    fn read(&self, id: &ObjectId) -> Result<Vec<u8>, Error> {
        let _ = id;
        Err(Error::Unsupported)
    }

    fn exists(&self, id: &ObjectId) -> bool {
        false
    }

    fn write(&self, data: &[u8], kind: ObjectType) -> Result<ObjectId, Error> {
        let _ = (data, kind);
        Err(Error::Unsupported)
    }

    fn write_pack(&self, pack: &mut dyn io::Read) -> Result<(), Error> {
        let _ = pack;
        Err(Error::Unsupported)
    }
}

struct Registered {
    priority: i32,
    backend: Box<dyn Backend>,
}

/// The object database of one repository.
pub struct Odb {
    /// The on-disk repository backing this database, if any. Shared with
    /// the disk backend; `git2::Repository` is not `Sync`, so all libgit2
    /// access serialises through this lock.
    repo: Option<Arc<Mutex<git2::Repository>>>,
    /// Extra backends, ordered by descending priority; ties keep
    /// registration order. The disk backend, when present, sits at
    /// priority zero.
    backends: RwLock<Vec<Registered>>,
    /// The working directory for non-bare repositories, the Git directory
    /// for bare ones, empty for in-memory databases.
    path: PathBuf,
}

impl Odb {
    /// Take ownership of an opened repository and expose its object store.
    pub(crate) fn from_repository(repo: git2::Repository) -> Arc<Self> {
        let path = if repo.is_bare() {
            repo.path().to_path_buf()
        } else {
            repo.workdir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| repo.path().to_path_buf())
        };
        let repo = Arc::new(Mutex::new(repo));
        let disk = Registered {
            priority: 0,
            backend: Box::new(DiskBackend { repo: repo.clone() }),
        };

        Arc::new(Self {
            repo: Some(repo),
            backends: RwLock::new(vec![disk]),
            path,
        })
    }

    /// An empty database with no backends. Callers add an in-memory
    /// backend to make it useful.
    pub fn new_in_memory() -> Arc<Self> {
        Arc::new(Self {
            repo: None,
            backends: RwLock::new(Vec::new()),
            path: PathBuf::new(),
        })
    }

    /// The repository path this database was opened from.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Lock and return the underlying repository, if this database is
    /// backed by one. Holding the guard *is* holding the lock: the
    /// repository cannot be torn down or mutated behind a holder's back.
    pub fn repository(&self) -> Option<RepoGuard<'_>> {
        self.repo.as_ref().map(|repo| RepoGuard { guard: lock(repo) })
    }

    /// Install an extra backend. Higher priority is consulted first; equal
    /// priorities keep registration order. Registration must happen before
    /// the database is shared with concurrent readers.
    pub fn add_backend(&self, backend: Box<dyn Backend>, priority: i32) {
        let mut backends = write(&self.backends);
        let pos = backends
            .iter()
            .position(|r| r.priority < priority)
            .unwrap_or(backends.len());
        backends.insert(pos, Registered { priority, backend });
    }

    /// Read the raw bytes of an object from the first backend that has it.
    pub fn read(&self, id: &ObjectId) -> Result<Vec<u8>, Error> {
        let backends = read(&self.backends);
        for r in backends.iter() {
            match r.backend.read(id) {
                Ok(data) => return Ok(data),
                Err(Error::NotFound(_)) | Err(Error::Unsupported) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(*id))
    }

    /// Read an object's type and size without materialising it.
    pub fn read_header(&self, id: &ObjectId) -> Result<(ObjectType, usize), Error> {
        let backends = read(&self.backends);
        for r in backends.iter() {
            match r.backend.read_header(id) {
                Ok(header) => return Ok(header),
                Err(Error::NotFound(_)) | Err(Error::Unsupported) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::NotFound(*id))
    }

    pub fn exists(&self, id: &ObjectId) -> bool {
        read(&self.backends).iter().any(|r| r.backend.exists(id))
    }

    /// Write an object into the default backend. Only blobs and trees are
    /// stored at this surface.
    pub fn write(&self, data: &[u8], kind: ObjectType) -> Result<ObjectId, Error> {
        if !matches!(kind, ObjectType::Blob | ObjectType::Tree) {
            return Err(Error::InvalidKind(kind));
        }
        let backends = write(&self.backends);
        for r in backends.iter() {
            match r.backend.write(data, kind) {
                Err(Error::Unsupported) => continue,
                result => return result,
            }
        }
        Err(Error::Unsupported)
    }

    /// Feed a packfile to the first backend that accepts packs.
    pub fn write_pack(&self, pack: &mut dyn io::Read) -> Result<(), Error> {
        let backends = write(&self.backends);
        for r in backends.iter() {
            match r.backend.write_pack(pack) {
                Err(Error::Unsupported) => continue,
                result => return result,
            }
        }
        Err(Error::Unsupported)
    }
}

/// The repository of an [`Odb`], held under its lock.
pub struct RepoGuard<'a> {
    guard: MutexGuard<'a, git2::Repository>,
}

impl Deref for RepoGuard<'_> {
    type Target = git2::Repository;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// The on-disk object store, dispatched like any other backend.
struct DiskBackend {
    repo: Arc<Mutex<git2::Repository>>,
}

impl Backend for DiskBackend {
    fn read_header(&self, id: &ObjectId) -> Result<(ObjectType, usize), Error> {
        let repo = lock(&self.repo);
        let odb = repo.odb()?;
        let (len, kind) = odb.read_header(id.into()).map_err(|e| not_found(e, id))?;

        Ok((kind, len))
    }

    fn read(&self, id: &ObjectId) -> Result<Vec<u8>, Error> {
        let repo = lock(&self.repo);
        let odb = repo.odb()?;
        let obj = odb.read(id.into()).map_err(|e| not_found(e, id))?;

        Ok(obj.data().to_vec())
    }

    fn exists(&self, id: &ObjectId) -> bool {
        let repo = lock(&self.repo);
        repo.odb().map(|odb| odb.exists(id.into())).unwrap_or(false)
    }

    fn write(&self, data: &[u8], kind: ObjectType) -> Result<ObjectId, Error> {
        let repo = lock(&self.repo);
        let odb = repo.odb()?;
        let oid = odb.write(kind, data)?;

        Ok(oid.into())
    }

    fn write_pack(&self, pack: &mut dyn io::Read) -> Result<(), Error> {
        let repo = lock(&self.repo);
        let odb = repo.odb()?;
        let mut writer = odb.packwriter()?;
        writer.progress(|p: git2::Progress<'_>| {
            log::debug!(
                target: "odb",
                "indexing pack: {} of {} objects",
                p.indexed_objects(),
                p.total_objects()
            );
            true
        });
        io::copy(pack, &mut writer)?;
        writer.commit()?;

        Ok(())
    }
}

fn not_found(err: git2::Error, id: &ObjectId) -> Error {
    if is_not_found_err(&err) {
        Error::NotFound(*id)
    } else {
        Error::Git(err)
    }
}

fn lock(repo: &Mutex<git2::Repository>) -> MutexGuard<'_, git2::Repository> {
    repo.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

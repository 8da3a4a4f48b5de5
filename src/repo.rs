//! Repository handles and operations.
//!
//! A [`GitRepo`] is either *real* — backed by an on-disk repository, able
//! to commit, tag and fetch — or *fake* — a thin wrapper over an object
//! database, able to read and write objects and synthesise trees, but
//! nothing that needs a working directory or refs. Read-class operations
//! go through the object database and behave identically in both modes.
//!
//! Boundary methods never propagate library errors: failures are logged
//! and surfaced as `None`/`false`, with explicit error values only where
//! callers need to distinguish outcomes.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use git2::{ErrorCode, ObjectType};

use crate::odb::fetch::FetchIntoBackend;
use crate::odb::memory::MemoryBackend;
use crate::odb::{self, Odb, RepoGuard};
use crate::oid::{IdError, ObjectId, ObjectKind};
use crate::tmp;
use crate::tree::{self, SymlinksCheck, TreeEntries};

/// Number of attempts when a ref or index file is held by another process.
pub const GIT_LOCK_NUM_TRIES: usize = 10;
/// Wait between attempts on a held ref or index file.
pub const GIT_LOCK_WAIT_TIME: Duration = Duration::from_millis(100);

/// Repository open and init serialise through this mutex: libgit2's
/// repository discovery is not reentrant.
static REPO_MUTEX: Mutex<()> = Mutex::new(());

const ANON_NAME: &str = "Nobody";
const ANON_EMAIL: &str = "nobody@example.org";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("operation requires a real repository")]
    FakeRepo,
    #[error("operation requires a non-bare repository")]
    BareRepo,
    #[error("lock contention persisted after {GIT_LOCK_NUM_TRIES} attempts")]
    Locked,
    #[error("object {0} is not a commit")]
    NotACommit(ObjectId),
    #[error("malformed commit object {0}")]
    MalformedCommit(ObjectId),
    #[error("failed to initialise temporary repository")]
    TmpRepo,
    #[error("fetch into temporary repository failed")]
    FetchFailed,
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Tree(#[from] tree::Error),
    #[error(transparent)]
    Odb(#[from] odb::Error),
    #[error("git: {0}")]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of a failed subtree lookup from a commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// The commit object is not present; the caller may fetch and retry.
    NotFound,
    /// Anything else; details are in the log.
    Fatal,
}

/// What a path inside a tree resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntryInfo {
    pub id: String,
    pub kind: ObjectKind,
    /// The target bytes, for symlink entries only.
    pub symlink_target: Option<Vec<u8>>,
}

/// A handle to one repository's object layer.
pub struct GitRepo {
    odb: Arc<Odb>,
    fake: bool,
}

impl GitRepo {
    /// Attach a fake handle to an existing object database. The handle
    /// supports object reads, writes and tree synthesis, but no commits,
    /// tags or fetches.
    pub fn open(odb: Arc<Odb>) -> Self {
        Self { odb, fake: true }
    }

    /// Open an existing repository as a real handle.
    pub fn open_path(path: &Path) -> Option<Self> {
        let _guard = repo_lock();
        match Self::open_no_search(path) {
            Ok(repo) => Some(Self::from_git2(repo)),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "opening git repository {} failed with: {e}",
                    path.display()
                );
                None
            }
        }
    }

    /// If the path is already a repository, open it; otherwise initialise
    /// one there, bare or standard. Initialisation races with other
    /// processes are resolved by retrying on lock contention and
    /// re-probing for a concurrent creator each round.
    pub fn init_and_open(path: &Path, bare: bool) -> Option<Self> {
        let _guard = repo_lock();

        // Init may not be needed at all.
        if let Ok(repo) = Self::open_no_search(path) {
            return Some(Self::from_git2(repo));
        }

        let mut last: Option<git2::Error> = None;
        for _ in 0..GIT_LOCK_NUM_TRIES {
            let mut opts = git2::RepositoryInitOptions::new();
            opts.bare(bare);

            match git2::Repository::init_opts(path, &opts) {
                Ok(repo) => {
                    drop(repo);
                    return match Self::open_no_search(path) {
                        Ok(repo) => Some(Self::from_git2(repo)),
                        Err(e) => {
                            log::error!(
                                target: "repo",
                                "opening git repository {} after init failed with: {e}",
                                path.display()
                            );
                            None
                        }
                    };
                }
                Err(e) if e.code() == ErrorCode::Locked => {
                    // Init may have happened in another process meanwhile.
                    if let Ok(repo) = Self::open_no_search(path) {
                        return Some(Self::from_git2(repo));
                    }
                    last = Some(e);
                    thread::sleep(GIT_LOCK_WAIT_TIME);
                }
                Err(e) => {
                    last = Some(e);
                    break;
                }
            }
        }
        log::error!(
            target: "repo",
            "initializing git repository {} failed with: {}",
            path.display(),
            last.map(|e| e.to_string()).unwrap_or_default()
        );
        None
    }

    fn open_no_search(path: &Path) -> Result<git2::Repository, git2::Error> {
        git2::Repository::open_ext(
            path,
            git2::RepositoryOpenFlags::NO_SEARCH,
            &[] as &[&OsStr],
        )
    }

    fn from_git2(repo: git2::Repository) -> Self {
        Self {
            odb: Odb::from_repository(repo),
            fake: false,
        }
    }

    /// Whether this handle is fake, i.e. lacks repository capabilities.
    pub fn is_fake(&self) -> bool {
        self.fake
    }

    /// The object database shared by all handles to this repository.
    pub fn odb(&self) -> &Arc<Odb> {
        &self.odb
    }

    /// The working directory for non-bare repositories, the Git directory
    /// for bare ones.
    pub fn path(&self) -> &Path {
        self.odb.path()
    }

    /// A read-only snapshot of the repository configuration. `None` for
    /// fake handles and on error.
    pub fn config_snapshot(&self) -> Option<git2::Config> {
        let repo = self.odb.repository()?;
        match repo.config().and_then(|mut cfg| cfg.snapshot()) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                log::error!(target: "repo", "retrieving config snapshot failed with: {e}");
                None
            }
        }
    }

    /// Stage every file under the working directory and commit the result
    /// to `HEAD`, with a fixed anonymous author and no parents. Returns
    /// the hex commit id.
    pub fn stage_and_commit_all_anonymous(&self, message: &str) -> Option<String> {
        match self.commit_all(message) {
            Ok(hex) => Some(hex),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "stage and commit all in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                None
            }
        }
    }

    fn commit_all(&self, message: &str) -> Result<String, Error> {
        let repo = self.real()?;
        // git_index_add_bypath does not check this for us.
        if repo.is_bare() {
            return Err(Error::BareRepo);
        }
        let workdir = repo.workdir().ok_or(Error::BareRepo)?.to_path_buf();

        // Forced add-all mismanages ignore rules; stage every path
        // explicitly instead.
        let mut index = repo.index()?;
        stage_all(&mut index, &workdir, &workdir)?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = anonymous_signature()?;
        let message = git2::message_prettify(message, Some(b'#'))?;
        let commit = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[])?;

        Ok(commit.to_string())
    }

    /// Pin a commit or tree with a forced `keep-<hex>` tag. Succeeds if
    /// the tag already exists, however it got there; lock contention with
    /// other processes is retried.
    pub fn keep_tag(&self, target_hex: &str, message: &str) -> bool {
        match self.keep_tag_inner(target_hex, message) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "tag creation for {target_hex} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                false
            }
        }
    }

    fn keep_tag_inner(&self, target_hex: &str, message: &str) -> Result<(), Error> {
        let repo = self.real()?;
        let target = repo.revparse_single(target_hex)?;
        let tagger = anonymous_signature()?;
        let name = format!("keep-{target_hex}");

        // The tag may have been added by another process already.
        if tag_exists(&repo, &name)? {
            return Ok(());
        }

        let mut last = None;
        for _ in 0..GIT_LOCK_NUM_TRIES {
            match repo.tag(&name, &target, &tagger, message, true /* force */) {
                Ok(_) => return Ok(()),
                Err(e) if e.code() == ErrorCode::Locked => {
                    if tag_exists(&repo, &name)? {
                        return Ok(());
                    }
                    last = Some(e);
                    thread::sleep(GIT_LOCK_WAIT_TIME);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last.map(Error::Git).unwrap_or(Error::Locked))
    }

    /// Resolve `HEAD` to a commit id.
    pub fn get_head_commit(&self) -> Option<String> {
        match self.head_commit() {
            Ok(hex) => Some(hex),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "retrieving head commit in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                None
            }
        }
    }

    fn head_commit(&self) -> Result<String, Error> {
        let repo = self.real()?;
        let oid = repo.refname_to_id("HEAD")?;

        Ok(oid.to_string())
    }

    /// Fetch from another on-disk repository through an anonymous remote.
    /// With a branch, only `+refs/tags/<branch>` and `+refs/heads/<branch>`
    /// are requested; otherwise all refs. No local refs are written and
    /// `FETCH_HEAD` is not updated.
    pub fn fetch_from_path(
        &self,
        config: Option<git2::Config>,
        remote_path: &str,
        branch: Option<&str>,
    ) -> bool {
        match self.fetch_inner(config, remote_path, branch) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "fetching {} in local repository {} failed with: {e}",
                    describe_branch(branch),
                    self.odb.path().display()
                );
                false
            }
        }
    }

    fn fetch_inner(
        &self,
        config: Option<git2::Config>,
        remote_path: &str,
        branch: Option<&str>,
    ) -> Result<(), Error> {
        let repo = self.real()?;
        let mut remote = repo.remote_anonymous(remote_path)?;

        // A well-defined configuration for the duration of the fetch: the
        // caller's, or a snapshot of this repository's.
        let _config = match config {
            Some(cfg) => cfg,
            None => repo.config()?.snapshot()?,
        };

        let mut callbacks = git2::RemoteCallbacks::new();
        // Certificate verification is bypassed here; callers requiring TLS
        // trust must arrange it upstream.
        callbacks
            .certificate_check(|_, _| Ok(git2::CertificateCheckStatus::CertificateOk));

        let mut opts = git2::FetchOptions::new();
        opts.proxy_options(git2::ProxyOptions::new());
        opts.update_fetchhead(false);
        opts.remote_callbacks(callbacks);

        // Source-only refspecs: fetch the objects, write no local refs.
        let refspecs = match branch {
            Some(branch) => vec![
                format!("+refs/tags/{branch}"),
                format!("+refs/heads/{branch}"),
            ],
            None => vec![String::from("+refs/*")],
        };
        remote.fetch(&refspecs, Some(&mut opts), None)?;

        Ok(())
    }

    /// The id of `subdir` under the tree of the given commit. Works on
    /// fake handles; [`LookupError::NotFound`] is returned exactly when
    /// the commit object itself is missing.
    pub fn get_subtree_from_commit(
        &self,
        commit_hex: &str,
        subdir: &str,
    ) -> Result<String, LookupError> {
        self.notice_real("Subtree id retrieval from commit");

        let commit = match ObjectId::from_hex(commit_hex) {
            Ok(id) => id,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "commit ID parsing in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                return Err(LookupError::Fatal);
            }
        };
        let tree = match self.commit_tree(&commit) {
            Ok(tree) => tree,
            Err(Error::Odb(odb::Error::NotFound(_))) => {
                log::debug!(target: "repo", "commit {commit} not found");
                return Err(LookupError::NotFound);
            }
            Err(e) => {
                log::error!(
                    target: "repo",
                    "retrieving commit {commit} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                return Err(LookupError::Fatal);
            }
        };
        if subdir == "." {
            return Ok(tree.to_hex());
        }
        match tree::entry_by_path(&self.odb, &tree, subdir) {
            Ok((id, _)) => Ok(id.to_hex()),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "retrieving subtree at {subdir} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                Err(LookupError::Fatal)
            }
        }
    }

    /// Read a commit object and return the id of its tree.
    fn commit_tree(&self, id: &ObjectId) -> Result<ObjectId, Error> {
        let (kind, _) = self.odb.read_header(id)?;
        if kind != ObjectType::Commit {
            return Err(Error::NotACommit(*id));
        }
        let data = self.odb.read(id)?;
        // A commit body starts with `tree <hex>\n`.
        let hex = data
            .strip_prefix(b"tree ")
            .and_then(|rest| rest.get(..crate::oid::HEX_LEN))
            .and_then(|hex| std::str::from_utf8(hex).ok())
            .ok_or(Error::MalformedCommit(*id))?;

        Ok(ObjectId::from_hex(hex)?)
    }

    /// The id of `subdir` inside the given tree; `"."` returns the input
    /// unchanged.
    pub fn get_subtree_from_tree(&self, tree_hex: &str, subdir: &str) -> Option<String> {
        if subdir == "." {
            return Some(tree_hex.to_string());
        }
        self.notice_real("Subtree id retrieval from tree");

        let result = ObjectId::from_hex(tree_hex)
            .map_err(Error::from)
            .and_then(|tree| Ok(tree::entry_by_path(&self.odb, &tree, subdir)?));
        match result {
            Ok((id, _)) => Some(id.to_hex()),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "retrieving subtree at {subdir} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                None
            }
        }
    }

    /// The id of the tree corresponding to `fs_path` under the given head
    /// commit, found by discovering the repository root containing the
    /// path and resolving the relative remainder.
    pub fn get_subtree_from_path(&self, fs_path: &Path, head_commit: &str) -> Option<String> {
        self.notice_real("Subtree id retrieval from path");

        let root = Self::get_repo_root_from_path(fs_path)?;
        if root.as_os_str().is_empty() {
            log::error!(
                target: "repo",
                "no repository root found at {}",
                fs_path.display()
            );
            return None;
        }
        let subdir = match relative_to(fs_path, &root) {
            Some(subdir) => subdir,
            None => {
                log::error!(
                    target: "repo",
                    "cannot compute path of {} relative to {}",
                    fs_path.display(),
                    root.display()
                );
                return None;
            }
        };
        self.get_subtree_from_commit(head_commit, &subdir).ok()
    }

    /// Find the root of the repository containing `fs_path`. Returns an
    /// empty path if no repository is found (non-fatal), `None` on error.
    pub fn get_repo_root_from_path(fs_path: &Path) -> Option<PathBuf> {
        match git2::Repository::discover_path(fs_path, &[] as &[&OsStr]) {
            Ok(found) => {
                // Discovery yields the `.git` directory, or the repository
                // itself when bare; normalise to the root.
                if found.file_name() == Some(OsStr::new(".git")) {
                    if let Some(parent) = found.parent() {
                        return Some(parent.to_path_buf());
                    }
                }
                Some(found)
            }
            Err(e) if odb::is_not_found_err(&e) => Some(PathBuf::new()),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "repository root search failed at path {} with: {e}",
                    fs_path.display()
                );
                None
            }
        }
    }

    pub fn check_commit_exists(&self, commit_hex: &str) -> Option<bool> {
        self.notice_real("Commit lookup");
        self.check_exists(commit_hex, ObjectType::Commit, "commit")
    }

    pub fn check_tree_exists(&self, tree_hex: &str) -> Option<bool> {
        self.notice_real("Tree lookup");
        self.check_exists(tree_hex, ObjectType::Tree, "tree")
    }

    pub fn check_blob_exists(&self, blob_hex: &str) -> Option<bool> {
        self.notice_real("Blob lookup");
        self.check_exists(blob_hex, ObjectType::Blob, "blob")
    }

    /// Three-valued existence check: `Some(true)` present, `Some(false)`
    /// definitely absent, `None` lookup error.
    fn check_exists(&self, hex: &str, kind: ObjectType, what: &str) -> Option<bool> {
        let id = match ObjectId::from_hex(hex) {
            Ok(id) => id,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "{what} ID parsing in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                return None;
            }
        };
        match self.odb.read_header(&id) {
            Ok((found, _)) if found == kind => Some(true),
            Ok((found, _)) => {
                log::error!(
                    target: "repo",
                    "lookup of {what} {hex} in git repository {} failed with: object is a {found}",
                    self.odb.path().display()
                );
                None
            }
            Err(odb::Error::NotFound(_)) => Some(false),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "lookup of {what} {hex} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                None
            }
        }
    }

    /// Read a blob if it exists. The first value reports whether absence
    /// is *known*: `(true, None)` is a clean miss, `(false, None)` is a
    /// failed lookup.
    pub fn try_read_blob(&self, blob_hex: &str) -> (bool, Option<Vec<u8>>) {
        self.notice_real("Blob lookup");

        let id = match ObjectId::from_hex(blob_hex) {
            Ok(id) => id,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "blob ID parsing in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                return (false, None);
            }
        };
        match self.odb.read_header(&id) {
            Err(odb::Error::NotFound(_)) => (true, None),
            Err(e) => {
                log::error!(
                    target: "repo",
                    "blob lookup in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                (false, None)
            }
            Ok((ObjectType::Blob, _)) => match self.odb.read(&id) {
                Ok(data) => (true, Some(data)),
                Err(e) => {
                    log::error!(
                        target: "repo",
                        "failed to read blob {blob_hex} in git repository {} with: {e}",
                        self.odb.path().display()
                    );
                    (false, None)
                }
            },
            Ok((kind, _)) => {
                log::error!(
                    target: "repo",
                    "blob lookup in git repository {} failed with: object is a {kind}",
                    self.odb.path().display()
                );
                (false, None)
            }
        }
    }

    /// Store a blob and return its hex id.
    pub fn write_blob(&self, content: &[u8]) -> Option<String> {
        self.notice_real("Blob writer");

        match self.odb.write(content, ObjectType::Blob) {
            Ok(id) => Some(id.to_hex()),
            Err(e) => {
                log::error!(target: "repo", "writing blob into database failed with: {e}");
                None
            }
        }
    }

    /// Resolve `rel_path` inside the given tree to an entry. For symlink
    /// entries, the target bytes are read and returned as well.
    pub fn get_object_by_path_from_tree(
        &self,
        tree_hex: &str,
        rel_path: &str,
    ) -> Option<TreeEntryInfo> {
        self.notice_real("Entry retrieval from tree");

        match self.object_by_path(tree_hex, rel_path) {
            Ok(info) => Some(info),
            Err(e) => {
                log::debug!(
                    target: "repo",
                    "retrieving entry at {rel_path} in git repository {} failed with: {e}",
                    self.odb.path().display()
                );
                None
            }
        }
    }

    fn object_by_path(&self, tree_hex: &str, rel_path: &str) -> Result<TreeEntryInfo, Error> {
        let root = ObjectId::from_hex(tree_hex)?;
        let (id, kind) = if rel_path == "." {
            (root, ObjectKind::Tree)
        } else {
            tree::entry_by_path(&self.odb, &root, rel_path)?
        };
        let symlink_target = if kind.is_symlink() {
            Some(self.odb.read(&id)?)
        } else {
            None
        };

        Ok(TreeEntryInfo {
            id: id.to_hex(),
            kind,
            symlink_target,
        })
    }

    /// List the immediate entries of a tree. See [`tree::read_tree`].
    pub fn read_tree(
        &self,
        id: &ObjectId,
        check_symlinks: Option<SymlinksCheck>,
        ignore_special: bool,
    ) -> Option<TreeEntries> {
        match tree::read_tree(&self.odb, id, check_symlinks, ignore_special) {
            Ok(entries) => Some(entries),
            Err(e @ tree::Error::UnsafeSymlink(_)) => {
                log::error!(target: "repo", "{e}");
                None
            }
            Err(e) => {
                log::debug!(target: "repo", "failed to read git tree {id}: {e}");
                None
            }
        }
    }

    /// Build a tree from a listing and return its raw id. See
    /// [`tree::create_tree`].
    pub fn create_tree(&self, entries: &TreeEntries) -> Option<ObjectId> {
        match tree::create_tree(&self.odb, entries) {
            Ok(id) => Some(id),
            Err(e) => {
                log::debug!(target: "repo", "failed to create git tree: {e}");
                None
            }
        }
    }

    /// List the entries of a serialised tree that lives nowhere: the bytes
    /// are loaded into a private in-memory database under the given id and
    /// read back through a fake handle. The id is trusted to match the
    /// bytes.
    pub fn read_tree_data(
        data: Vec<u8>,
        id: &ObjectId,
        check_symlinks: Option<SymlinksCheck>,
    ) -> Option<TreeEntries> {
        let odb = Odb::new_in_memory();
        odb.add_backend(Box::new(MemoryBackend::new().with_tree(*id, data)), 0);

        Self::open(odb).read_tree(id, check_symlinks, false)
    }

    /// Build a tree without an object database: children are declared to a
    /// private in-memory database by header only, so the blobs they
    /// reference never need to exist here. Returns the raw id and the
    /// serialised bytes, for the caller to persist.
    pub fn create_shallow_tree(entries: &TreeEntries) -> Option<(ObjectId, Vec<u8>)> {
        let odb = Odb::new_in_memory();
        odb.add_backend(Box::new(MemoryBackend::new().with_headers(entries)), 0);

        let repo = Self::open(odb);
        let id = repo.create_tree(entries)?;
        match repo.odb.read(&id) {
            Ok(data) => Some((id, data)),
            Err(e) => {
                log::error!(target: "repo", "reading back shallow tree {id} failed with: {e}");
                None
            }
        }
    }

    /// Fetch from another on-disk repository into this repository's object
    /// database, without writing any refs: the fetch runs in a throwaway
    /// bare repository whose received packs are forwarded here.
    pub fn local_fetch_via_tmp_repo(&self, repo_path: &str, branch: Option<&str>) -> bool {
        self.notice_real("Branch local fetch");

        match self.local_fetch_inner(repo_path, branch) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    target: "repo",
                    "fetch of {} from local repository {repo_path} via tmp repo failed with: {e}",
                    describe_branch(branch)
                );
                false
            }
        }
    }

    fn local_fetch_inner(&self, repo_path: &str, branch: Option<&str>) -> Result<(), Error> {
        let tmp_dir = tmp::typed_tmp_dir("local_fetch")?;
        // Bare is enough: the refspecs for this fetch are given explicitly.
        let tmp_repo = Self::init_and_open(tmp_dir.path(), true).ok_or(Error::TmpRepo)?;

        // Everything the fetch receives is forwarded into our database.
        tmp_repo
            .odb
            .add_backend(Box::new(FetchIntoBackend::new(self.odb.clone())), i32::MAX);

        let config = self.config_snapshot();
        if !tmp_repo.fetch_from_path(config, repo_path, branch) {
            return Err(Error::FetchFailed);
        }
        tmp_repo.forward_received_packs()
    }

    /// Replay every pack under `objects/pack` through the backend
    /// dispatch, so a fetch-into backend forwards them to its target.
    fn forward_received_packs(&self) -> Result<(), Error> {
        let pack_dir = self.odb.path().join("objects").join("pack");
        if !pack_dir.exists() {
            // An up-to-date fetch receives no pack at all.
            return Ok(());
        }
        for entry in fs::read_dir(pack_dir)? {
            let path = entry?.path();
            if path.extension() == Some(OsStr::new("pack")) {
                let mut file = fs::File::open(&path)?;
                self.odb.write_pack(&mut file)?;
            }
        }
        Ok(())
    }

    /// The repository behind this handle, for operations that need one.
    fn real(&self) -> Result<RepoGuard<'_>, Error> {
        if self.fake {
            return Err(Error::FakeRepo);
        }
        self.odb.repository().ok_or(Error::FakeRepo)
    }

    /// The read-class operations are expected to run against fake
    /// handles; note when they don't.
    fn notice_real(&self, what: &str) {
        if !self.fake {
            log::debug!(target: "repo", "{what} called on a real repository");
        }
    }
}

fn stage_all(index: &mut git2::Index, root: &Path, dir: &Path) -> Result<(), Error> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            stage_all(index, root, &path)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| io::Error::other("path escaped repository root"))?;
            index.add_path(rel)?;
        }
    }
    Ok(())
}

fn tag_exists(repo: &git2::Repository, name: &str) -> Result<bool, Error> {
    let names = repo.tag_names(Some(name))?;

    Ok(names.len() > 0)
}

fn anonymous_signature() -> Result<git2::Signature<'static>, git2::Error> {
    git2::Signature::new(ANON_NAME, ANON_EMAIL, &git2::Time::new(0, 0))
}

fn describe_branch(branch: Option<&str>) -> String {
    branch
        .map(|b| format!("branch {b}"))
        .unwrap_or_else(|| String::from("all refs"))
}

/// The path of `path` relative to `base`, as a slash-separated string;
/// `"."` when they are equal. Both are canonicalised first, so the result
/// is stable under symlinked locations.
fn relative_to(path: &Path, base: &Path) -> Option<String> {
    let path = fs::canonicalize(path).ok()?;
    let base = fs::canonicalize(base).ok()?;
    let rel = path.strip_prefix(&base).ok()?;
    if rel.as_os_str().is_empty() {
        return Some(String::from("."));
    }
    Some(rel.to_str()?.to_string())
}

fn repo_lock() -> MutexGuard<'static, ()> {
    REPO_MUTEX.lock().unwrap_or_else(PoisonError::into_inner)
}

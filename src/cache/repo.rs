//! Repository cache manager
//!
//! `RepoCache` owns the in-memory index of mirrors and the on-disk directories
//! behind it. It resolves misses by cloning, hands out shared read handles and
//! private write workspaces, and refreshes or evicts mirrors on behalf of the
//! sync loop.
//!
//! Locking: the index map sits behind one mutex that is only held for lookups
//! and mutations. Network and copy work for a key happens under that key's own
//! lock, and the index lock is never taken while waiting on a key lock. A
//! key's lock is forgotten again once the key is not cached and no other
//! caller holds it, so failed clones of bogus keys don't accumulate.
//!
//! A `RepoCache` owns its root exclusively: `open` takes the root's
//! [`CacheLock`] and keeps it until the cache is dropped.

use std::collections::HashMap;
use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use dashmap::DashMap;
use log::{debug, error, info, warn};
use thiserror::Error;

use super::git::{FetchOutcome, GitError, Transport};
use super::lock::CacheLock;
use super::mirror::Mirror;
use super::paths::{CachePaths, decode_dir_name};
use super::workspace::{Workspace, sweep_leftovers};
use crate::credentials::{Credential, CredentialError, TokenSource};
use crate::github::WebhookRegistrar;
use crate::types::RepoKey;

/// Mode for directories the cache creates: owner rwx, group r-x, other r--.
const CACHE_DIR_MODE: u32 = 0o754;

/// Default hosting URL clone URLs are derived from.
pub const DEFAULT_GIT_HOST: &str = "https://github.com";

/// Errors returned by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Creating a mirror failed at some step.
    #[error("failed to clone {repo}: {source}")]
    Clone {
        repo: String,
        #[source]
        source: GitError,
    },
    /// No credential could be obtained for the transport.
    #[error("credential unavailable: {0}")]
    Credential(#[from] CredentialError),
    /// Copying a mirror into a workspace failed.
    #[error("failed to copy mirror into {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A workspace copy could not be opened as a repository.
    #[error("failed to open workspace: {0}")]
    Open(#[source] GitError),
    /// An underlying IO operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The repos directory could not be created or listed.
    #[error("cache root {path} unavailable: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Another process owns the cache root.
    #[error("cache root {0} is locked by another process")]
    Locked(PathBuf),
}

/// What a single fetch-refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// No credential, or the key was no longer cached.
    Skipped,
    UpToDate,
    Updated,
    /// The fetch failed and the key was dropped from the index.
    Evicted,
}

struct Webhooks {
    registrar: Arc<dyn WebhookRegistrar>,
    host_url: String,
    secret: String,
}

/// Cache manager for mirrored repositories.
pub struct RepoCache {
    paths: CachePaths,
    git_host: String,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenSource>,
    webhooks: Option<Webhooks>,
    index: Mutex<HashMap<RepoKey, Arc<Mirror>>>,
    key_locks: DashMap<RepoKey, Arc<Mutex<()>>>,
    _root_lock: CacheLock,
}

impl RepoCache {
    /// Open the cache rooted at `paths`.
    ///
    /// Takes the root's lock, rebuilds the index from `repos/` and removes
    /// workspaces left behind by an earlier process. Fails if another cache
    /// holds the root or if the root itself is unusable.
    pub fn open(
        paths: CachePaths,
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, CacheError> {
        let lock_path = paths.lock_path();
        let root_lock = CacheLock::try_acquire(&lock_path)
            .map_err(|source| CacheError::RootUnavailable {
                path: paths.root().to_path_buf(),
                source,
            })?
            .ok_or(CacheError::Locked(lock_path))?;

        let index = recover(&paths.repos_dir())?;

        let workspaces = paths.workspaces_dir();
        create_cache_dir(&workspaces)?;
        let swept = sweep_leftovers(&workspaces)?;
        if swept > 0 {
            info!("Removed {} leftover workspaces", swept);
        }

        info!(
            "Opened cache at {} with {} mirrors",
            paths.root().display(),
            index.len()
        );

        Ok(Self {
            paths,
            git_host: DEFAULT_GIT_HOST.to_string(),
            transport,
            tokens,
            webhooks: None,
            index: Mutex::new(index),
            key_locks: DashMap::new(),
            _root_lock: root_lock,
        })
    }

    /// Clone from `git_host` instead of github.com.
    pub fn with_git_host(mut self, git_host: impl Into<String>) -> Self {
        self.git_host = git_host.into();
        self
    }

    /// Register a push webhook pointing at `host_url` for every newly cloned key.
    pub fn with_webhooks(
        mut self,
        registrar: Arc<dyn WebhookRegistrar>,
        host_url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.webhooks = Some(Webhooks {
            registrar,
            host_url: host_url.into(),
            secret: secret.into(),
        });
        self
    }

    /// Return the cache paths used by this cache manager.
    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// Shared handle on the mirror for `key`, cloning it on a miss.
    ///
    /// The handle is read-only by contract; use [`RepoCache::get_for_write`]
    /// to stage changes.
    pub fn get_for_read(&self, key: &RepoKey) -> Result<Arc<Mirror>, CacheError> {
        if let Some(mirror) = self.lookup(key) {
            return Ok(mirror);
        }

        let key_lock = self.key_lock(key);
        let guard = lock(&key_lock);
        let ensured = self.ensure_mirror(key);
        drop(guard);
        self.forget_key_lock(key, key_lock);

        let (mirror, cloned) = ensured?;
        if cloned {
            self.register_webhook(key);
        }
        Ok(mirror)
    }

    /// Private copy of the mirror for `key`, cloning it on a miss.
    ///
    /// The returned workspace is removed when it is released or dropped.
    pub fn get_for_write(&self, key: &RepoKey) -> Result<Workspace, CacheError> {
        let dir = Workspace::allocate(&self.paths.workspaces_dir())?;

        let key_lock = self.key_lock(key);
        let guard = lock(&key_lock);
        let ensured = self
            .ensure_mirror(key)
            .map(|(mirror, cloned)| (Workspace::populate(dir, mirror.path()), cloned));
        drop(guard);
        self.forget_key_lock(key, key_lock);

        let (workspace, cloned) = ensured?;
        if cloned {
            self.register_webhook(key);
        }
        let workspace = workspace?;
        debug!("Handed out workspace {} for {}", workspace.path().display(), key);
        Ok(workspace)
    }

    /// Fetch new branch heads for `key`, evicting it if the fetch fails.
    pub fn refresh(&self, key: &RepoKey) -> Refresh {
        let credential = match self.tokens.token() {
            Ok(credential) => credential,
            Err(e) => {
                error!("No credential to refresh {}: {}", key, e);
                return Refresh::Skipped;
            }
        };

        let key_lock = self.key_lock(key);
        let guard = lock(&key_lock);
        let outcome = self.refresh_locked(key, &credential);
        drop(guard);
        self.forget_key_lock(key, key_lock);
        outcome
    }

    /// Must be called with the key lock held.
    fn refresh_locked(&self, key: &RepoKey, credential: &Credential) -> Refresh {
        let Some(mirror) = self.lookup(key) else {
            warn!("{} is no longer cached, skipping refresh", key);
            return Refresh::Skipped;
        };

        match self
            .transport
            .fetch_heads(mirror.path(), credential, true)
        {
            Ok(FetchOutcome::UpToDate) => {
                debug!("{} is up to date", key);
                Refresh::UpToDate
            }
            Ok(FetchOutcome::Updated) => {
                info!("Fetched new commits for {}", key);
                Refresh::Updated
            }
            Err(e) => {
                warn!("Fetch of {} failed, evicting: {}", key, e);
                self.evict(key);
                Refresh::Evicted
            }
        }
    }

    /// Drop `key` from the index. The directory stays on disk until the next
    /// clone of the key replaces it.
    pub fn evict(&self, key: &RepoKey) -> Option<Arc<Mirror>> {
        self.index().remove(key)
    }

    pub fn lookup(&self, key: &RepoKey) -> Option<Arc<Mirror>> {
        self.index().get(key).cloned()
    }

    pub fn contains(&self, key: &RepoKey) -> bool {
        self.index().contains_key(key)
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<RepoKey> {
        let mut keys: Vec<_> = self.index().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    fn index(&self) -> MutexGuard<'_, HashMap<RepoKey, Arc<Mirror>>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_lock(&self, key: &RepoKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.key_locks.entry(key.clone()).or_default())
    }

    /// Drop the caller's handle on `key`'s lock, removing the lock entirely
    /// when `key` is not cached and nobody else holds or waits on it.
    fn forget_key_lock(&self, key: &RepoKey, key_lock: Arc<Mutex<()>>) {
        // The map's reference plus ours; handles are only cloned under the
        // shard lock `remove_if` holds, so the count cannot grow meanwhile.
        self.key_locks.remove_if(key, |_, lock| {
            Arc::ptr_eq(lock, &key_lock) && Arc::strong_count(lock) == 2 && !self.contains(key)
        });
    }

    /// Must be called with the key lock held. Returns whether a clone happened.
    fn ensure_mirror(&self, key: &RepoKey) -> Result<(Arc<Mirror>, bool), CacheError> {
        if let Some(mirror) = self.lookup(key) {
            return Ok((mirror, false));
        }
        let mirror = self.clone_mirror(key)?;
        Ok((mirror, true))
    }

    /// (Re)create the mirror directory for `key` and add it to the index.
    fn clone_mirror(&self, key: &RepoKey) -> Result<Arc<Mirror>, CacheError> {
        let dest = self.paths.mirror_dir(key);
        let clone_err = |source: GitError| CacheError::Clone {
            repo: key.to_string(),
            source,
        };

        info!("Cloning {} into {}", key, dest.display());

        match std::fs::remove_dir_all(&dest) {
            Ok(()) => debug!("Removed stale directory {}", dest.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(clone_err(e.into())),
        }
        create_cache_dir(&dest).map_err(|e| clone_err(e.into()))?;

        let credential = self.tokens.token()?;
        let url = key.clone_url(&self.git_host);
        self.transport
            .clone_mirror(&url, &dest, &credential)
            .map_err(clone_err)?;
        self.transport
            .fetch_heads(&dest, &credential, false)
            .map_err(clone_err)?;

        let mirror = Arc::new(Mirror::open(key.clone(), dest).map_err(clone_err)?);
        self.index().insert(key.clone(), Arc::clone(&mirror));
        Ok(mirror)
    }

    fn register_webhook(&self, key: &RepoKey) {
        let Some(hooks) = &self.webhooks else {
            return;
        };

        let registrar = Arc::clone(&hooks.registrar);
        let tokens = Arc::clone(&self.tokens);
        let host_url = hooks.host_url.clone();
        let secret = hooks.secret.clone();
        let key = key.clone();

        let spawned = thread::Builder::new()
            .name(format!("webhook-{}", key))
            .spawn(move || {
                let credential = match tokens.token() {
                    Ok(credential) => credential,
                    Err(e) => {
                        warn!("No credential to register webhook for {}: {}", key, e);
                        return;
                    }
                };
                match registrar.register(&host_url, &credential, &secret, &key.owner, &key.repo) {
                    Ok(()) => info!("Webhook registered for {}", key),
                    Err(e) => warn!("Webhook registration for {} failed: {}", key, e),
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn webhook registration thread: {}", e);
        }
    }
}

fn lock(mutex: &Mutex<()>) -> MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_cache_dir(path: &Path) -> io::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(CACHE_DIR_MODE)
        .create(path)
}

/// Rebuild the index from the mirror directories under `repos_dir`.
///
/// Entries that fail to open or whose names don't decode to a key are logged
/// and skipped.
fn recover(repos_dir: &Path) -> Result<HashMap<RepoKey, Arc<Mirror>>, CacheError> {
    let root_err = |source: io::Error| CacheError::RootUnavailable {
        path: repos_dir.to_path_buf(),
        source,
    };

    create_cache_dir(repos_dir).map_err(root_err)?;

    let mut index = HashMap::new();
    for entry in std::fs::read_dir(repos_dir).map_err(root_err)? {
        let entry = entry.map_err(root_err)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let key = match decode_dir_name(&name.to_string_lossy()) {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping {}: not a repository key ({})", path.display(), e);
                continue;
            }
        };

        match Mirror::open(key.clone(), path.clone()) {
            Ok(mirror) => {
                debug!("Recovered {} from {}", key, path.display());
                index.insert(key, Arc::new(mirror));
            }
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    Ok(index)
}

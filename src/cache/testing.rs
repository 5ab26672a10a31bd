//! Deterministic stand-ins for the network collaborators of the cache.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use git2::{Oid, Repository, Signature};

use super::git::{FetchOutcome, GitError, Transport};
use super::paths::encode_dir_name;
use crate::credentials::{Credential, CredentialError, TokenSource};
use crate::events::EventSink;
use crate::github::{GithubError, WebhookRegistrar};
use crate::types::{Owner, Repo, RepoKey};

/// Initialise a repository at `path` with one commit on `branch`.
pub fn init_repo_with_commit(path: &Path, branch: &str) -> Repository {
    let repo = Repository::init(path).unwrap();
    std::fs::write(path.join("README.md"), "mirror fixture\n").unwrap();
    {
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("gitmirror", "gitmirror@example.com").unwrap();
        let refname = format!("refs/heads/{branch}");
        repo.commit(Some(&refname), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        repo.set_head(&refname).unwrap();
    }
    repo
}

/// Add a commit on top of `branch`, creating the branch from HEAD if needed.
pub fn commit_on(repo: &Repository, branch: &str, message: &str) -> Oid {
    let refname = format!("refs/heads/{branch}");
    let parent = match repo.find_reference(&refname) {
        Ok(reference) => reference.peel_to_commit().unwrap(),
        Err(_) => repo.head().unwrap().peel_to_commit().unwrap(),
    };
    let sig = Signature::now("gitmirror", "gitmirror@example.com").unwrap();
    let tree = parent.tree().unwrap();
    repo.commit(Some(&refname), &sig, &sig, message, &tree, &[&parent])
        .unwrap()
}

/// `file://` URL git accepts for shallow clones of a local repository.
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Transport that fabricates repositories locally and counts calls.
#[derive(Default)]
pub struct FakeTransport {
    pub clones: AtomicUsize,
    pub fetches: AtomicUsize,
    clone_delay: Mutex<Duration>,
    fail_clones: AtomicBool,
    failing_fetches: Mutex<HashSet<String>>,
    updated_fetches: Mutex<HashSet<String>>,
}

impl FakeTransport {
    pub fn with_clone_delay(delay: Duration) -> Self {
        let transport = Self::default();
        *transport.clone_delay.lock().unwrap() = delay;
        transport
    }

    pub fn clone_count(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fail_clones(&self, fail: bool) {
        self.fail_clones.store(fail, Ordering::SeqCst);
    }

    /// Make fetches of `key` fail until [`FakeTransport::heal`] is called.
    pub fn fail_fetches_for(&self, key: &RepoKey) {
        self.failing_fetches
            .lock()
            .unwrap()
            .insert(encode_dir_name(key));
    }

    pub fn heal(&self, key: &RepoKey) {
        self.failing_fetches
            .lock()
            .unwrap()
            .remove(&encode_dir_name(key));
    }

    /// Report new branch heads for fetches of `key`.
    pub fn report_updates_for(&self, key: &RepoKey) {
        self.updated_fetches
            .lock()
            .unwrap()
            .insert(encode_dir_name(key));
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Transport for FakeTransport {
    fn clone_mirror(
        &self,
        _url: &str,
        dest: &Path,
        _credential: &Credential,
    ) -> Result<(), GitError> {
        let delay = *self
            .clone_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        thread::sleep(delay);
        self.clones.fetch_add(1, Ordering::SeqCst);

        if self.fail_clones.load(Ordering::SeqCst) {
            return Err(GitError::CloneError("simulated clone failure".into()));
        }
        init_repo_with_commit(dest, "main");
        Ok(())
    }

    fn fetch_heads(
        &self,
        path: &Path,
        _credential: &Credential,
        _prune: bool,
    ) -> Result<FetchOutcome, GitError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let name = dir_name(path);

        if self.failing_fetches.lock().unwrap().contains(&name) {
            return Err(GitError::FetchError("simulated fetch failure".into()));
        }
        if self.updated_fetches.lock().unwrap().contains(&name) {
            return Ok(FetchOutcome::Updated);
        }
        Ok(FetchOutcome::UpToDate)
    }
}

/// Token source that can be switched into a failing state.
#[derive(Default)]
pub struct FakeTokens {
    fail: AtomicBool,
    pub issued: AtomicUsize,
}

impl FakeTokens {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl TokenSource for FakeTokens {
    fn token(&self) -> Result<Credential, CredentialError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CredentialError::Issuance("simulated issuer outage".into()));
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Credential::new("x-access-token", "ghs_test"))
    }
}

/// Registrar that reports every registration on a channel.
pub struct FakeRegistrar {
    tx: Sender<String>,
    fail: bool,
}

impl FakeRegistrar {
    pub fn new() -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Self { tx, fail: false }, rx)
    }

    pub fn failing() -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Self { tx, fail: true }, rx)
    }
}

impl WebhookRegistrar for FakeRegistrar {
    fn register(
        &self,
        host_url: &str,
        _credential: &Credential,
        _secret: &str,
        owner: &Owner,
        repo: &Repo,
    ) -> Result<(), GithubError> {
        let _ = self.tx.send(format!("{host_url} {owner}/{repo}"));
        if self.fail {
            return Err(GithubError::Http {
                status: 404,
                body: "Not Found".into(),
            });
        }
        Ok(())
    }
}

/// Event sink that forwards payloads on a channel.
pub struct RecordingSink {
    tx: Sender<Vec<u8>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&self, payload: Vec<u8>) {
        let _ = self.tx.send(payload);
    }
}

//! Git transport: CLI for network operations, libgit2 for local reads.
//!
//! **CLI (hardened) for clone and fetch**, which need `--depth` and
//! `--update-head-ok` support:
//! - [`GitCli::clone_mirror`]
//! - [`GitCli::fetch_heads`]
//!
//! **libgit2 for local reads:**
//! - [`open_repository`]
//! - [`branch_heads`]
//! - [`repository_exists`]

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use git2::{Oid, Repository};
use thiserror::Error;

use crate::credentials::Credential;

/// History depth kept for every mirror.
pub const MIRROR_DEPTH: u32 = 100;

/// Maps every remote branch head onto the same local branch.
pub const BRANCH_HEADS_REFSPEC: &str = "+refs/heads/*:refs/heads/*";

const USERNAME_ENV: &str = "GITMIRROR_GIT_USERNAME";
const PASSWORD_ENV: &str = "GITMIRROR_GIT_PASSWORD";

/// Credential helper that answers from the per-command environment, keeping
/// secrets out of argv and out of the repository config.
const ENV_CREDENTIAL_HELPER: &str = "!f() { echo \"username=${GITMIRROR_GIT_USERNAME}\"; echo \"password=${GITMIRROR_GIT_PASSWORD}\"; }; f";

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Fetch failed.
    #[error("fetch failed: {0}")]
    FetchError(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result of refreshing a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Remote branch heads matched the mirror; nothing was written.
    UpToDate,
    /// At least one branch head was created, moved or pruned.
    Updated,
}

/// Network side of the cache: how mirrors are created and refreshed.
pub trait Transport: Send + Sync {
    /// Shallow-clone `url` into the existing, empty directory `dest`.
    fn clone_mirror(&self, url: &str, dest: &Path, credential: &Credential)
    -> Result<(), GitError>;

    /// Fetch every branch head into the mirror at `path`.
    ///
    /// With `prune`, local branches that no longer exist upstream are removed.
    fn fetch_heads(
        &self,
        path: &Path,
        credential: &Credential,
        prune: bool,
    ) -> Result<FetchOutcome, GitError>;
}

/// Git CLI wrapper with security hardening.
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// A hardened command that authenticates with `credential`.
    ///
    /// Any configured helpers are cleared first so only this credential is
    /// offered.
    fn authenticated(&self, credential: &Credential) -> Command {
        let mut cmd = self.command();
        cmd.args(["-c", "credential.helper="]);
        cmd.arg("-c")
            .arg(format!("credential.helper={ENV_CREDENTIAL_HELPER}"));
        cmd.env(USERNAME_ENV, &credential.username);
        cmd.env(PASSWORD_ENV, &credential.secret);
        cmd
    }

    fn fetch_command(&self, path: &Path, credential: &Credential, prune: bool) -> Command {
        let mut cmd = self.authenticated(credential);
        cmd.arg("-C")
            .arg(path)
            .arg("fetch")
            .arg(format!("--depth={MIRROR_DEPTH}"))
            .args(["--no-tags", "--update-head-ok"]);
        if prune {
            cmd.arg("--prune");
        }
        cmd.args(["origin", BRANCH_HEADS_REFSPEC]);
        cmd
    }
}

impl Transport for GitCli {
    fn clone_mirror(
        &self,
        url: &str,
        dest: &Path,
        credential: &Credential,
    ) -> Result<(), GitError> {
        if url.starts_with('-') {
            return Err(GitError::InvalidInput(format!(
                "clone url cannot start with '-': {url}"
            )));
        }

        let output = self
            .authenticated(credential)
            .arg("clone")
            .arg(format!("--depth={MIRROR_DEPTH}"))
            .arg("--no-tags")
            .arg(url)
            .arg(dest)
            .output()?;

        check(output, GitError::CloneError)
    }

    fn fetch_heads(
        &self,
        path: &Path,
        credential: &Credential,
        prune: bool,
    ) -> Result<FetchOutcome, GitError> {
        let before = branch_heads(path)?;

        let output = self.fetch_command(path, credential, prune).output()?;
        check(output, GitError::FetchError)?;

        let after = branch_heads(path)?;
        if before == after {
            Ok(FetchOutcome::UpToDate)
        } else {
            Ok(FetchOutcome::Updated)
        }
    }
}

fn check(output: Output, to_error: fn(String) -> GitError) -> Result<(), GitError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(to_error(stderr.trim().to_string()))
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    Repository::open(path).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    Repository::open(path).is_ok()
}

/// Snapshot of `refs/heads/*` in the repository at `path`.
pub fn branch_heads(path: &Path) -> Result<BTreeMap<String, Oid>, GitError> {
    let repo = open_repository(path)?;
    let mut heads = BTreeMap::new();
    for reference in repo.references_glob("refs/heads/*")? {
        let reference = reference?;
        if let (Some(name), Some(oid)) = (reference.name(), reference.target()) {
            heads.insert(name.to_string(), oid);
        }
    }
    Ok(heads)
}

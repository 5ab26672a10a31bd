//! Shared read handle on a cached mirror.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use git2::{Oid, Repository};

use super::git::{GitError, open_repository};
use crate::types::RepoKey;

/// An open mirror shared by every reader of one key.
///
/// Handed out as `Arc<Mirror>`; readers must not write through it. The
/// background refresh updates the directory in place, so two reads of the same
/// handle may observe different branch heads.
pub struct Mirror {
    key: RepoKey,
    path: PathBuf,
    repo: Mutex<Repository>,
}

impl Mirror {
    /// Open the mirror directory at `path` for `key`.
    pub fn open(key: RepoKey, path: PathBuf) -> Result<Self, GitError> {
        let repo = open_repository(&path)?;
        Ok(Self {
            key,
            path,
            repo: Mutex::new(repo),
        })
    }

    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the underlying libgit2 handle.
    pub fn repository(&self) -> MutexGuard<'_, Repository> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a local branch currently points at.
    pub fn branch_head(&self, branch: &str) -> Result<Oid, GitError> {
        let repo = self.repository();
        let reference = repo.find_reference(&format!("refs/heads/{branch}"))?;
        Ok(reference.peel_to_commit()?.id())
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::init_repo_with_commit;
    use tempfile::tempdir;

    #[test]
    fn open_reads_branch_heads() {
        let dir = tempdir().unwrap();
        let repo = init_repo_with_commit(dir.path(), "main");
        let head = repo.head().unwrap().target().unwrap();

        let mirror = Mirror::open("acme/deploy".parse().unwrap(), dir.path().to_path_buf()).unwrap();
        assert_eq!(mirror.key().to_string(), "acme/deploy");
        assert_eq!(mirror.branch_head("main").unwrap(), head);
        assert!(mirror.branch_head("missing").is_err());
    }

    #[test]
    fn open_rejects_plain_directory() {
        let dir = tempdir().unwrap();
        let result = Mirror::open("acme/deploy".parse().unwrap(), dir.path().to_path_buf());
        assert!(matches!(result, Err(GitError::NotFound(_))));
    }
}

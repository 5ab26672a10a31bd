//! Caller-owned write copies of a mirror.
//!
//! A [`Workspace`] is a full file-tree copy living under
//! `{root}/workspaces/gitops-XXXXXX`. Nothing else in the process knows about
//! it: the owner may commit, rewrite or push from it freely. The directory is
//! removed when the workspace is released or dropped. Directories left behind
//! by a crashed process are removed by [`sweep_leftovers`] at startup.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use git2::Repository;
use log::{debug, warn};
use tempfile::TempDir;

use super::git::open_repository;
use super::repo::CacheError;

/// Name prefix of every workspace directory.
pub const WORKSPACE_PREFIX: &str = "gitops-";

/// An isolated, exclusively owned copy of a mirror.
pub struct Workspace {
    repo: Repository,
    dir: TempDir,
}

impl Workspace {
    /// Allocate an empty workspace directory under `workspaces_dir`.
    pub(crate) fn allocate(workspaces_dir: &Path) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(workspaces_dir)
    }

    /// Copy the mirror at `source` into `dir` and open the copy.
    ///
    /// On failure `dir` is dropped and removed.
    pub(crate) fn populate(dir: TempDir, source: &Path) -> Result<Self, CacheError> {
        copy_tree(source, dir.path()).map_err(|err| CacheError::Copy {
            path: dir.path().to_path_buf(),
            source: err,
        })?;
        let repo = open_repository(dir.path()).map_err(CacheError::Open)?;
        debug!("Populated workspace {}", dir.path().display());
        Ok(Self { repo, dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Independent repository handle on the copy.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Delete the workspace, reporting removal errors.
    pub fn release(self) -> io::Result<()> {
        let Workspace { repo, dir } = self;
        drop(repo);
        dir.close()
    }

    /// Detach the directory from this handle; the caller becomes responsible
    /// for deleting it.
    pub fn keep(self) -> PathBuf {
        let Workspace { repo, dir } = self;
        drop(repo);
        dir.keep()
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.dir.path())
            .finish_non_exhaustive()
    }
}

/// Recursively copy `src` into the existing directory `dst`.
///
/// Symlinks are recreated, not followed.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            symlink(fs::read_link(&from)?, &to)?;
        } else if file_type.is_dir() {
            fs::create_dir(&to)?;
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Remove workspace directories left over from a previous process.
/// Returns the number removed.
pub fn sweep_leftovers(workspaces_dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(workspaces_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(WORKSPACE_PREFIX) {
            continue;
        }

        let path = entry.path();
        match fs::remove_dir_all(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove leftover workspace {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::testing::init_repo_with_commit;
    use tempfile::tempdir;

    fn populated(source: &Path, workspaces: &Path) -> Workspace {
        let dir = Workspace::allocate(workspaces).unwrap();
        Workspace::populate(dir, source).unwrap()
    }

    #[test]
    fn copy_tree_preserves_nested_files_and_links() {
        let src = tempdir().unwrap();
        let dst = tempdir().unwrap();
        fs::create_dir_all(src.path().join("a/b")).unwrap();
        fs::write(src.path().join("a/b/file.txt"), "hello").unwrap();
        symlink("a/b/file.txt", src.path().join("link")).unwrap();

        copy_tree(src.path(), dst.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("a/b/file.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            fs::read_link(dst.path().join("link")).unwrap(),
            PathBuf::from("a/b/file.txt")
        );
    }

    #[test]
    fn workspace_is_an_independent_repository() {
        let source = tempdir().unwrap();
        let workspaces = tempdir().unwrap();
        init_repo_with_commit(source.path(), "main");

        let workspace = populated(source.path(), workspaces.path());
        assert!(
            workspace
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
        );
        assert_eq!(
            workspace.repository().workdir().unwrap().canonicalize().unwrap(),
            workspace.path().canonicalize().unwrap()
        );

        fs::write(workspace.path().join("staged.yaml"), "replicas: 2").unwrap();
        assert!(!source.path().join("staged.yaml").exists());
    }

    #[test]
    fn release_removes_directory() {
        let source = tempdir().unwrap();
        let workspaces = tempdir().unwrap();
        init_repo_with_commit(source.path(), "main");

        let workspace = populated(source.path(), workspaces.path());
        let path = workspace.path().to_path_buf();
        workspace.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_directory_and_keep_detaches() {
        let source = tempdir().unwrap();
        let workspaces = tempdir().unwrap();
        init_repo_with_commit(source.path(), "main");

        let dropped = populated(source.path(), workspaces.path());
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());

        let kept = populated(source.path(), workspaces.path()).keep();
        assert!(kept.join(".git").exists());
        fs::remove_dir_all(kept).unwrap();
    }

    #[test]
    fn populate_from_missing_source_cleans_up() {
        let workspaces = tempdir().unwrap();
        let dir = Workspace::allocate(workspaces.path()).unwrap();
        let path = dir.path().to_path_buf();

        let result = Workspace::populate(dir, &workspaces.path().join("gone"));
        assert!(matches!(result, Err(CacheError::Copy { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn sweep_removes_only_workspaces() {
        let workspaces = tempdir().unwrap();
        fs::create_dir_all(workspaces.path().join("gitops-abc123/.git")).unwrap();
        fs::create_dir(workspaces.path().join("gitops-def456")).unwrap();
        fs::create_dir(workspaces.path().join("unrelated")).unwrap();

        assert_eq!(sweep_leftovers(workspaces.path()).unwrap(), 2);
        assert!(workspaces.path().join("unrelated").exists());
        assert!(!workspaces.path().join("gitops-abc123").exists());
    }

    #[test]
    fn sweep_tolerates_missing_directory() {
        let root = tempdir().unwrap();
        assert_eq!(sweep_leftovers(&root.path().join("workspaces")).unwrap(), 0);
    }
}

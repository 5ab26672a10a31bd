//! Mirror cache: on-disk layout, git transport, index and access paths.

mod git;
mod lock;
mod mirror;
mod paths;
mod repo;
mod workspace;

#[cfg(test)]
pub(crate) mod testing;

pub use git::{
    BRANCH_HEADS_REFSPEC, FetchOutcome, GitCli, GitError, MIRROR_DEPTH, Transport, branch_heads,
    open_repository, repository_exists,
};
pub use lock::CacheLock;
pub use mirror::Mirror;
pub use paths::{CachePaths, DIR_SEPARATOR, decode_dir_name, encode_dir_name};
pub use repo::{CacheError, DEFAULT_GIT_HOST, Refresh, RepoCache};
pub use workspace::{WORKSPACE_PREFIX, Workspace, copy_tree, sweep_leftovers};

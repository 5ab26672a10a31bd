//! Cache directory path management
//!
//! ```text
//! ~/.cache/gitmirror/
//! ├── repos/
//! │   └── <owner>%<repo>/      # Shallow mirror, one per cached key
//! ├── workspaces/
//! │   └── gitops-XXXXXX/       # Caller-owned write copies
//! └── gitmirror.lock           # Held by the owning process
//! ```
//!
//! Mirror directories are flat: the key separator `/` is replaced by `%`,
//! which neither owners nor repo names may contain, so every directory name
//! decodes back to exactly one key.

use std::path::{Path, PathBuf};

use crate::types::{ParseError, RepoKey};

/// Replaces `/` in a repository key on disk.
pub const DIR_SEPARATOR: char = '%';

/// Encode a key as a single directory name.
pub fn encode_dir_name(key: &RepoKey) -> String {
    format!("{}{}{}", key.owner, DIR_SEPARATOR, key.repo)
}

/// Decode a directory name produced by [`encode_dir_name`].
pub fn decode_dir_name(name: &str) -> Result<RepoKey, ParseError> {
    name.replace(DIR_SEPARATOR, "/").parse()
}

/// Manages all filesystem paths for the cache directory layout
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one mirror per cached key: `{root}/repos`
    pub fn repos_dir(&self) -> PathBuf {
        self.root.join("repos")
    }

    /// Directory holding write workspaces: `{root}/workspaces`
    pub fn workspaces_dir(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    /// Mirror directory for a key: `{root}/repos/{owner}%{repo}`
    pub fn mirror_dir(&self, key: &RepoKey) -> PathBuf {
        self.repos_dir().join(encode_dir_name(key))
    }

    /// Process lock: `{root}/gitmirror.lock`
    pub fn lock_path(&self) -> PathBuf {
        self.root.join("gitmirror.lock")
    }
}

impl Default for CachePaths {
    /// `dirs::cache_dir()` + "gitmirror"
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("gitmirror"))
    }
}

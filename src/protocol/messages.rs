use serde::{Deserialize, Serialize};

/// All RPC methods supported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Get daemon status
    Status,

    /// List cached mirrors
    List,

    /// Make sure a repo is cached, cloning it if needed
    Warm { repo: String },

    /// Refresh a repo now and notify subscribers
    Invalidate { repo: String },

    /// Turn the connection into a stream of staleness events
    Subscribe,

    /// Get daemon version
    Version,

    /// Stop the daemon
    Stop,
}

/// Status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub running: bool,
    pub cache_root: String,
    pub repo_count: usize,
    pub uptime_secs: u64,
    pub version: String,
    pub pid: u32,
    #[serde(default)]
    pub subscribers: usize,
}

/// Single cached mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub repo: String,
    pub path: String,
}

/// List response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub repos: Vec<RepoInfo>,
}

/// Warm response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmResult {
    pub repo: String,
    pub path: String,
    /// Commit HEAD resolves to, if it resolves.
    pub head: Option<String>,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResult {
    pub version: String,
    pub pid: u32,
}

/// All possible success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Status(StatusResult),
    List(ListResult),
    Warm(WarmResult),
    Version(VersionResult),
    Ok(()), // unit type serializes as null
}

/// RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    /// The sync loop is no longer accepting work.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(-2, msg)
    }
}

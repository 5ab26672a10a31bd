//! JSON-RPC 2.0 over a Unix socket, one message per line.

mod messages;
mod rpc;

use std::path::PathBuf;

pub use messages::{
    ListResult, RepoInfo, Request, Response, RpcError, StatusResult, VersionResult, WarmResult,
};
pub use rpc::{
    RpcErrorResponse, RpcRequest, RpcResponse, read_message, read_request, read_response,
    write_line, write_message,
};

/// Get the default socket path for the daemon.
///
/// Uses `$XDG_RUNTIME_DIR/gitmirror.sock` on Linux.
/// Falls back to `/tmp/gitmirror-$UID.sock`.
pub fn socket_path() -> PathBuf {
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("gitmirror.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/gitmirror-{}.sock", uid))
}

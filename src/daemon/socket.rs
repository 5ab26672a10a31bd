//! Unix socket server for handling JSON-RPC requests from the CLI.

use std::io::BufReader;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;

use crate::cache::RepoCache;
use crate::daemon::sync::Invalidator;
use crate::events::ClientHub;
use crate::protocol::{
    ListResult, RepoInfo, Request, Response, RpcError, RpcErrorResponse, RpcResponse,
    StatusResult, VersionResult, WarmResult, read_request, write_line, write_message,
};
use crate::types::RepoKey;

/// Context shared by request handlers.
pub struct Context {
    pub cache: Arc<RepoCache>,
    pub invalidator: Invalidator,
    pub hub: Arc<ClientHub>,
    pub stop: Sender<()>,
    pub start_time: Instant,
}

fn parse_repo(repo: &str) -> Result<RepoKey, RpcError> {
    repo.parse()
        .map_err(|e| RpcError::invalid_params(format!("invalid repo: {}", e)))
}

/// Handle a single JSON-RPC request.
fn handle_request(ctx: &Context, request: Request) -> Result<Response, RpcError> {
    match request {
        Request::Status => Ok(Response::Status(StatusResult {
            running: true,
            cache_root: ctx.cache.paths().root().display().to_string(),
            repo_count: ctx.cache.len(),
            uptime_secs: ctx.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            subscribers: ctx.hub.subscriber_count(),
        })),

        Request::List => {
            let repos = ctx
                .cache
                .keys()
                .into_iter()
                .map(|key| RepoInfo {
                    path: ctx.cache.paths().mirror_dir(&key).display().to_string(),
                    repo: key.to_string(),
                })
                .collect();
            Ok(Response::List(ListResult { repos }))
        }

        Request::Warm { repo } => {
            let key = parse_repo(&repo)?;
            let mirror = ctx
                .cache
                .get_for_read(&key)
                .map_err(|e| RpcError::internal(e.to_string()))?;

            let head = mirror
                .repository()
                .head()
                .ok()
                .and_then(|head| head.target())
                .map(|oid| oid.to_string());

            Ok(Response::Warm(WarmResult {
                repo: key.to_string(),
                path: mirror.path().display().to_string(),
                head,
            }))
        }

        Request::Invalidate { repo } => {
            let key = parse_repo(&repo)?;
            ctx.invalidator
                .invalidate(key)
                .map_err(|e| RpcError::unavailable(e.to_string()))?;
            Ok(Response::Ok(()))
        }

        Request::Version => Ok(Response::Version(VersionResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        })),

        Request::Stop => {
            // a stop already pending is as good as this one
            let _ = ctx.stop.try_send(());
            Ok(Response::Ok(()))
        }

        // handled in handle_client, which owns the stream
        Request::Subscribe => Ok(Response::Ok(())),
    }
}

/// Forward hub events to the client until either side goes away.
fn stream_events(events: Receiver<Vec<u8>>, mut writer: &UnixStream) {
    for payload in events.iter() {
        if let Err(e) = write_line(&mut writer, &payload) {
            log::debug!("Subscriber went away: {}", e);
            return;
        }
    }
}

fn respond(writer: &mut &UnixStream, id: Value, result: Result<Response, RpcError>) -> bool {
    let written = match result {
        Ok(result) => write_message(writer, &RpcResponse::new(result, id)),
        Err(error) => write_message(writer, &RpcErrorResponse::new(error, id)),
    };
    match written {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to write response: {}", e);
            false
        }
    }
}

/// Handle a connected client, reading requests and writing responses.
fn handle_client(ctx: &Context, stream: UnixStream) {
    let mut reader = BufReader::new(&stream);
    let mut writer = &stream;

    loop {
        let rpc_req = match read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => break, // Client disconnected
            Err(e) => {
                log::warn!("Failed to read request: {}", e);
                break;
            }
        };

        let id = rpc_req.id.clone();

        // Register before acknowledging so no event slips in between.
        let events = matches!(rpc_req.request, Request::Subscribe).then(|| ctx.hub.subscribe());

        let result = handle_request(ctx, rpc_req.request);
        if !respond(&mut writer, id, result) {
            break;
        }
        if let Some(events) = events {
            log::debug!("Client subscribed to events");
            stream_events(events, &stream);
            break;
        }
    }
}

/// Handle for managing the socket server thread.
pub struct SocketServerHandle {
    path: PathBuf,
    thread: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl SocketServerHandle {
    /// Spawn the socket server thread listening on `path`.
    pub fn spawn(path: &Path, ctx: Context) -> std::io::Result<Self> {
        // Remove stale socket file
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        log::info!("Socket server listening on {}", path.display());

        let ctx = Arc::new(ctx);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let socket_file = path.to_path_buf();

        let thread = thread::Builder::new()
            .name("gitmirror-socket".to_string())
            .spawn(move || {
                for stream in listener.incoming() {
                    if shutdown_clone.load(Ordering::SeqCst) {
                        break;
                    }

                    match stream {
                        Ok(stream) => {
                            let ctx = Arc::clone(&ctx);
                            thread::spawn(move || handle_client(&ctx, stream));
                        }
                        Err(e) => {
                            if shutdown_clone.load(Ordering::SeqCst) {
                                break;
                            }
                            log::warn!("Failed to accept connection: {}", e);
                        }
                    }
                }

                let _ = std::fs::remove_file(&socket_file);
                log::info!("Socket server stopped");
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            thread: Some(thread),
            shutdown,
        })
    }

    /// Signal shutdown and wait for thread to exit.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Connect to the socket to unblock accept()
        let _ = UnixStream::connect(&self.path);

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SocketServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

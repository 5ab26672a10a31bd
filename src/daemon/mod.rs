//! Daemon keeping mirrors fresh and serving the control socket.

pub mod socket;
pub mod sync;

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{bounded, select};
use thiserror::Error;

use crate::cache::{CacheError, GitCli, RepoCache};
use crate::config::Config;
use crate::events::ClientHub;
use crate::github::GithubApi;
use crate::protocol::socket_path;

pub use socket::{Context, SocketServerHandle};
pub use sync::{Invalidator, SYNC_INTERVAL, SyncError, SyncHandle};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("no GitHub token configured (set GITHUB_TOKEN or --github-token)")]
    MissingToken,

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the daemon until Ctrl-C or an RPC `stop`.
pub fn start(config: Config) -> Result<(), DaemonError> {
    if config.github.github_token.as_deref().is_none_or(str::is_empty) {
        return Err(DaemonError::MissingToken);
    }

    // Fails with `CacheError::Locked` if another daemon owns the root.
    let mut cache = RepoCache::open(
        config.cache_paths(),
        Arc::new(GitCli::new()),
        Arc::new(config.github.token_source()),
    )?
    .with_git_host(config.git_host.clone());

    match config.host_url() {
        Some(host_url) => {
            log::info!("Registering webhooks against {}", host_url);
            cache = cache.with_webhooks(
                Arc::new(GithubApi::new(config.github.api_url.clone())),
                host_url,
                config.webhook_secret.clone(),
            );
        }
        None => log::info!("No host URL configured, webhooks disabled"),
    }

    let cache = Arc::new(cache);
    let hub = Arc::new(ClientHub::new());

    let mut sync = SyncHandle::spawn(Arc::clone(&cache), hub.clone(), config.sync_interval())?;

    let (stop_tx, stop_rx) = bounded(1);
    let mut server = SocketServerHandle::spawn(
        &socket_path(),
        Context {
            cache,
            invalidator: sync.invalidator(),
            hub,
            stop: stop_tx,
            start_time: Instant::now(),
        },
    )?;

    let (signal_tx, signal_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = signal_tx.try_send(());
    })?;

    log::info!("Daemon running (pid {})", std::process::id());

    select! {
        recv(signal_rx) -> _ => log::info!("Received interrupt, shutting down"),
        recv(stop_rx) -> _ => log::info!("Stop requested, shutting down"),
    }

    server.shutdown();
    sync.shutdown();

    log::info!("Daemon stopped");
    Ok(())
}

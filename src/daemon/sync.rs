//! Background synchronization loop.
//!
//! One thread walks every cached key, refreshing each in turn, then waits for
//! whichever comes first: shutdown, an invalidation, or the sync interval.
//! Invalidations refresh a single key and are followed by a
//! [`StaleRepoEvent`] broadcast; periodic refreshes are silent.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select};
use thiserror::Error;

use crate::cache::{Refresh, RepoCache};
use crate::events::{EventSink, StaleRepoEvent};
use crate::types::RepoKey;

/// Time between full refresh sweeps.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SyncError {
    /// The loop has exited and no longer accepts invalidations.
    #[error("sync loop has stopped")]
    Stopped,
}

/// Requests an immediate refresh of one key.
///
/// `invalidate` blocks until the loop picks the key up; nothing is buffered.
#[derive(Clone)]
pub struct Invalidator {
    tx: Sender<RepoKey>,
}

impl Invalidator {
    pub fn invalidate(&self, key: RepoKey) -> Result<(), SyncError> {
        self.tx.send(key).map_err(|_| SyncError::Stopped)
    }
}

/// The loop itself; runs on its own thread until shutdown.
pub struct SyncLoop {
    cache: Arc<RepoCache>,
    events: Arc<dyn EventSink>,
    invalidations: Receiver<RepoKey>,
    shutdown: Receiver<()>,
    interval: Duration,
}

impl SyncLoop {
    /// Run the loop (blocks until shutdown).
    pub fn run(self) {
        log::info!("Sync loop started");

        loop {
            self.refresh_all();

            select! {
                recv(self.shutdown) -> _ => {
                    log::info!("Sync loop shutting down");
                    return;
                }
                recv(self.invalidations) -> msg => match msg {
                    Ok(key) => self.refresh_invalidated(&key),
                    Err(_) => {
                        log::info!("All invalidators dropped, sync loop exiting");
                        return;
                    }
                },
                default(self.interval) => {}
            }
        }
    }

    fn refresh_all(&self) {
        let keys = self.cache.keys();
        log::debug!("Refreshing {} mirrors", keys.len());

        for key in keys {
            if self.cache.refresh(&key) == Refresh::Evicted {
                log::info!("{} evicted, will re-clone on next access", key);
            }
        }
    }

    fn refresh_invalidated(&self, key: &RepoKey) {
        log::info!("Invalidation received for {}", key);
        self.cache.refresh(key);

        match StaleRepoEvent::new(key).to_bytes() {
            Ok(payload) => self.events.broadcast(payload),
            Err(e) => log::error!("Failed to serialize staleness event for {}: {}", key, e),
        }
    }
}

/// Handle for managing the sync thread.
pub struct SyncHandle {
    thread: Option<JoinHandle<()>>,
    shutdown: Option<Sender<()>>,
    invalidator: Invalidator,
}

impl SyncHandle {
    /// Spawn the sync thread.
    pub fn spawn(
        cache: Arc<RepoCache>,
        events: Arc<dyn EventSink>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (invalidate_tx, invalidate_rx) = bounded(0);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        let sync = SyncLoop {
            cache,
            events,
            invalidations: invalidate_rx,
            shutdown: shutdown_rx,
            interval,
        };

        let thread = thread::Builder::new()
            .name("gitmirror-sync".to_string())
            .spawn(move || sync.run())?;

        Ok(Self {
            thread: Some(thread),
            shutdown: Some(shutdown_tx),
            invalidator: Invalidator { tx: invalidate_tx },
        })
    }

    pub fn invalidator(&self) -> Invalidator {
        self.invalidator.clone()
    }

    /// Signal shutdown and wait for the in-progress sweep to finish.
    pub fn shutdown(&mut self) {
        // Disconnecting the channel wakes the select.
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

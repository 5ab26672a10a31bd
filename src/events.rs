//! Staleness notifications for connected clients.

use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};

use crate::types::RepoKey;

/// Messages queued per subscriber before new ones are dropped for it.
const SUBSCRIBER_BACKLOG: usize = 64;

/// Receives serialized notifications for every connected client.
pub trait EventSink: Send + Sync {
    fn broadcast(&self, payload: Vec<u8>);
}

/// Tells clients that cached data for `repo` changed and should be reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleRepoEvent {
    pub event: String,
    pub repo: String,
}

impl StaleRepoEvent {
    pub const NAME: &'static str = "staleRepoData";

    pub fn new(key: &RepoKey) -> Self {
        Self {
            event: Self::NAME.to_string(),
            repo: key.to_string(),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Fans payloads out to any number of subscribers.
///
/// Subscribers whose receiver is gone are dropped on the next broadcast. A
/// subscriber that stops draining its channel misses messages rather than
/// stalling everyone else.
#[derive(Default)]
pub struct ClientHub {
    subscribers: Mutex<Vec<Sender<Vec<u8>>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<Vec<u8>> {
        let (tx, rx) = bounded(SUBSCRIBER_BACKLOG);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl EventSink for ClientHub {
    fn broadcast(&self, payload: Vec<u8>) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|tx| match tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Subscriber backlog full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

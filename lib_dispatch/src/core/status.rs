//! # Connection Status
//!
//! Holds the user-visible connection state and fans every transition out to
//! subscribers. Setting the state it already has is not a transition and
//! emits nothing.

use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::utils::lock;

/// User-visible state of the duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel and no attempt in progress.
    Idle,
    /// An open attempt (or its retry backoff) is in progress.
    Connecting,
    /// The channel is open.
    Connected,
    /// The service failed its preflight check.
    Offline,
}

/// Notification pushed to subscribers, serialized as `{"status":"connected"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub status: ConnectionState,
}

const STATUS_BUFFER: usize = 64;

pub struct StatusBroadcaster {
    current: Mutex<ConnectionState>,
    tx: broadcast::Sender<StatusUpdate>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_BUFFER);
        Self {
            current: Mutex::new(ConnectionState::Idle),
            tx,
        }
    }

    /// Moves to `next`. Returns `false` (and notifies nobody) when already there.
    pub fn set(&self, next: ConnectionState) -> bool {
        let mut current = lock(&self.current);
        if *current == next {
            return false;
        }
        log::info!("[ws] Transitioning status: {:?} -> {:?}", *current, next);
        *current = next;
        // No subscribers is fine.
        let _ = self.tx.send(StatusUpdate { status: next });
        true
    }

    pub fn current(&self) -> ConnectionState {
        *lock(&self.current)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

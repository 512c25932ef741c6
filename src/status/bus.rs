//! # Status bus.
//!
//! [`StatusBus`] is a thin wrapper around [`tokio::sync::broadcast`] used by the
//! stream source, the broadcaster lanes and the service to surface what they
//! contain (reconnects, skipped messages, failed deliveries).
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits on receivers.
//! - **Bounded**: receivers that fall behind see `RecvError::Lagged(n)`.
//! - **No persistence**: with no receivers, statuses are dropped.

use tokio::sync::broadcast;

use super::kind::Status;

/// Broadcast channel for relay statuses. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StatusBus {
    tx: broadcast::Sender<Status>,
}

impl StatusBus {
    /// Creates a bus with the given capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Status>(capacity.max(1));
        Self { tx }
    }

    /// Publishes a status to all current receivers.
    pub fn publish(&self, status: Status) {
        let _ = self.tx.send(status);
    }

    /// Creates a receiver for statuses published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Status> {
        self.tx.subscribe()
    }
}

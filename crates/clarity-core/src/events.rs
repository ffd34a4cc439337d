//! Best-effort change notification for observers of the statistics.
//!
//! The bus carries no payload: observers re-query the store when the
//! generation counter moves. Bursts collapse into a single observed change
//! because a `watch` receiver only ever sees the latest value.

use tokio::sync::watch;
use tracing::trace;

/// Event name used by push transports.
pub const STATISTICS_UPDATED: &str = "statistics-updated";

/// Coalescing "statistics changed" notifier.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: watch::Sender<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx }
    }

    /// Signal that persisted statistics may have changed.
    ///
    /// Never fails, whether or not anyone is listening.
    pub fn notify_statistics_changed(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
        trace!(generation = *self.tx.borrow(), "statistics changed");
    }

    /// Subscribe to change notifications.
    ///
    /// The returned receiver starts with the current generation marked as
    /// seen, so only later notifications wake it.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Number of notifications sent since creation.
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

//! # Event bus for broadcasting events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that gives the
//! primitives a non-blocking way to report what happened.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                      Receivers:
//!   runner      ──┐
//!   consumer    ──┤
//!   pool        ──┼──► Bus ──┬──► Flow listener ──► SubscriberSet
//!   stage/fan   ──┤          └──► Bus::subscribe() (user receivers)
//!   timed send  ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits, so it is safe on cancellation paths.
//! - **Bounded capacity**: one ring buffer stores recent events for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if there are no receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; drops it if there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of currently attached receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

//! # Subscriber trait
//!
//! [`Subscribe`] is the extension point for plugging custom event handlers into
//! a [`Flow`](crate::Flow). Each subscriber is driven by a dedicated worker loop
//! fed by a bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching); they do **not** block the
//!   primitives that publish events, nor other subscribers.
//! - Each subscriber **declares** its preferred queue capacity via
//!   [`Subscribe::queue_capacity`]. If its queue overflows, events for that
//!   subscriber are **dropped** and a warning is logged.
//! - Panics inside [`Subscribe::on_event`] are caught and logged; the worker keeps going.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use ctxflow::{Event, EventKind, Subscribe};
//!
//! struct Interruptions;
//!
//! #[async_trait]
//! impl Subscribe for Interruptions {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::PoolInterrupted) {
//!             // bump a counter, page someone, ...
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "interruptions" }
//!     fn queue_capacity(&self) -> usize { 256 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task, in FIFO order. Avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name used in overflow/panic logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue (clamped to at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}

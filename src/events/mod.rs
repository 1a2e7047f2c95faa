//! Events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the runner, consumer, worker pool,
//! pipeline stages and timed sends.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: every operation on [`Flow`](crate::Flow) and the tasks it spawns.
//! - **Consumers**: the listener spawned by
//!   [`FlowBuilder::build`](crate::FlowBuilder::build) (fans out to `SubscriberSet`),
//!   or any receiver obtained from [`Bus::subscribe`].

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

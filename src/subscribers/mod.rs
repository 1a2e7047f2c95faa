//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and (with the `logging` feature) the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Flow op ── publish(Event) ──► Bus ──► Flow listener ──► SubscriberSet::emit(&Event)
//!                                                              │
//!                                               ┌──────────────┼──────────────┐
//!                                               ▼              ▼              ▼
//!                                           LogWriter       Metrics        Custom
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::{SubscriberSet, SubscriberStats};
pub use subscribe::Subscribe;

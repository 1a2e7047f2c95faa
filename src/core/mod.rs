//! Primitives core: the [`Flow`] facade and the operations it runs.
//!
//! The public API from this module is [`Flow`] (with [`FlowBuilder`] and
//! [`Config`]), the [`JobSource`] seam for consumers, the [`Pipeline`]
//! builder with its [`Outlet`] stream endpoint, and [`SafeCounter`].
//!
//! Internal modules:
//! - [`runner`]: runs one unit of work under a derived deadline, abandoning it on expiry;
//! - [`consumer`]: drains a job source until exhaustion, cancellation or handler failure;
//! - [`pool`]: order-preserving batch processing with a bounded worker count;
//! - [`pipeline`]: chained stages and fan-out/fan-in over channels;
//! - [`send`]: channel send raced against a timer and the context;
//! - [`fault`]: converts panics in caller callbacks into `FlowError::Panicked`.

mod builder;
mod config;
mod consumer;
mod counter;
pub(crate) mod fault;
mod flow;
mod pipeline;
mod pool;
mod runner;
mod send;

pub use builder::FlowBuilder;
pub use config::Config;
pub use consumer::{IterSource, JobSource};
pub use counter::SafeCounter;
pub use flow::Flow;
pub use pipeline::{Outlet, Pipeline};
pub use send::MIN_SEND_TIMEOUT;

//! # ctxflow
//!
//! **ctxflow** is a small set of cancellation-aware concurrency primitives
//! built on tokio.
//!
//! Every operation takes an explicit [`Context`]: a cancellation signal with
//! an optional deadline and scoped values, propagated from parent to child.
//! On top of it the crate provides a timeout-bounded runner, a cancellable
//! queue consumer, an order-preserving worker pool, pipeline stages with
//! fan-out/fan-in, and a timed channel send.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Context::background()
//!        │ with_cancel / with_timeout / with_deadline / with_value
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Flow (shared Config + Bus)                                       │
//! │  - run_with_timeout / run   : one unit of work, abandoned on expiry│
//! │  - process_all              : drain a JobSource, fail fast         │
//! │  - process_with_pool        : W workers, results in input order    │
//! │  - stage / pipeline / fan_out: channel stages, counted fan-in      │
//! │  - send_with_timeout / send : send raced with timer and context    │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        │ publish(Event)  (never blocks)
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                       │
//! │                  (capacity: Config::bus_capacity)                 │
//! └─────────────┬─────────────────────────────────────┬───────────────┘
//!               ▼                                     ▼
//!     ┌────────────────────┐                 Flow::subscribe()
//!     │ subscriber_listener│                 (user receivers)
//!     └─────────┬──────────┘
//!               ▼
//!         SubscriberSet (per-subscriber queues)
//!        ┌──────┼──────┐
//!        ▼      ▼      ▼
//!   LogWriter  sub2   subN
//! ```
//!
//! ### Outcomes
//! ```text
//! every operation ──► Ok(value)
//!                 ├─► Err(Cancelled | DeadlineExceeded)      ctx ended (FlowError::is_cancellation)
//!                 ├─► Err(Handler(e) | Panicked)             caller code failed
//!                 └─► Err(InvalidConfiguration | SendTimeout | Closed | NotFound)
//! ```
//! Streams follow the same rule: an [`Outlet`] that was cut short yields its
//! reason once drained, so a truncated stream never looks complete.
//! Nothing is retried; retry policy belongs to the caller.
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                         |
//! |-------------------|----------------------------------------------------------------|--------------------------------------------|
//! | **Context**       | Cancellation, deadlines and scoped values.                     | [`Context`], [`CancelHandle`], [`ContextKey`] |
//! | **Primitives**    | Runner, consumer, pool, pipeline, fan-out, timed send.         | [`Flow`], [`JobSource`], [`Pipeline`]      |
//! | **Subscriber API**| Observe lifecycle events (logging, metrics, custom).           | [`Subscribe`], [`Event`], [`EventKind`]    |
//! | **Errors**        | Typed errors; branch on variant, never on text.                | [`FlowError`], [`ContextError`], [`BatchError`] |
//! | **Configuration** | Channel and bus capacities, default timeouts.                  | [`Config`]                                 |
//! | **Shared state**  | Mutex-protected counter for non-partitionable updates.         | [`SafeCounter`]                            |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (renders events through `tracing`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ctxflow::{Config, Context, Flow, FlowError, IterSource};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), FlowError> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn ctxflow::Subscribe>> = vec![Arc::new(ctxflow::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn ctxflow::Subscribe>> = Vec::new();
//!
//!     let flow = Flow::builder(Config::default()).with_subscribers(subs).build();
//!     let (ctx, release) = Context::background().with_timeout(Duration::from_secs(5));
//!
//!     // Order-preserving pool.
//!     let squares = flow
//!         .process_with_pool(&ctx, vec![1, 2, 3, 4, 5], 2, |x: i64| x * x)
//!         .await?;
//!     assert_eq!(squares, vec![1, 4, 9, 16, 25]);
//!
//!     // Queue consumer that stops on the first handler error.
//!     flow.process_all(&ctx, IterSource::new(squares), |_ctx, sq: i64| async move {
//!         assert!(sq > 0);
//!         Ok::<_, std::io::Error>(())
//!     })
//!     .await?;
//!
//!     release.cancel();
//!     flow.shutdown().await;
//!     Ok(())
//! }
//! ```
mod context;
mod core;
mod error;
mod events;
mod subscribers;

// ---- Public re-exports ----

pub use context::{CancelGuard, CancelHandle, Context, ContextKey};
pub use crate::core::{
    Config, Flow, FlowBuilder, IterSource, JobSource, MIN_SEND_TIMEOUT, Outlet, Pipeline,
    SafeCounter,
};
pub use error::{BatchError, BoxError, ContextError, FlowError};
pub use events::{Bus, Event, EventKind};
pub use subscribers::{Subscribe, SubscriberSet, SubscriberStats};

// Optional: expose the built-in tracing subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;

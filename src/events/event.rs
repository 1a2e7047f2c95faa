//! # Events emitted by the concurrency primitives.
//!
//! The [`EventKind`] enum classifies events across the primitives:
//! - **Runner events**: one bounded run (started, completed, failed, abandoned)
//! - **Consumer events**: why a queue consumer stopped
//! - **Batch events**: worker pool start and terminal state
//! - **Stream events**: pipeline stage and fan-in closure, timed-send expiry
//! - **Fault events**: a caller-supplied callback panicked
//!
//! The [`Event`] struct carries metadata such as timestamps, scope name,
//! reasons, timeouts and counts.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use ctxflow::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RunAbandoned)
//!     .with_scope("run_with_timeout")
//!     .with_reason("deadline_exceeded")
//!     .with_timeout(Duration::from_millis(250));
//!
//! assert_eq!(ev.kind, EventKind::RunAbandoned);
//! assert_eq!(ev.scope.as_deref(), Some("run_with_timeout"));
//! assert_eq!(ev.timeout_ms, Some(250));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Runner events ===
    /// A bounded run started.
    ///
    /// Sets:
    /// - `scope`: operation name
    /// - `timeout_ms`: run timeout (absent when unbounded)
    RunStarted,

    /// The work function finished successfully before the context ended.
    RunCompleted,

    /// The work function returned an error or panicked.
    ///
    /// Sets:
    /// - `reason`: error message
    RunFailed,

    /// The context ended first; the work keeps running detached and its result is discarded.
    ///
    /// Sets:
    /// - `reason`: `cancelled` or `deadline_exceeded`
    /// - `timeout_ms`: run timeout (if any)
    RunAbandoned,

    // === Consumer events ===
    /// The job source was exhausted; the consumer returned cleanly.
    ///
    /// Sets:
    /// - `count`: handled jobs
    ConsumerExhausted,

    /// The consumer observed cancellation and stopped starting new jobs.
    ///
    /// Sets:
    /// - `count`: handled jobs
    /// - `reason`: `cancelled` or `deadline_exceeded`
    ConsumerStopped,

    /// A handler returned an error; remaining jobs are not processed.
    ///
    /// Sets:
    /// - `count`: handled jobs before the failure
    /// - `reason`: error message
    HandlerFailed,

    // === Batch events ===
    /// A worker pool run started.
    ///
    /// Sets:
    /// - `workers`: worker count
    /// - `count`: number of input items
    PoolStarted,

    /// Every item was dispatched and processed.
    ///
    /// Sets:
    /// - `count`: number of results
    PoolDrained,

    /// The pool stopped early (cancellation or a panicking transform).
    ///
    /// Sets:
    /// - `count`: dispatched items
    /// - `reason`: error label
    PoolInterrupted,

    // === Stream events ===
    /// A pipeline stage closed its output.
    ///
    /// Sets:
    /// - `scope`: stage name
    /// - `count`: forwarded items
    StageClosed,

    /// All fan-out workers exited and the shared output was closed.
    ///
    /// Sets:
    /// - `workers`: worker count
    FanInClosed,

    /// A timed send expired before the value was enqueued.
    ///
    /// Sets:
    /// - `timeout_ms`: the clamped timeout
    SendTimedOut,

    // === Fault events ===
    /// A caller-supplied callback panicked; the panic was contained.
    ///
    /// Sets:
    /// - `scope`: component that caught the panic
    /// - `reason`: panic message
    CallbackPanicked,
}

/// Event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Name of the emitting operation or stage.
    pub scope: Option<Arc<str>>,
    /// Human-readable reason (error labels, panic messages, etc.).
    pub reason: Option<Arc<str>>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Worker count.
    pub workers: Option<u32>,
    /// Item/job count.
    pub count: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            scope: None,
            reason: None,
            timeout_ms: None,
            workers: None,
            count: None,
        }
    }

    /// Attaches the emitting scope name.
    #[inline]
    pub fn with_scope(mut self, scope: impl Into<Arc<str>>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a worker count.
    #[inline]
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    /// Attaches an item/job count.
    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    /// Creates a contained-panic event.
    #[inline]
    pub fn callback_panicked(scope: &'static str, message: impl Into<Arc<str>>) -> Self {
        Event::new(EventKind::CallbackPanicked)
            .with_scope(scope)
            .with_reason(message)
    }

    /// True for events that describe a failure or an early stop.
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::RunFailed
                | EventKind::RunAbandoned
                | EventKind::ConsumerStopped
                | EventKind::HandlerFailed
                | EventKind::PoolInterrupted
                | EventKind::SendTimedOut
                | EventKind::CallbackPanicked
        )
    }
}

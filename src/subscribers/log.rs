//! # LogWriter: renders events through `tracing`
//!
//! A minimal subscriber that turns incoming [`Event`]s into `tracing` records.
//! Failures and early stops are logged at `WARN`, the rest at `DEBUG`.
//!
//! ## Example output (with a fmt subscriber installed)
//! ```text
//! DEBUG ctxflow: run started scope="run_with_timeout" timeout_ms=50
//!  WARN ctxflow: run abandoned scope="run_with_timeout" reason="deadline_exceeded"
//! DEBUG ctxflow: pool started workers=4 items=100
//!  WARN ctxflow: pool interrupted dispatched=37 reason="cancelled"
//! DEBUG ctxflow: fan-in closed workers=4
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let scope = e.scope.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::RunStarted => {
                tracing::debug!(target: "ctxflow", seq = e.seq, scope, timeout_ms = ?e.timeout_ms, "run started");
            }
            EventKind::RunCompleted => {
                tracing::debug!(target: "ctxflow", seq = e.seq, scope, "run completed");
            }
            EventKind::RunFailed => {
                tracing::warn!(target: "ctxflow", seq = e.seq, scope, reason, "run failed");
            }
            EventKind::RunAbandoned => {
                tracing::warn!(target: "ctxflow", seq = e.seq, scope, reason, timeout_ms = ?e.timeout_ms, "run abandoned");
            }
            EventKind::ConsumerExhausted => {
                tracing::debug!(target: "ctxflow", seq = e.seq, handled = ?e.count, "consumer exhausted");
            }
            EventKind::ConsumerStopped => {
                tracing::warn!(target: "ctxflow", seq = e.seq, handled = ?e.count, reason, "consumer stopped");
            }
            EventKind::HandlerFailed => {
                tracing::warn!(target: "ctxflow", seq = e.seq, handled = ?e.count, reason, "handler failed");
            }
            EventKind::PoolStarted => {
                tracing::debug!(target: "ctxflow", seq = e.seq, workers = ?e.workers, items = ?e.count, "pool started");
            }
            EventKind::PoolDrained => {
                tracing::debug!(target: "ctxflow", seq = e.seq, results = ?e.count, "pool drained");
            }
            EventKind::PoolInterrupted => {
                tracing::warn!(target: "ctxflow", seq = e.seq, dispatched = ?e.count, reason, "pool interrupted");
            }
            EventKind::StageClosed => {
                tracing::debug!(target: "ctxflow", seq = e.seq, scope, forwarded = ?e.count, "stage closed");
            }
            EventKind::FanInClosed => {
                tracing::debug!(target: "ctxflow", seq = e.seq, workers = ?e.workers, "fan-in closed");
            }
            EventKind::SendTimedOut => {
                tracing::warn!(target: "ctxflow", seq = e.seq, timeout_ms = ?e.timeout_ms, "send timed out");
            }
            EventKind::CallbackPanicked => {
                tracing::error!(target: "ctxflow", seq = e.seq, scope, reason, "callback panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

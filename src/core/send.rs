//! # Send with a deadline.
//!
//! Races three outcomes and returns whichever is observed first:
//! ```text
//! select! (biased) {
//!   ctx.done()          ─► Err(ctx reason)
//!   tx.send(value)      ─► Ok(()) | Err(Closed) when the receiver is gone
//!   sleep(timeout)      ─► SendTimedOut, Err(SendTimeout)
//! }
//! ```
//! A zero timeout is clamped to one nanosecond: the send still gets one
//! attempt, and an immediately available slot wins over the timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

use crate::context::Context;
use crate::error::{ContextError, FlowError};
use crate::events::{Bus, Event, EventKind};

const SCOPE: &str = "send_with_timeout";

/// Smallest timeout a timed send will wait for.
pub const MIN_SEND_TIMEOUT: Duration = Duration::from_nanos(1);

/// Replaces a zero timeout with [`MIN_SEND_TIMEOUT`].
#[inline]
pub(crate) fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.max(MIN_SEND_TIMEOUT)
}

pub(crate) async fn send_with_timeout<T>(
    ctx: &Context,
    tx: &mpsc::Sender<T>,
    value: T,
    timeout: Duration,
    bus: &Bus,
) -> Result<(), FlowError> {
    let timeout = clamp_timeout(timeout);
    if let Some(reason) = ctx.err() {
        return Err(reason.into());
    }

    tokio::select! {
        biased;
        _ = ctx.done() => Err(ctx.err().unwrap_or(ContextError::Cancelled).into()),
        sent = tx.send(value) => sent.map_err(|_| FlowError::Closed),
        _ = time::sleep(timeout) => {
            bus.publish(
                Event::new(EventKind::SendTimedOut)
                    .with_scope(SCOPE)
                    .with_timeout(timeout),
            );
            Err(FlowError::SendTimeout { timeout })
        }
    }
}

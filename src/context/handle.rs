//! Release handles for derived contexts.

use std::sync::Arc;

use crate::error::ContextError;

use super::context::State;

/// Cancels (releases) one derived [`Context`](crate::Context).
///
/// Returned by [`Context::with_cancel`](crate::Context::with_cancel),
/// [`Context::with_timeout`](crate::Context::with_timeout) and
/// [`Context::with_deadline`](crate::Context::with_deadline).
///
/// ### Rules
/// - [`cancel`](Self::cancel) is idempotent; only the first call can set the reason.
/// - Cancelling stops the deadline timer, if any.
/// - Dropping the handle does **not** cancel; use [`drop_guard`](Self::drop_guard)
///   for scope-based release.
#[must_use = "a derived context must be released; call `cancel()` or keep a `drop_guard()`"]
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<State>,
}

impl CancelHandle {
    pub(crate) fn new(state: Arc<State>) -> Self {
        Self { state }
    }

    /// Cancels the context and all of its descendants.
    ///
    /// If the deadline already passed unobserved, the reason recorded is
    /// [`ContextError::DeadlineExceeded`]; otherwise it is [`ContextError::Cancelled`].
    /// No effect if the context is already done.
    pub fn cancel(&self) {
        self.state.fire(ContextError::Cancelled);
    }

    /// Returns true once the context is done (for any reason).
    pub fn is_cancelled(&self) -> bool {
        self.state.is_done()
    }

    /// Converts the handle into a guard that cancels on drop.
    pub fn drop_guard(self) -> CancelGuard {
        CancelGuard {
            handle: self,
            armed: true,
        }
    }
}

/// Cancels its context when dropped.
///
/// Created by [`CancelHandle::drop_guard`].
#[must_use = "dropping the guard immediately cancels the context"]
pub struct CancelGuard {
    handle: CancelHandle,
    armed: bool,
}

impl CancelGuard {
    /// Returns the handle without cancelling.
    pub fn disarm(mut self) -> CancelHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::Context;
    use crate::error::ContextError;

    #[tokio::test]
    async fn test_disarmed_guard_leaves_context_live() {
        let (ctx, cancel) = Context::background().with_cancel();
        let handle = cancel.drop_guard().disarm();
        assert_eq!(ctx.err(), None);

        handle.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }
}

//! # Context: done signal, deadline and scoped values.
//!
//! A [`Context`] is a cheap, cloneable handle over shared cancellation state.
//! Cancellation is built on [`CancellationToken`]: every cancellable child gets
//! `parent.token.child_token()`, so a parent's cancellation reaches all
//! descendants without any extra bookkeeping.
//!
//! ## Reason resolution
//! ```text
//! fire(reason):   token already cancelled? ─► no-op
//!                 deadline already passed? ─► reason = DeadlineExceeded
//!                 reason cell.set(reason)  (first writer wins)
//!                 token.cancel()           (children observe it)
//!
//! err():          token cancelled?   no ─► deadline passed? ─► fire(DeadlineExceeded)
//!                                                        └─► None
//!                 reason cell.get_or_init(inherited)
//!
//! inherited:      ancestor fired at or after this level's deadline ─► DeadlineExceeded
//!                 otherwise                                      ─► ancestor's reason
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{ContextError, FlowError};

use super::handle::CancelHandle;
use super::key::{Binding, ContextKey};

/// Shared cancellation state of one context level.
pub(crate) struct State {
    token: CancellationToken,
    reason: OnceLock<ContextError>,
    /// When this level itself fired (unset when cancelled only through an ancestor).
    fired_at: OnceLock<Instant>,
    /// Effective deadline: never later than the parent's.
    deadline: Option<Instant>,
    parent: Option<Arc<State>>,
}

impl State {
    fn root() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
            fired_at: OnceLock::new(),
            deadline: None,
            parent: None,
        }
    }

    fn child(parent: &Arc<State>, deadline: Option<Instant>) -> Self {
        let deadline = match (parent.deadline, deadline) {
            (Some(p), Some(own)) => Some(p.min(own)),
            (p, own) => p.or(own),
        };
        Self {
            token: parent.token.child_token(),
            reason: OnceLock::new(),
            fired_at: OnceLock::new(),
            deadline,
            parent: Some(Arc::clone(parent)),
        }
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Ends this context with `why`, unless it already ended.
    pub(crate) fn fire(&self, why: ContextError) {
        if self.token.is_cancelled() {
            return;
        }
        let why = if self.deadline_passed() {
            ContextError::DeadlineExceeded
        } else {
            why
        };
        // Reason first, then the signal: observers of the signal always see a reason.
        let _ = self.fired_at.set(Instant::now());
        let _ = self.reason.set(why);
        self.token.cancel();
    }

    pub(crate) fn err(&self) -> Option<ContextError> {
        if !self.token.is_cancelled() {
            if !self.deadline_passed() {
                return None;
            }
            self.fire(ContextError::DeadlineExceeded);
        }
        Some(*self.reason.get_or_init(|| self.inherited()))
    }

    pub(crate) fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves the reason of a level cancelled through an ancestor.
    ///
    /// Whichever came first decides: an own deadline that passed before the
    /// ancestor fired still reports `DeadlineExceeded`, even if the timer had not run yet.
    fn inherited(&self) -> ContextError {
        let upstream = self
            .parent
            .as_ref()
            .and_then(|p| p.err())
            .unwrap_or(ContextError::Cancelled);
        match (self.deadline, self.cancelled_at()) {
            (Some(deadline), Some(at)) if at >= deadline => ContextError::DeadlineExceeded,
            _ => upstream,
        }
    }

    /// Instant at which the nearest firing level (this one or an ancestor) fired.
    fn cancelled_at(&self) -> Option<Instant> {
        match self.fired_at.get() {
            Some(at) => Some(*at),
            None => self.parent.as_ref().and_then(|p| p.cancelled_at()),
        }
    }

    /// Spawns the deadline timer for this level if it owns the effective deadline.
    ///
    /// The timer exits as soon as the token is cancelled, so releasing the
    /// context frees it. It holds only a weak reference to the state.
    fn arm_timer(self: &Arc<Self>) {
        let Some(at) = self.deadline else { return };
        let inherited = self.parent.as_ref().and_then(|p| p.deadline) == Some(at);
        if inherited {
            return;
        }
        if Instant::now() >= at {
            self.fire(ContextError::DeadlineExceeded);
            return;
        }

        let weak = Arc::downgrade(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep_until(at) => {
                    if let Some(state) = weak.upgrade() {
                        state.fire(ContextError::DeadlineExceeded);
                    }
                }
            }
        });
    }
}

/// Propagating cancellation/deadline signal with scoped values.
///
/// Cloning a `Context` is cheap and every clone observes the same done signal.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ctxflow::{Context, ContextError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let root = Context::background();
/// let (ctx, release) = root.with_timeout(Duration::from_millis(10));
///
/// ctx.done().await;
/// assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
///
/// release.cancel(); // still required; harmless after the deadline
/// assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
/// assert_eq!(root.err(), None);
/// # }
/// ```
#[derive(Clone)]
pub struct Context {
    state: Arc<State>,
    values: Option<Arc<Binding>>,
}

impl Context {
    /// Creates a root context: no deadline, no values, never done.
    pub fn background() -> Self {
        Self {
            state: Arc::new(State::root()),
            values: None,
        }
    }

    /// Derives a child that ends when `cancel()` is called on the handle or the parent ends.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        self.derive(None)
    }

    /// Derives a child that additionally ends `timeout` from now.
    ///
    /// A zero timeout yields a context that is already done with
    /// [`ContextError::DeadlineExceeded`].
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime (the deadline timer is a spawned task).
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.derive(Instant::now().checked_add(timeout))
    }

    /// Derives a child that additionally ends at `deadline`.
    ///
    /// The child's effective deadline is the earlier of `deadline` and the parent's.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime (the deadline timer is a spawned task).
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> (Context, CancelHandle) {
        let state = Arc::new(State::child(&self.state, deadline));
        state.arm_timer();
        let ctx = Context {
            state: Arc::clone(&state),
            values: self.values.clone(),
        };
        (ctx, CancelHandle::new(state))
    }

    /// Returns a child carrying `value` under `key`; it shares this context's done signal.
    ///
    /// The new binding shadows any outer binding of the same key.
    pub fn with_value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) -> Context {
        Context {
            state: Arc::clone(&self.state),
            values: Some(Binding::push(self.values.clone(), key, value)),
        }
    }

    /// Looks `key` up, innermost binding first.
    ///
    /// Fails with [`FlowError::NotFound`] if no binding matches.
    pub fn value<T: 'static>(&self, key: &ContextKey<T>) -> Result<&T, FlowError> {
        Binding::find(self.values.as_ref(), key).ok_or(FlowError::NotFound { key: key.name() })
    }

    /// Resolves once the context is done. Any number of tasks may wait on it.
    pub fn done(&self) -> impl Future<Output = ()> + Send + '_ {
        self.state.token.cancelled()
    }

    /// Returns why the context ended, or `None` while it is still live.
    ///
    /// Once `Some`, the value never changes.
    pub fn err(&self) -> Option<ContextError> {
        self.state.err()
    }

    /// Returns true once the context is done.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Cooperative checkpoint: `Err(reason)` once the context is done.
    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns the effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Returns the time left until the deadline (zero once passed), if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.state
            .deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.state.deadline)
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: ContextKey<String> = ContextKey::new("user");
    const ATTEMPT: ContextKey<u32> = ContextKey::new("attempt");

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert_eq!(ctx.err(), None);
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));

        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let (parent, cancel_parent) = Context::background().with_cancel();
        let (child, cancel_child) = parent.with_cancel();
        let (grandchild, _release) = child.with_timeout(Duration::from_secs(60));

        cancel_parent.cancel();
        grandchild.done().await;
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(grandchild.err(), Some(ContextError::Cancelled));

        cancel_child.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_affect_parent() {
        let (parent, _release_parent) = Context::background().with_cancel();
        let (child, cancel_child) = parent.with_cancel();
        cancel_child.cancel();
        assert!(child.is_done());
        assert_eq!(parent.err(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_deadline_exceeded() {
        let (ctx, release) = Context::background().with_timeout(Duration::from_millis(50));
        assert_eq!(ctx.err(), None);
        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));

        release.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_deadline_keeps_cancelled() {
        let (ctx, release) = Context::background().with_timeout(Duration::from_millis(50));
        release.cancel();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_wins_over_longer_child_deadline() {
        let (parent, _p) = Context::background().with_timeout(Duration::from_millis(20));
        let (child, _c) = parent.with_timeout(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        child.done().await;
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(parent.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_does_not_end_parent() {
        let (parent, _p) = Context::background().with_timeout(Duration::from_secs(10));
        let (child, _c) = parent.with_timeout(Duration::from_millis(5));
        child.done().await;
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(parent.err(), None);
    }

    #[tokio::test]
    async fn test_unobserved_deadline_before_parent_cancel_is_deadline_exceeded() {
        let (parent, cancel_parent) = Context::background().with_cancel();
        let (child, _release) = parent.with_timeout(Duration::from_millis(5));

        // Block the only executor thread: the child's timer task cannot run.
        std::thread::sleep(Duration::from_millis(20));
        cancel_parent.cancel();

        assert_eq!(parent.err(), Some(ContextError::Cancelled));
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_before_child_deadline_stays_cancelled() {
        let (parent, cancel_parent) = Context::background().with_cancel();
        let (child, _release) = parent.with_timeout(Duration::from_millis(50));
        cancel_parent.cancel();

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_done_immediately() {
        let (ctx, _release) = Context::background().with_timeout(Duration::ZERO);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_drop_guard_cancels_on_scope_exit() {
        let (ctx, cancel) = Context::background().with_cancel();
        {
            let _guard = cancel.drop_guard();
        }
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_values_shadow_innermost_first() {
        let root = Context::background();
        assert!(matches!(root.value(&USER), Err(FlowError::NotFound { key: "user" })));

        let outer = root.with_value(&USER, "alice".to_string());
        let inner = outer.with_value(&USER, "bob".to_string()).with_value(&ATTEMPT, 3);
        assert_eq!(outer.value(&USER).unwrap(), "alice");
        assert_eq!(inner.value(&USER).unwrap(), "bob");
        assert_eq!(*inner.value(&ATTEMPT).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_values_survive_derivation_and_share_done_signal() {
        let (ctx, cancel) = Context::background()
            .with_value(&USER, "carol".to_string())
            .with_cancel();
        let tagged = ctx.with_value(&ATTEMPT, 1);
        assert_eq!(tagged.value(&USER).unwrap(), "carol");

        cancel.cancel();
        assert_eq!(tagged.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_same_name_different_type_is_not_found() {
        const OTHER: ContextKey<u64> = ContextKey::new("user");
        let ctx = Context::background().with_value(&USER, "dave".to_string());
        assert!(ctx.value(&OTHER).is_err());
    }
}

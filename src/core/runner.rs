//! # Run one unit of work under a derived deadline.
//!
//! ## Flow
//! ```text
//! parent ──► with_timeout(d) ──► (child, release) ──► guard = release.drop_guard()
//!                                     │
//!                     spawn(work(child)) ──► JoinHandle
//!                                     │
//!               select! (biased) ─────┼────────────────────────────┐
//!                 work finished first ▼                            ▼ child.done() first
//!           Ok(v)        → RunCompleted, Ok(v)         RunAbandoned, Err(child.err())
//!           Err(e)       → RunFailed, Err(Handler(e))  (JoinHandle dropped: the work keeps
//!           panic        → RunFailed, Err(Panicked)     running detached, result discarded)
//!                                     │
//!                               guard dropped ──► timer released on every branch
//! ```
//!
//! ## Rules
//! - No preemption: work that ignores its context keeps running after the runner returns.
//!   Work that must stop promptly should `select!` on [`Context::done`].
//! - Releasing the child on return cancels it, so detached work sees `Cancelled`
//!   (or `DeadlineExceeded`) on its next checkpoint.
//! - The runner never retries.

use std::future::Future;
use std::time::Duration;

use crate::context::Context;
use crate::core::fault::join_failure;
use crate::error::{BoxError, ContextError, FlowError};
use crate::events::{Bus, Event, EventKind};

const SCOPE: &str = "run_with_timeout";

/// Runs `work` with a child of `parent` bounded by `timeout` (`None` = only the parent's bounds).
pub(crate) async fn run_with_timeout<T, E, F, Fut>(
    parent: &Context,
    timeout: Option<Duration>,
    work: F,
    bus: &Bus,
) -> Result<T, FlowError>
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let (ctx, release) = match timeout {
        Some(d) => parent.with_timeout(d),
        None => parent.with_cancel(),
    };
    let _release = release.drop_guard();

    let mut started = Event::new(EventKind::RunStarted).with_scope(SCOPE);
    if let Some(d) = timeout {
        started = started.with_timeout(d);
    }
    bus.publish(started);

    let child = ctx.clone();
    let mut handle = tokio::spawn(async move { work(child).await });

    tokio::select! {
        biased;
        joined = &mut handle => {
            let outcome = match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(FlowError::handler(e)),
                Err(e) => Err(join_failure(e)),
            };
            match &outcome {
                Ok(_) => bus.publish(Event::new(EventKind::RunCompleted).with_scope(SCOPE)),
                Err(e) => bus.publish(
                    Event::new(EventKind::RunFailed)
                        .with_scope(SCOPE)
                        .with_reason(e.to_string()),
                ),
            }
            outcome
        }
        _ = ctx.done() => {
            let reason = ctx.err().unwrap_or(ContextError::Cancelled);
            let mut abandoned = Event::new(EventKind::RunAbandoned)
                .with_scope(SCOPE)
                .with_reason(reason.as_label());
            if let Some(d) = timeout {
                abandoned = abandoned.with_timeout(d);
            }
            bus.publish(abandoned);
            Err(reason.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time;

    fn bus() -> Bus {
        Bus::new(16)
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_shorter_than_work_is_deadline_exceeded() {
        let res = run_with_timeout(
            &Context::background(),
            Some(Duration::from_millis(5)),
            |_ctx: Context| async move {
                time::sleep(Duration::from_millis(50)).await;
                Ok::<_, std::io::Error>(())
            },
            &bus(),
        )
        .await;
        assert!(matches!(res, Err(FlowError::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_longer_than_work_returns_its_value() {
        let res = run_with_timeout(
            &Context::background(),
            Some(Duration::from_millis(50)),
            |_ctx: Context| async move {
                time::sleep(Duration::from_millis(10)).await;
                Ok::<_, std::io::Error>(42)
            },
            &bus(),
        )
        .await;
        assert_eq!(res.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_error_is_returned_verbatim() {
        let res: Result<(), _> = run_with_timeout(
            &Context::background(),
            Some(Duration::from_secs(1)),
            |_ctx: Context| async move {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such user"))
            },
            &bus(),
        )
        .await;
        let err = res.unwrap_err();
        let io = err
            .handler_error()
            .and_then(|e| e.downcast_ref::<std::io::Error>())
            .expect("io error");
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inherited_cancellation_returns_cancelled() {
        let (parent, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let res = run_with_timeout(
            &parent,
            Some(Duration::from_secs(1)),
            |_ctx: Context| async move {
                time::sleep(Duration::from_secs(5)).await;
                Ok::<_, std::io::Error>(())
            },
            &bus(),
        )
        .await;
        assert!(matches!(res, Err(FlowError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_work_keeps_running_and_sees_release() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);

        let res = run_with_timeout(
            &Context::background(),
            Some(Duration::from_millis(5)),
            move |ctx: Context| async move {
                // Ignores the context until after its own sleep.
                time::sleep(Duration::from_millis(20)).await;
                flag.store(ctx.is_done(), Ordering::SeqCst);
                Ok::<_, std::io::Error>(())
            },
            &bus(),
        )
        .await;
        assert!(matches!(res, Err(FlowError::DeadlineExceeded)));
        assert!(!observed.load(Ordering::SeqCst));

        time::sleep(Duration::from_millis(50)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_work_is_contained() {
        let res: Result<(), _> = run_with_timeout(
            &Context::background(),
            None,
            |_ctx: Context| async move {
                if true {
                    panic!("work bug");
                }
                Ok::<_, std::io::Error>(())
            },
            &bus(),
        )
        .await;
        assert!(matches!(res, Err(FlowError::Panicked { ref message }) if message == "work bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_describe_abandoned_run() {
        let bus = bus();
        let mut rx = bus.subscribe();
        let _ = run_with_timeout(
            &Context::background(),
            Some(Duration::from_millis(1)),
            |_ctx: Context| async move {
                time::sleep(Duration::from_secs(5)).await;
                Ok::<_, std::io::Error>(())
            },
            &bus,
        )
        .await;
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::RunStarted);
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::RunAbandoned);
        assert_eq!(ev.reason.as_deref(), Some("deadline_exceeded"));
    }
}

//! # Cancellable queue consumer.
//!
//! Drains a [`JobSource`], invoking a handler per job, until the source is
//! exhausted, the context ends, or the handler fails.
//!
//! ## Loop
//! ```text
//! loop {
//!   ├─► ctx done?                 ─► ConsumerStopped, Err(ctx reason)
//!   ├─► select! (biased) { ctx.done() ─► ConsumerStopped, Err(ctx reason)
//!   │                      source.next_job() }
//!   │       ├─ None, cut short    ─► ConsumerStopped, Err(close reason)
//!   │       └─ None               ─► ConsumerExhausted, Ok(())
//!   ├─► ctx done? (job and cancel observable together: cancel wins, job dropped)
//!   └─► handler(ctx, job).await   (never interrupted once started)
//!           ├─ Ok      ─► continue
//!           ├─ Err(e)  ─► HandlerFailed, Err(Handler(e))
//!           └─ panic   ─► CallbackPanicked, Err(Panicked)
//! }
//! ```

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::context::Context;
use crate::core::fault::contain;
use crate::error::{BoxError, FlowError};
use crate::events::{Bus, Event, EventKind};

const SCOPE: &str = "process_all";

/// # Source of jobs for [`Flow::process_all`](crate::Flow::process_all).
///
/// `None` means the source is exhausted and no further jobs will arrive.
///
/// Implemented for tokio `mpsc` receivers, for [`Outlet`](crate::Outlet)s
/// and, through [`IterSource`], for any iterator.
#[async_trait]
pub trait JobSource<T: Send>: Send {
    /// Waits for the next job.
    async fn next_job(&mut self) -> Option<T>;

    /// Why the source ended, if it was cut short rather than exhausted.
    ///
    /// Asked once, after [`next_job`](Self::next_job) returned `None`.
    fn close_reason(&mut self) -> Option<FlowError> {
        None
    }
}

#[async_trait]
impl<T: Send> JobSource<T> for mpsc::Receiver<T> {
    async fn next_job(&mut self) -> Option<T> {
        self.recv().await
    }
}

#[async_trait]
impl<T: Send> JobSource<T> for mpsc::UnboundedReceiver<T> {
    async fn next_job(&mut self) -> Option<T> {
        self.recv().await
    }
}

/// Adapts an iterator into a [`JobSource`].
///
/// # Example
/// ```
/// use ctxflow::{Config, Context, Flow, IterSource};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flow = Flow::new(Config::default());
/// let res = flow
///     .process_all(&Context::background(), IterSource::new(1..=3), |_ctx, job: u32| async move {
///         assert!(job <= 3);
///         Ok::<_, std::io::Error>(())
///     })
///     .await;
/// assert!(res.is_ok());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    iter: I,
}

impl<I> IterSource<I> {
    /// Wraps anything iterable.
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: iter.into_iter(),
        }
    }
}

#[async_trait]
impl<I> JobSource<I::Item> for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    async fn next_job(&mut self) -> Option<I::Item> {
        self.iter.next()
    }
}

/// Drains `source` through `handler` under `ctx`.
pub(crate) async fn process_all<T, S, H, Fut, E>(
    ctx: &Context,
    mut source: S,
    handler: H,
    bus: &Bus,
) -> Result<(), FlowError>
where
    T: Send,
    S: JobSource<T>,
    H: Fn(Context, T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    let mut handled: u64 = 0;

    loop {
        if let Some(reason) = ctx.err() {
            return Err(stopped(bus, handled, reason.into()));
        }

        let job = tokio::select! {
            biased;
            _ = ctx.done() => None,
            job = source.next_job() => match job {
                Some(job) => Some(job),
                None => {
                    if let Some(reason) = source.close_reason() {
                        return Err(stopped(bus, handled, reason));
                    }
                    bus.publish(
                        Event::new(EventKind::ConsumerExhausted)
                            .with_scope(SCOPE)
                            .with_count(handled),
                    );
                    return Ok(());
                }
            },
        };
        let Some(job) = job else { continue };

        if let Some(reason) = ctx.err() {
            return Err(stopped(bus, handled, reason.into()));
        }

        match contain(async { handler(ctx.clone(), job).await }).await {
            Ok(Ok(())) => handled += 1,
            Ok(Err(e)) => {
                let err = FlowError::handler(e);
                bus.publish(
                    Event::new(EventKind::HandlerFailed)
                        .with_scope(SCOPE)
                        .with_count(handled)
                        .with_reason(err.to_string()),
                );
                return Err(err);
            }
            Err(panicked) => {
                bus.publish(Event::callback_panicked(SCOPE, panicked.to_string()));
                return Err(panicked);
            }
        }
    }
}

fn stopped(bus: &Bus, handled: u64, err: FlowError) -> FlowError {
    bus.publish(
        Event::new(EventKind::ConsumerStopped)
            .with_scope(SCOPE)
            .with_count(handled)
            .with_reason(err.as_label()),
    );
    err
}

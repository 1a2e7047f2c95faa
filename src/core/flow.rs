//! # Flow: entry point for the concurrency primitives.
//!
//! A [`Flow`] owns the [`Config`], the event [`Bus`] and (optionally) a
//! [`SubscriberSet`]. Every primitive is a method on it, so they all share
//! one configuration and report to one bus.
//!
//! ## Architecture
//! ```text
//! Flow::builder(cfg).with_subscribers(subs).build()
//!     │
//!     ├── bus: Bus ◄──── publish(Event) ──── run / process_all / pool / stage / fan_out / send
//!     │     │
//!     │     └──► listener task ──► SubscriberSet::emit(&Event) ──► subscriber workers
//!     │
//!     └── shutdown token: stops the listener on `shutdown()` or drop
//! ```
//!
//! ## Rules
//! - Every operation takes the governing [`Context`] explicitly; a `Flow`
//!   holds no cancellation state of its own.
//! - Without subscribers no listener is spawned; the bus is still available
//!   through [`Flow::subscribe`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::{BatchError, BoxError, FlowError};
use crate::events::{Bus, Event};
use crate::subscribers::{SubscriberSet, SubscriberStats};

use super::builder::FlowBuilder;
use super::config::Config;
use super::consumer::{self, JobSource};
use super::pipeline::{self, Outlet, Pipeline};
use super::{pool, runner, send};

/// # Shared configuration and event bus for the primitives.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use ctxflow::{Config, Context, Flow, FlowError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flow = Flow::new(Config::default());
/// let ctx = Context::background();
///
/// let squares = flow
///     .process_with_pool(&ctx, vec![1, 2, 3, 4, 5], 2, |x: i64| x * x)
///     .await
///     .unwrap();
/// assert_eq!(squares, vec![1, 4, 9, 16, 25]);
///
/// let res = flow
///     .run_with_timeout(&ctx, Duration::from_millis(5), |ctx: Context| async move {
///         ctx.done().await;
///         Ok::<(), std::io::Error>(())
///     })
///     .await;
/// assert!(matches!(res, Err(FlowError::DeadlineExceeded)));
/// # }
/// ```
pub struct Flow {
    cfg: Config,
    bus: Bus,
    subs: Option<Arc<SubscriberSet>>,
    listener: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Flow {
    /// Creates a flow without subscribers.
    pub fn new(cfg: Config) -> Self {
        Self::builder(cfg).build()
    }

    /// Returns a builder for attaching subscribers.
    pub fn builder(cfg: Config) -> FlowBuilder {
        FlowBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: Config, bus: Bus, subs: Option<SubscriberSet>) -> Self {
        let shutdown = CancellationToken::new();
        let subs = subs.filter(|s| !s.is_empty()).map(Arc::new);
        let listener = subs
            .as_ref()
            .map(|set| Self::subscriber_listener(&bus, Arc::clone(set), shutdown.clone()));
        Self {
            cfg,
            bus,
            subs,
            listener,
            shutdown,
        }
    }

    /// Forwards bus events to the subscriber set until shut down.
    ///
    /// On shutdown, events already queued on the bus are still delivered.
    fn subscriber_listener(
        bus: &Bus,
        set: Arc<SubscriberSet>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
        })
    }

    /// The configuration this flow was built with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The event bus every primitive publishes to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Receives events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Delivery counters per subscriber; empty without subscribers.
    pub fn subscriber_stats(&self) -> Vec<SubscriberStats> {
        self.subs.as_ref().map_or_else(Vec::new, |set| set.stats())
    }

    /// Stops the listener, then waits until every subscriber has processed its queue.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(listener) = self.listener.take() {
            let _ = listener.await;
        }
        if let Some(subs) = self.subs.take() {
            match Arc::try_unwrap(subs) {
                Ok(set) => {
                    set.shutdown().await;
                }
                Err(_) => tracing::warn!("subscriber set still shared at shutdown"),
            }
        }
    }

    /// Runs `work` under a child of `ctx` that expires after `timeout`.
    ///
    /// Returns the work's own result if it finishes first, otherwise the child's
    /// reason (`DeadlineExceeded`, or `Cancelled` inherited from `ctx`). Work that
    /// loses the race keeps running detached; it should watch its context.
    pub async fn run_with_timeout<T, E, F, Fut>(
        &self,
        ctx: &Context,
        timeout: Duration,
        work: F,
    ) -> Result<T, FlowError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        runner::run_with_timeout(ctx, Some(timeout), work, &self.bus).await
    }

    /// Like [`run_with_timeout`](Self::run_with_timeout) with the configured default timeout.
    ///
    /// With `Config::timeout == 0s` the work is bounded by `ctx` alone.
    pub async fn run<T, E, F, Fut>(&self, ctx: &Context, work: F) -> Result<T, FlowError>
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        runner::run_with_timeout(ctx, self.cfg.default_timeout(), work, &self.bus).await
    }

    /// Handles every job from `source` until it is exhausted, `ctx` ends, or a handler fails.
    ///
    /// A handler that has started always runs to completion; cancellation is
    /// observed before each job.
    pub async fn process_all<T, S, H, Fut, E>(
        &self,
        ctx: &Context,
        source: S,
        handler: H,
    ) -> Result<(), FlowError>
    where
        T: Send,
        S: JobSource<T>,
        H: Fn(Context, T) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Into<BoxError>,
    {
        consumer::process_all(ctx, source, handler, &self.bus).await
    }

    /// Applies `transform` to every input with at most `workers` concurrent workers.
    ///
    /// Results are in input order. On cancellation or a panicking transform the
    /// error carries the partial results; unprocessed slots hold `U::default()`.
    pub async fn process_with_pool<I, T, U, F>(
        &self,
        ctx: &Context,
        inputs: I,
        workers: usize,
        transform: F,
    ) -> Result<Vec<U>, BatchError<U>>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
        T: Send + 'static,
        U: Default + Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        pool::process_with_pool(
            ctx,
            inputs,
            workers,
            transform,
            self.cfg.channel_capacity_clamped(),
            &self.bus,
        )
        .await
    }

    /// Spawns a producer that sends `items` in order and then closes its channel.
    ///
    /// If `ctx` ends first the outlet reports the context's reason.
    pub fn source<T, I>(&self, ctx: &Context, items: I) -> Outlet<T>
    where
        T: Send + 'static,
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        pipeline::source(ctx, items, self.cfg.channel_capacity_clamped())
    }

    /// Spawns one stage that writes `f(v)` for every `v` read from `input`.
    ///
    /// The output closes once, after the input is exhausted, `ctx` ends or `f`
    /// panics. The last two are reported through the returned [`Outlet`].
    pub fn stage<T, U, F>(&self, ctx: &Context, input: impl Into<Outlet<T>>, f: F) -> Outlet<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        pipeline::stage(
            ctx,
            input.into(),
            f,
            Arc::from("stage"),
            self.cfg.channel_capacity_clamped(),
            &self.bus,
        )
    }

    /// Starts a [`Pipeline`] reading from `input`.
    pub fn pipeline<T: Send + 'static>(&self, ctx: &Context, input: impl Into<Outlet<T>>) -> Pipeline<T> {
        Pipeline::new(ctx, input.into(), self.cfg.channel_capacity_clamped(), &self.bus)
    }

    /// Distributes `input` across `workers` tasks and merges `f(v)` into one output.
    ///
    /// There is no ordering across workers. A panicking `f` stops the other
    /// workers and is reported through the returned [`Outlet`]. With
    /// `workers == 0` the output is already closed, empty and reports
    /// `InvalidConfiguration`.
    pub fn fan_out<T, U, F>(
        &self,
        ctx: &Context,
        input: impl Into<Outlet<T>>,
        workers: usize,
        f: F,
    ) -> Outlet<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        pipeline::fan_out(
            ctx,
            input.into(),
            workers,
            f,
            self.cfg.channel_capacity_clamped(),
            &self.bus,
        )
    }

    /// Sends `value`, giving up after `timeout` or when `ctx` ends.
    ///
    /// A zero `timeout` is clamped to one nanosecond.
    pub async fn send_with_timeout<T>(
        &self,
        ctx: &Context,
        tx: &mpsc::Sender<T>,
        value: T,
        timeout: Duration,
    ) -> Result<(), FlowError> {
        send::send_with_timeout(ctx, tx, value, timeout, &self.bus).await
    }

    /// [`send_with_timeout`](Self::send_with_timeout) with `Config::send_timeout`.
    pub async fn send<T>(&self, ctx: &Context, tx: &mpsc::Sender<T>, value: T) -> Result<(), FlowError> {
        send::send_with_timeout(ctx, tx, value, self.cfg.send_timeout, &self.bus).await
    }
}

impl Drop for Flow {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("cfg", &self.cfg)
            .field("subscribers", &self.subs.as_ref().map_or(0, |s| s.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::subscribers::Subscribe;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Record(Arc<Mutex<Vec<EventKind>>>);

    #[async_trait]
    impl Subscribe for Record {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_pool_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let flow = Flow::builder(Config::default())
            .with_subscribers(vec![Arc::new(Record(Arc::clone(&seen)))])
            .build();

        flow.process_with_pool(&Context::background(), vec![1, 2], 1, |x: i32| x + 1)
            .await
            .unwrap();
        let stats = flow.subscriber_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].dropped, 0);
        flow.shutdown().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![EventKind::PoolStarted, EventKind::PoolDrained]);
    }

    #[test]
    fn test_no_subscribers_no_stats() {
        assert!(Flow::new(Config::default()).subscriber_stats().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_uses_configured_timeout() {
        let cfg = Config {
            timeout: Duration::from_millis(5),
            ..Config::default()
        };
        let flow = Flow::new(cfg);
        let res = flow
            .run(&Context::background(), |_ctx: Context| async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, std::io::Error>(())
            })
            .await;
        assert!(matches!(res, Err(FlowError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_run_without_timeout_returns_value() {
        let flow = Flow::new(Config::default());
        let v = flow
            .run(&Context::background(), |_ctx: Context| async move {
                Ok::<_, std::io::Error>("done")
            })
            .await
            .unwrap();
        assert_eq!(v, "done");
    }

    #[tokio::test]
    async fn test_send_uses_configured_timeout() {
        let flow = Flow::new(Config::default());
        let (tx, mut rx) = mpsc::channel(1);
        flow.send(&Context::background(), &tx, 3u8).await.unwrap();
        assert_eq!(rx.recv().await, Some(3));
    }
}

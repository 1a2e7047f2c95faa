//! # Pipeline stages and fan-out/fan-in.
//!
//! Every stream endpoint is an [`Outlet`]: the receiving half of a channel plus
//! a fault cell shared by the whole chain. A producer that stops early (its
//! context ended, its callback panicked) records why **before** closing its
//! output, so the consumer always learns that the stream was cut short.
//!
//! ## Stage
//! ```text
//! input outlet ──► [stage task: recv → f(v) → send] ──► output outlet (same fault cell)
//!                        │
//!                        ├─ input exhausted        ─► close
//!                        ├─ ctx done               ─► record ctx reason, close
//!                        ├─ f panicked             ─► record Panicked, close
//!                        └─ downstream gone        ─► close
//!                                  └─► StageClosed
//! ```
//! Chained stages preserve element order end-to-end.
//!
//! ## Fan-out / fan-in
//! ```text
//!                          ┌──► worker 1 ──┐
//! input outlet (shared) ───┼──► worker 2 ──┼──► output outlet (shared sink)
//!   (load-balanced)        └──► worker W ──┘
//!                                  │
//!            closer task: join all workers ─► drop(tx) ─► FanInClosed
//! ```
//! - Items are load-balanced, never duplicated; there is no cross-worker ordering.
//! - Workers check the context while waiting for input and on every send; on
//!   cancellation they exit and abandon unconsumed input.
//! - A panicking transform is recorded and stops the remaining workers.
//! - Only the closer task closes the output, after every worker exited.
//! - `W == 0` returns an already closed, empty output (recorded as
//!   `InvalidConfiguration`) and starts nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::context::{CancelHandle, Context};
use crate::core::consumer::JobSource;
use crate::core::fault::{contain_sync, join_failure};
use crate::error::{BatchError, ContextError, FlowError};
use crate::events::{Bus, Event, EventKind};

const FAN_OUT_SCOPE: &str = "fan_out";

/// First reason a chain of producers stopped early. Later records are ignored.
#[derive(Clone, Default)]
pub(crate) struct Fault(Arc<parking_lot::Mutex<Option<FlowError>>>);

impl Fault {
    fn record(&self, err: FlowError) {
        let mut slot = self.0.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn take(&self) -> Option<FlowError> {
        self.0.lock().take()
    }

    fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }
}

fn stop_reason(ctx: &Context) -> FlowError {
    ctx.err().unwrap_or(ContextError::Cancelled).into()
}

/// # Receiving end of a stage, fan-out or source.
///
/// Yields items like an `mpsc::Receiver`. Once [`recv`](Outlet::recv) returns
/// `None`, [`take_error`](Outlet::take_error) tells whether the stream ended
/// normally or was cut short; [`collect`](Outlet::collect) does both.
///
/// Any `mpsc::Receiver<T>` converts into an outlet with no recorded fault.
pub struct Outlet<T> {
    rx: mpsc::Receiver<T>,
    fault: Fault,
}

impl<T> Outlet<T> {
    fn new(rx: mpsc::Receiver<T>, fault: Fault) -> Self {
        Self { rx, fault }
    }

    /// Receives the next item; `None` once every producer has exited.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns why the stream was cut short, if it was.
    ///
    /// Meaningful after [`recv`](Self::recv) returned `None`. The error is
    /// handed out once.
    pub fn take_error(&mut self) -> Option<FlowError> {
        self.fault.take()
    }

    /// True once some producer of this stream recorded an early stop.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_set()
    }

    /// Drains the stream.
    ///
    /// Returns every item if the stream completed, otherwise the items
    /// received so far together with the reason it was cut short.
    pub async fn collect(mut self) -> Result<Vec<T>, BatchError<T>> {
        let mut results = Vec::new();
        while let Some(v) = self.rx.recv().await {
            results.push(v);
        }
        self.finish(results)
    }

    fn finish(&mut self, results: Vec<T>) -> Result<Vec<T>, BatchError<T>> {
        match self.take_error() {
            Some(error) => Err(BatchError { results, error }),
            None => Ok(results),
        }
    }

    /// Returns the underlying receiver; early-stop reasons are no longer observable.
    pub fn into_receiver(self) -> mpsc::Receiver<T> {
        self.rx
    }
}

impl<T> From<mpsc::Receiver<T>> for Outlet<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Self::new(rx, Fault::default())
    }
}

impl<T> std::fmt::Debug for Outlet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outlet")
            .field("faulted", &self.is_faulted())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send> JobSource<T> for Outlet<T> {
    async fn next_job(&mut self) -> Option<T> {
        self.recv().await
    }

    fn close_reason(&mut self) -> Option<FlowError> {
        self.take_error()
    }
}

enum Next<T> {
    Item(T),
    Exhausted,
    Stopped,
}

async fn next_or_stop<T>(ctx: &Context, input: &mut Outlet<T>) -> Next<T> {
    tokio::select! {
        biased;
        _ = ctx.done() => Next::Stopped,
        v = input.recv() => v.map_or(Next::Exhausted, Next::Item),
    }
}

enum Sent {
    Delivered,
    Closed,
    Stopped,
}

async fn send_or_stop<U>(ctx: &Context, tx: &mpsc::Sender<U>, value: U) -> Sent {
    tokio::select! {
        biased;
        _ = ctx.done() => Sent::Stopped,
        sent = tx.send(value) => if sent.is_ok() { Sent::Delivered } else { Sent::Closed },
    }
}

/// Spawns one stage applying `f` to every element of `input`.
pub(crate) fn stage<T, U, F>(
    ctx: &Context,
    mut input: Outlet<T>,
    f: F,
    name: Arc<str>,
    capacity: usize,
    bus: &Bus,
) -> Outlet<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<U>(capacity);
    let fault = input.fault.clone();
    let output = Outlet::new(rx, fault.clone());
    let ctx = ctx.clone();
    let bus = bus.clone();

    tokio::spawn(async move {
        let mut forwarded: u64 = 0;
        loop {
            let value = match next_or_stop(&ctx, &mut input).await {
                Next::Item(v) => v,
                Next::Exhausted => break,
                Next::Stopped => {
                    fault.record(stop_reason(&ctx));
                    break;
                }
            };

            let out = match contain_sync(|| f(value)) {
                Ok(out) => out,
                Err(panicked) => {
                    tracing::error!(stage = %name, error = %panicked, "stage transform panicked");
                    bus.publish(Event::callback_panicked("stage", panicked.to_string()));
                    fault.record(panicked);
                    break;
                }
            };

            match send_or_stop(&ctx, &tx, out).await {
                Sent::Delivered => forwarded += 1,
                Sent::Closed => break,
                Sent::Stopped => {
                    fault.record(stop_reason(&ctx));
                    break;
                }
            }
        }
        drop(tx);
        bus.publish(
            Event::new(EventKind::StageClosed)
                .with_scope(name)
                .with_count(forwarded),
        );
    });

    output
}

/// Starts `workers` tasks that share `input` and merge `f(v)` into one output.
pub(crate) fn fan_out<T, U, F>(
    ctx: &Context,
    input: Outlet<T>,
    workers: usize,
    f: F,
    capacity: usize,
    bus: &Bus,
) -> Outlet<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<U>(capacity);
    let fault = input.fault.clone();
    let output = Outlet::new(rx, fault.clone());
    if workers == 0 {
        fault.record(FlowError::InvalidConfiguration {
            reason: "worker count must be positive".to_string(),
        });
        return output;
    }

    // Internal stop signal: a panicking worker halts its peers without touching the caller's context.
    let (batch, stop) = ctx.with_cancel();
    let input = Arc::new(Mutex::new(input));
    let f = Arc::new(f);
    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(fan_worker(FanWorker {
            ctx: batch.clone(),
            input: Arc::clone(&input),
            f: Arc::clone(&f),
            out: tx.clone(),
            stop: stop.clone(),
            fault: fault.clone(),
            bus: bus.clone(),
        }));
    }

    let bus = bus.clone();
    tokio::spawn(async move {
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                let failure = join_failure(e);
                tracing::error!(error = %failure, "fan-out worker failed");
                fault.record(failure);
            }
        }
        stop.cancel();
        drop(tx);
        bus.publish(
            Event::new(EventKind::FanInClosed)
                .with_scope(FAN_OUT_SCOPE)
                .with_workers(workers),
        );
    });

    output
}

struct FanWorker<T, U, F> {
    ctx: Context,
    input: Arc<Mutex<Outlet<T>>>,
    f: Arc<F>,
    out: mpsc::Sender<U>,
    stop: CancelHandle,
    fault: Fault,
    bus: Bus,
}

async fn fan_worker<T, U, F>(w: FanWorker<T, U, F>)
where
    F: Fn(T) -> U,
{
    loop {
        let next = {
            let mut input = w.input.lock().await;
            next_or_stop(&w.ctx, &mut input).await
        };
        let value = match next {
            Next::Item(v) => v,
            Next::Exhausted => return,
            Next::Stopped => {
                w.fault.record(stop_reason(&w.ctx));
                return;
            }
        };

        let result = match contain_sync(|| (*w.f)(value)) {
            Ok(result) => result,
            Err(panicked) => {
                tracing::error!(error = %panicked, "fan-out transform panicked");
                w.bus
                    .publish(Event::callback_panicked(FAN_OUT_SCOPE, panicked.to_string()));
                w.fault.record(panicked);
                w.stop.cancel();
                return;
            }
        };

        match send_or_stop(&w.ctx, &w.out, result).await {
            Sent::Delivered => {}
            Sent::Closed => return,
            Sent::Stopped => {
                w.fault.record(stop_reason(&w.ctx));
                return;
            }
        }
    }
}

/// # Chain of pipeline stages.
///
/// Each [`then`](Pipeline::then) spawns a stage reading the previous stage's
/// output. The final outlet yields transformed elements in input order.
///
/// # Example
/// ```
/// use ctxflow::{Config, Context, Flow};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flow = Flow::new(Config::default());
/// let ctx = Context::background();
/// let input = flow.source(&ctx, vec![1, 2, 3]);
///
/// let out = flow
///     .pipeline(&ctx, input)
///     .then(|x: i32| x * 2)
///     .then(|x: i32| x + 1)
///     .collect()
///     .await
///     .unwrap();
/// assert_eq!(out, vec![3, 5, 7]);
/// # }
/// ```
pub struct Pipeline<T> {
    ctx: Context,
    outlet: Outlet<T>,
    capacity: usize,
    bus: Bus,
    depth: usize,
}

impl<T: Send + 'static> Pipeline<T> {
    pub(crate) fn new(ctx: &Context, outlet: Outlet<T>, capacity: usize, bus: &Bus) -> Self {
        Self {
            ctx: ctx.clone(),
            outlet,
            capacity,
            bus: bus.clone(),
            depth: 0,
        }
    }

    /// Appends a stage applying `f`.
    pub fn then<U, F>(self, f: F) -> Pipeline<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + 'static,
    {
        let depth = self.depth + 1;
        let name: Arc<str> = format!("stage-{depth}").into();
        let outlet = stage(&self.ctx, self.outlet, f, name, self.capacity, &self.bus);
        Pipeline {
            ctx: self.ctx,
            outlet,
            capacity: self.capacity,
            bus: self.bus,
            depth,
        }
    }

    /// Number of stages appended so far.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the outlet of the last stage.
    pub fn into_outlet(self) -> Outlet<T> {
        self.outlet
    }

    /// Drains the last stage until it closes or the pipeline's context ends.
    ///
    /// A pipeline cut short (cancellation, deadline, panicking stage) returns
    /// the items received so far inside the error.
    pub async fn collect(mut self) -> Result<Vec<T>, BatchError<T>> {
        let mut results = Vec::new();
        loop {
            match next_or_stop(&self.ctx, &mut self.outlet).await {
                Next::Item(v) => results.push(v),
                Next::Exhausted => break,
                Next::Stopped => {
                    self.outlet.fault.record(stop_reason(&self.ctx));
                    break;
                }
            }
        }
        self.outlet.finish(results)
    }
}

/// Spawns a producer that sends `items` in order, then closes.
pub(crate) fn source<T, I>(ctx: &Context, items: I, capacity: usize) -> Outlet<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T> + Send + 'static,
    I::IntoIter: Send,
{
    let (tx, rx) = mpsc::channel::<T>(capacity);
    let fault = Fault::default();
    let output = Outlet::new(rx, fault.clone());
    let ctx = ctx.clone();
    tokio::spawn(async move {
        for item in items {
            match send_or_stop(&ctx, &tx, item).await {
                Sent::Delivered => {}
                Sent::Closed => return,
                Sent::Stopped => {
                    fault.record(stop_reason(&ctx));
                    return;
                }
            }
        }
    });
    output
}

//! # Bounded, order-preserving worker pool.
//!
//! Processes an ordered batch with at most `W` concurrent workers and returns
//! results in input order, regardless of completion order.
//!
//! ## Architecture
//! ```text
//! inputs[0..N] ──► dispatcher ──► [bounded job queue] ──┬──► worker 1 ─► Vec<(index, U)> ─┐
//!   (index, value) assigned once   (shared receiver)    ├──► worker 2 ─► Vec<(index, U)> ─┼─► join ─► results[index]
//!                                                       └──► worker W ─► Vec<(index, U)> ─┘
//! ```
//!
//! ## Rules
//! - `W == 0` fails with `InvalidConfiguration` before anything is spawned.
//! - Each index is dispatched at most once, so exactly one worker ever produces a given slot.
//! - Workers keep their `(index, value)` pairs private until the join; the result
//!   sequence is only assembled afterward. No lock guards the results.
//! - Cancellation (before or during dispatch, or mid-processing) halts dispatch,
//!   lets in-flight workers drain, and returns the partial results with the
//!   context's error. Slots that were never produced keep `U::default()`.
//! - A panicking transform stops the batch the same way and is reported as `Panicked`.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::context::{CancelHandle, Context};
use crate::core::fault::{contain_sync, join_failure};
use crate::error::{BatchError, FlowError};
use crate::events::{Bus, Event, EventKind};

const SCOPE: &str = "process_with_pool";

/// One unit of dispatched work: the payload and its position in the input.
struct Job<T> {
    index: usize,
    value: T,
}

/// What a worker hands back at the join.
struct WorkerOutput<U> {
    produced: Vec<(usize, U)>,
    fault: Option<FlowError>,
}

type SharedJobs<T> = Arc<Mutex<mpsc::Receiver<Job<T>>>>;

/// Applies `transform` to every input with `workers` concurrent workers.
///
/// `queue_capacity` must already be clamped (see `Config::channel_capacity_clamped`).
pub(crate) async fn process_with_pool<I, T, U, F>(
    ctx: &Context,
    inputs: I,
    workers: usize,
    transform: F,
    queue_capacity: usize,
    bus: &Bus,
) -> Result<Vec<U>, BatchError<U>>
where
    I: IntoIterator<Item = T>,
    I::IntoIter: ExactSizeIterator,
    T: Send + 'static,
    U: Default + Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    if workers == 0 {
        return Err(BatchError {
            results: Vec::new(),
            error: FlowError::InvalidConfiguration {
                reason: "worker count must be positive".to_string(),
            },
        });
    }

    let inputs = inputs.into_iter();
    let total = inputs.len();
    bus.publish(
        Event::new(EventKind::PoolStarted)
            .with_scope(SCOPE)
            .with_workers(workers)
            .with_count(total as u64),
    );

    // Internal stop signal: a panicking worker halts the batch without touching the caller's context.
    let (batch, stop) = ctx.with_cancel();
    let _stop = stop.clone().drop_guard();

    let (tx, rx) = mpsc::channel::<Job<T>>(queue_capacity);
    let jobs: SharedJobs<T> = Arc::new(Mutex::new(rx));
    let transform = Arc::new(transform);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        set.spawn(worker(
            batch.clone(),
            Arc::clone(&jobs),
            Arc::clone(&transform),
            stop.clone(),
        ));
    }
    drop(jobs);

    let dispatched = dispatch(&batch, inputs, tx).await;

    let mut results: Vec<U> = Vec::with_capacity(total);
    results.resize_with(total, U::default);
    let mut fault: Option<FlowError> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(out) => {
                for (index, value) in out.produced {
                    if let Some(slot) = results.get_mut(index) {
                        *slot = value;
                    }
                }
                if let Some(f) = out.fault {
                    fault.get_or_insert(f);
                }
            }
            Err(e) => {
                fault.get_or_insert(join_failure(e));
            }
        }
    }

    let error = fault.or_else(|| ctx.err().map(FlowError::from));
    match error {
        None => {
            bus.publish(
                Event::new(EventKind::PoolDrained)
                    .with_scope(SCOPE)
                    .with_count(total as u64),
            );
            Ok(results)
        }
        Some(error) => {
            if let FlowError::Panicked { message } = &error {
                bus.publish(Event::callback_panicked(SCOPE, message.as_str()));
            }
            bus.publish(
                Event::new(EventKind::PoolInterrupted)
                    .with_scope(SCOPE)
                    .with_count(dispatched as u64)
                    .with_reason(error.as_label()),
            );
            Err(BatchError { results, error })
        }
    }
}

/// Feeds `(index, value)` jobs one at a time until the input ends or `ctx` is done.
///
/// Returns how many jobs were handed to workers. Dropping `tx` on return tells
/// workers that no more jobs will come.
async fn dispatch<T>(
    ctx: &Context,
    inputs: impl Iterator<Item = T>,
    tx: mpsc::Sender<Job<T>>,
) -> usize {
    let mut dispatched = 0;
    for (index, value) in inputs.enumerate() {
        if ctx.is_done() {
            break;
        }
        tokio::select! {
            biased;
            _ = ctx.done() => break,
            sent = tx.send(Job { index, value }) => {
                if sent.is_err() {
                    // every worker has exited
                    break;
                }
            }
        }
        dispatched += 1;
    }
    dispatched
}

async fn worker<T, U, F>(
    ctx: Context,
    jobs: SharedJobs<T>,
    transform: Arc<F>,
    stop: CancelHandle,
) -> WorkerOutput<U>
where
    F: Fn(T) -> U,
{
    let mut produced = Vec::new();
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(Job { index, value }) = job else { break };
        if ctx.is_done() {
            break;
        }
        match contain_sync(|| (*transform)(value)) {
            Ok(out) => produced.push((index, out)),
            Err(fault) => {
                stop.cancel();
                return WorkerOutput {
                    produced,
                    fault: Some(fault),
                };
            }
        }
    }
    WorkerOutput {
        produced,
        fault: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use std::time::Duration;

    fn square(x: i64) -> i64 {
        x * x
    }

    #[tokio::test]
    async fn test_squares_in_input_order() {
        let out = process_with_pool(&Context::background(), vec![1, 2, 3, 4, 5], 2, square, 1, &Bus::new(8))
            .await
            .unwrap();
        assert_eq!(out, vec![1, 4, 9, 16, 25]);
    }

    #[tokio::test]
    async fn test_zero_workers_is_invalid_configuration() {
        let err = process_with_pool(&Context::background(), vec![1], 0, square, 1, &Bus::new(8))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::InvalidConfiguration { .. }));
        assert!(err.results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let out = process_with_pool(&Context::background(), Vec::<i64>::new(), 3, square, 1, &Bus::new(8))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_keeps_defaults() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let err = process_with_pool(&ctx, vec![1, 2, 3], 2, square, 1, &Bus::new(8))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::Cancelled));
        assert_eq!(err.results, vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_expired_deadline_is_reported() {
        let (ctx, release) = Context::background().with_timeout(Duration::from_nanos(1));
        let err = process_with_pool(&ctx, vec![1, 2, 3], 2, square, 1, &Bus::new(8))
            .await
            .unwrap_err();
        release.cancel();
        assert_eq!(err.error.as_context_error(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_mid_processing_returns_partial_results() {
        let (ctx, cancel) = Context::background().with_cancel();
        let trip = cancel.clone();
        let inputs: Vec<i64> = (1..=200).collect();

        let err = process_with_pool(
            &ctx,
            inputs.clone(),
            4,
            move |x: i64| {
                if x == 20 {
                    trip.cancel();
                }
                x * x
            },
            1,
            &Bus::new(8),
        )
        .await
        .unwrap_err();
        cancel.cancel();

        assert!(matches!(err.error, FlowError::Cancelled));
        assert_eq!(err.results.len(), inputs.len());
        // Every slot is either untouched or holds its own square.
        for (i, v) in err.results.iter().enumerate() {
            assert!(*v == 0 || *v == inputs[i] * inputs[i], "slot {i} = {v}");
        }
        assert!(err.results.iter().any(|v| *v == 0));
    }

    #[tokio::test]
    async fn test_panicking_transform_stops_batch() {
        let err = process_with_pool(
            &Context::background(),
            (1..=50).collect::<Vec<i64>>(),
            3,
            |x: i64| {
                if x == 3 {
                    panic!("cannot square 3");
                }
                x * x
            },
            1,
            &Bus::new(8),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.error, FlowError::Panicked { ref message } if message == "cannot square 3"));
        assert_eq!(err.results[2], 0);
    }

    #[tokio::test]
    async fn test_events_bracket_the_batch() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        process_with_pool(&Context::background(), vec![2, 3], 1, square, 1, &bus)
            .await
            .unwrap();
        let started = rx.recv().await.unwrap();
        assert_eq!(started.kind, EventKind::PoolStarted);
        assert_eq!(started.workers, Some(1));
        assert_eq!(started.count, Some(2));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::PoolDrained);
    }
}

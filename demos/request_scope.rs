//! # Request-scoped processing
//!
//! Demonstrates the primitives working under one request context:
//! - Scoped values (request id) and a request-wide deadline
//! - A queue consumer whose handler runs bounded sub-work
//! - An order-preserving worker pool and a pipeline with fan-out
//! - Events rendered by `LogWriter` through `tracing`
//!
//! Run with: `cargo run --example request_scope --features logging`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use ctxflow::{Config, Context, ContextKey, Flow, FlowError, LogWriter, SafeCounter, Subscribe};

const REQUEST_ID: ContextKey<String> = ContextKey::new("request_id");

/// Looks up one order; slow for order 3 so its sub-deadline expires.
async fn fetch_order(ctx: Context, order: u32) -> Result<u32, FlowError> {
    let delay = if order == 3 { 200 } else { 10 };
    tokio::select! {
        _ = ctx.done() => Err(ctx.err().map_or(FlowError::Cancelled, FlowError::from)),
        _ = tokio::time::sleep(Duration::from_millis(delay)) => Ok(order * 100),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .init();

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let flow = Arc::new(Flow::builder(Config::default()).with_subscribers(subs).build());

    let (request, release) = Context::background().with_timeout(Duration::from_secs(2));
    let _release = release.drop_guard();
    let request = request.with_value(&REQUEST_ID, "req-7f3a".to_string());

    // 1) Consumer: each order is fetched under its own 50ms budget.
    let (tx, rx) = mpsc::channel::<u32>(8);
    for order in 1..=4 {
        flow.send(&request, &tx, order).await?;
    }
    drop(tx);

    let fetched = Arc::new(SafeCounter::new());
    let handler_flow = Arc::clone(&flow);
    let counter = Arc::clone(&fetched);
    let res = flow
        .process_all(&request, rx, move |ctx: Context, order: u32| {
            let flow = Arc::clone(&handler_flow);
            let counter = Arc::clone(&counter);
            async move {
                let id = ctx.value(&REQUEST_ID)?.clone();
                match flow
                    .run_with_timeout(&ctx, Duration::from_millis(50), move |sub| fetch_order(sub, order))
                    .await
                {
                    Ok(total) => {
                        counter.inc();
                        println!("[{id}] order {order}: {total}");
                        Ok(())
                    }
                    Err(e) if e.is_cancellation() => {
                        println!("[{id}] order {order}: skipped ({})", e.as_label());
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await;
    println!("consumer finished: {res:?}, fetched {}", fetched.value());

    // 2) Pool: results come back in input order.
    let squares = flow
        .process_with_pool(&request, (1..=8i64).collect::<Vec<_>>(), 3, |x: i64| x * x)
        .await?;
    println!("squares: {squares:?}");

    // 3) Pipeline into fan-out.
    let input = flow.source(&request, squares);
    let halved = flow.pipeline(&request, input).then(|x: i64| x / 2).into_outlet();
    let merged = flow.fan_out(&request, halved, 2, |x: i64| x + 1);
    let mut out = merged.collect().await?;
    out.sort_unstable();
    println!("fan-in: {out:?}");

    for s in flow.subscriber_stats() {
        println!("subscriber {}: {} delivered, {} dropped", s.name, s.delivered, s.dropped);
    }
    match Arc::try_unwrap(flow) {
        Ok(flow) => flow.shutdown().await,
        Err(_) => eprintln!("flow still shared; skipping graceful shutdown"),
    }
    Ok(())
}

//! # SubscriberSet: per-subscriber delivery lanes.
//!
//! Every subscriber gets a **lane**: a bounded queue, a worker task draining it
//! and a tally of what happened to the events offered to it.
//!
//! ```text
//!    emit(&Event) ── Arc<Event> ──┬──► lane "log"     [queue] ─► worker ─► on_event()
//!     (never awaits)              ├──► lane "metrics" [queue] ─► worker ─► on_event()
//!                                 └──► lane ...
//!                                        │
//!                                        └─ tally: delivered / dropped / panicked
//! ```
//!
//! ## Rules
//! - `emit` only ever `try_send`s; a full lane drops the event for that
//!   subscriber alone and counts it.
//! - Each lane is FIFO. There is no ordering across lanes.
//! - A panic in `on_event` is caught, counted and logged; the lane keeps going.
//! - Drop warnings are logged on the 1st, 2nd, 4th, 8th... drop of a lane so a
//!   stuck subscriber cannot flood the log.
//! - `shutdown` closes every lane, waits for the queued events, and returns
//!   the final tallies.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::core::fault::panic_message;
use crate::events::Event;

use super::Subscribe;

/// Delivery counters of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberStats {
    /// [`Subscribe::name`] of the subscriber.
    pub name: &'static str,
    /// Events handed to `on_event` that returned normally.
    pub delivered: u64,
    /// Events discarded because the lane was full or already closed.
    pub dropped: u64,
    /// Events whose `on_event` panicked.
    pub panicked: u64,
}

#[derive(Default)]
struct Tally {
    delivered: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

impl Tally {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn snapshot(&self, name: &'static str) -> SubscriberStats {
        SubscriberStats {
            name,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    tally: Arc<Tally>,
    worker: JoinHandle<()>,
}

impl Lane {
    fn open(sub: Arc<dyn Subscribe>) -> Self {
        let name = sub.name();
        let (tx, rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
        let tally = Arc::new(Tally::default());
        let worker = tokio::spawn(drain(sub, rx, Arc::clone(&tally)));
        Self {
            name,
            tx,
            tally,
            worker,
        }
    }

    fn offer(&self, ev: &Arc<Event>) {
        let cause = match self.tx.try_send(Arc::clone(ev)) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => "queue full",
            Err(TrySendError::Closed(_)) => "worker gone",
        };
        let dropped = Tally::bump(&self.tally.dropped);
        if dropped.is_power_of_two() {
            tracing::warn!(subscriber = self.name, seq = ev.seq, dropped, cause, "subscriber dropped event");
        }
    }
}

async fn drain(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, tally: Arc<Tally>) {
    while let Some(ev) = rx.recv().await {
        let handled = std::panic::AssertUnwindSafe(sub.on_event(&ev))
            .catch_unwind()
            .await;
        match handled {
            Ok(()) => {
                Tally::bump(&tally.delivered);
            }
            Err(payload) => {
                Tally::bump(&tally.panicked);
                tracing::warn!(
                    subscriber = sub.name(),
                    seq = ev.seq,
                    panic = %panic_message(payload),
                    "subscriber panicked"
                );
            }
        }
    }
}

/// Non-blocking fan-out of events to a fixed set of subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
}

impl SubscriberSet {
    /// Opens one lane per subscriber.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime when `subs` is non-empty.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        Self {
            lanes: subs.into_iter().map(Lane::open).collect(),
        }
    }

    /// Offers `event` to every lane without waiting.
    pub fn emit(&self, event: &Event) {
        if self.lanes.is_empty() {
            return;
        }
        let ev = Arc::new(event.clone());
        for lane in &self.lanes {
            lane.offer(&ev);
        }
    }

    /// Current counters, one entry per subscriber in registration order.
    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.lanes.iter().map(|l| l.tally.snapshot(l.name)).collect()
    }

    /// Closes every lane, waits until queued events are handled and returns
    /// the final counters.
    pub async fn shutdown(self) -> Vec<SubscriberStats> {
        let mut finals = Vec::with_capacity(self.lanes.len());
        for Lane {
            name,
            tx,
            tally,
            worker,
        } in self.lanes
        {
            drop(tx);
            if let Err(e) = worker.await {
                tracing::warn!(subscriber = name, error = %e, "subscriber worker did not finish");
            }
            let stats = tally.snapshot(name);
            tracing::debug!(
                subscriber = name,
                delivered = stats.delivered,
                dropped = stats.dropped,
                panicked = stats.panicked,
                "subscriber drained"
            );
            finals.push(stats);
        }
        finals
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;

    struct Forward {
        tx: mpsc::UnboundedSender<EventKind>,
        capacity: usize,
    }

    impl Forward {
        fn new(tx: mpsc::UnboundedSender<EventKind>) -> Self {
            Self { tx, capacity: 1024 }
        }
    }

    #[async_trait]
    impl Subscribe for Forward {
        async fn on_event(&self, event: &Event) {
            let _ = self.tx.send(event.kind);
        }
        fn name(&self) -> &'static str {
            "forward"
        }
        fn queue_capacity(&self) -> usize {
            self.capacity
        }
    }

    struct Explodes;

    #[async_trait]
    impl Subscribe for Explodes {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber bug");
        }
        fn name(&self) -> &'static str {
            "explodes"
        }
    }

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let set = SubscriberSet::new(vec![Arc::new(Forward::new(tx)), Arc::new(Explodes)]);
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::PoolStarted));
        set.emit(&Event::new(EventKind::PoolDrained));
        let stats = set.shutdown().await;

        assert_eq!(rx.recv().await, Some(EventKind::PoolStarted));
        assert_eq!(rx.recv().await, Some(EventKind::PoolDrained));
        assert_eq!(rx.recv().await, None);

        assert_eq!(
            stats,
            vec![
                SubscriberStats { name: "forward", delivered: 2, dropped: 0, panicked: 0 },
                SubscriberStats { name: "explodes", delivered: 0, dropped: 0, panicked: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_full_lane_drops_only_for_that_subscriber() {
        let (narrow_tx, mut narrow_rx) = mpsc::unbounded_channel();
        let (wide_tx, mut wide_rx) = mpsc::unbounded_channel();
        let narrow = Forward {
            tx: narrow_tx,
            capacity: 1,
        };
        let set = SubscriberSet::new(vec![Arc::new(narrow), Arc::new(Forward::new(wide_tx))]);

        // Workers cannot run between these calls on a current-thread runtime.
        for _ in 0..5 {
            set.emit(&Event::new(EventKind::StageClosed));
        }
        assert_eq!(set.stats()[0].dropped, 4);
        assert_eq!(set.stats()[1].dropped, 0);

        let stats = set.shutdown().await;
        assert_eq!((stats[0].delivered, stats[0].dropped), (1, 4));
        assert_eq!((stats[1].delivered, stats[1].dropped), (5, 0));

        let mut narrow_seen = 0;
        while narrow_rx.recv().await.is_some() {
            narrow_seen += 1;
        }
        let mut wide_seen = 0;
        while wide_rx.recv().await.is_some() {
            wide_seen += 1;
        }
        assert_eq!((narrow_seen, wide_seen), (1, 5));
    }

    #[tokio::test]
    async fn test_empty_set() {
        let set = SubscriberSet::new(Vec::new());
        assert!(set.is_empty());
        set.emit(&Event::new(EventKind::FanInClosed));
        assert!(set.shutdown().await.is_empty());
    }
}

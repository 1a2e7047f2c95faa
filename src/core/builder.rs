use std::sync::Arc;

use crate::{
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
};

use super::{config::Config, flow::Flow};

/// Assembles a [`Flow`]: bus sized from the config, plus any subscribers.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use ctxflow::{Config, Flow, Subscribe};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
/// let flow = Flow::builder(Config::default()).with_subscribers(subs).build();
/// assert_eq!(flow.config().channel_capacity, 1);
/// # }
/// ```
pub struct FlowBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl FlowBuilder {
    /// Starts from `cfg` with no subscribers.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Replaces the subscriber list.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Appends one subscriber.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Creates the bus, spawns subscriber workers and the listener.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime when subscribers were given.
    pub fn build(self) -> Flow {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = if self.subscribers.is_empty() {
            None
        } else {
            Some(SubscriberSet::new(self.subscribers))
        };
        Flow::new_internal(self.cfg, bus, subs)
    }
}

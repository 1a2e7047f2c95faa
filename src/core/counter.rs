//! # Mutex-protected counter.
//!
//! The fallback for shared mutable state when work cannot be partitioned by
//! index. Every operation takes the lock, so concurrent increments are never lost.

use parking_lot::Mutex;

/// Counter safe to share across tasks (wrap in `Arc`).
///
/// # Example
/// ```
/// use ctxflow::SafeCounter;
///
/// let c = SafeCounter::new();
/// c.inc();
/// c.add(4);
/// assert_eq!(c.value(), 5);
/// ```
#[derive(Debug, Default)]
pub struct SafeCounter {
    value: Mutex<u64>,
}

impl SafeCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one and returns the new value.
    pub fn inc(&self) -> u64 {
        self.add(1)
    }

    /// Adds `n` (saturating) and returns the new value.
    pub fn add(&self, n: u64) -> u64 {
        let mut v = self.value.lock();
        *v = v.saturating_add(n);
        *v
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        *self.value.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let counter = Arc::new(SafeCounter::new());
        let mut set = tokio::task::JoinSet::new();
        for _ in 0..1000 {
            let c = Arc::clone(&counter);
            set.spawn(async move {
                c.inc();
            });
        }
        while set.join_next().await.is_some() {}
        assert_eq!(counter.value(), 1000);
    }

    #[test]
    fn test_add_saturates() {
        let c = SafeCounter::new();
        c.add(u64::MAX);
        assert_eq!(c.inc(), u64::MAX);
    }
}

//! # Flow configuration.
//!
//! Provides [`Config`], the settings shared by every primitive a
//! [`Flow`](crate::Flow) runs.
//!
//! ## Sentinel values
//! - `timeout = 0s` → no default timeout (`Flow::run` relies on the caller's context only)
//! - `channel_capacity = 0` / `bus_capacity = 0` → clamped to 1
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use ctxflow::Config;
//!
//! let mut cfg = Config::default();
//! cfg.timeout = Duration::from_millis(250);
//! cfg.channel_capacity = 16;
//!
//! assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(250)));
//! ```

use std::time::Duration;

/// Settings for a [`Flow`](crate::Flow).
///
/// ## Field semantics
/// - `channel_capacity`: buffer size of channels created by the pool dispatcher,
///   pipeline stages and fan-out (min 1)
/// - `bus_capacity`: event bus ring buffer size (min 1)
/// - `timeout`: default timeout for [`Flow::run`](crate::Flow::run) (`0s` = none)
/// - `send_timeout`: timeout for [`Flow::send`](crate::Flow::send)
///
/// All fields are public. Prefer the helper accessors over checking sentinels directly.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of internally created channels.
    ///
    /// The default of 1 keeps producers and workers in lock-step, so
    /// cancellation is observed after at most one buffered item.
    pub channel_capacity: usize,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Receivers that fall behind by more than `bus_capacity` events see
    /// `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Default run timeout.
    ///
    /// - `Duration::ZERO` = none
    /// - `> 0` = applied by `Flow::run` to every unit of work
    pub timeout: Duration,

    /// Timeout used by `Flow::send`. Zero is clamped to one nanosecond.
    pub send_timeout: Duration,
}

impl Config {
    /// Returns the default run timeout as an `Option`.
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout == Duration::ZERO {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Returns a channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn channel_capacity_clamped(&self) -> usize {
        self.channel_capacity.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `channel_capacity = 1`
    /// - `bus_capacity = 1024`
    /// - `timeout = 0s` (none)
    /// - `send_timeout = 1s`
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            bus_capacity: 1024,
            timeout: Duration::ZERO,
            send_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels() {
        let cfg = Config {
            channel_capacity: 0,
            bus_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.default_timeout(), None);
        assert_eq!(cfg.channel_capacity_clamped(), 1);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}

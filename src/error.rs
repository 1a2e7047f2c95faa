//! Error types used by contexts and the concurrency primitives.
//!
//! This module defines three error types:
//!
//! - [`ContextError`]: the reason a [`Context`](crate::Context) ended.
//! - [`FlowError`]: errors returned by the runner, consumer, pool, pipeline and timed send.
//! - [`BatchError`]: a [`FlowError`] paired with the partially filled results of a pool run.
//!
//! All of them provide helper methods (`as_label`, `as_message`) for logging/metrics.
//! Callers should branch on the variant (or the label), never on message text.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed, thread-safe error produced by caller-supplied work functions and handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// # Reason a context ended.
///
/// Once a context is done its reason never changes.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context (or one of its ancestors) was cancelled explicitly.
    #[error("context canceled")]
    Cancelled,

    /// The context's deadline (or an ancestor's) passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ContextError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ctxflow::ContextError;
    ///
    /// assert_eq!(ContextError::DeadlineExceeded.as_label(), "deadline_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ContextError::Cancelled => "cancelled",
            ContextError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

/// # Errors produced by the concurrency primitives.
///
/// Every primitive returns one of three outcomes: success, a cancellation/timeout
/// error ([`FlowError::is_cancellation`]), or a failure raised by caller code
/// ([`FlowError::Handler`] / [`FlowError::Panicked`]).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FlowError {
    /// The governing context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The governing context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A primitive was configured with unusable parameters (e.g. zero workers).
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// A timed send did not complete before its timer fired.
    #[error("send timed out after {timeout:?}")]
    SendTimeout {
        /// The (clamped) timeout that elapsed.
        timeout: Duration,
    },

    /// The receiving side of a channel was dropped before the value could be enqueued.
    #[error("channel closed")]
    Closed,

    /// A context value lookup found no binding for the key.
    #[error("no context value bound for key {key:?}")]
    NotFound {
        /// Name of the key that was looked up.
        key: &'static str,
    },

    /// Error returned by a caller-supplied work function or handler, carried verbatim.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    /// A caller-supplied callback panicked; the panic was caught at the component boundary.
    #[error("callback panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

impl FlowError {
    /// Wraps a caller error as [`FlowError::Handler`].
    pub fn handler(err: impl Into<BoxError>) -> Self {
        FlowError::Handler(err.into())
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use ctxflow::FlowError;
    /// use std::time::Duration;
    ///
    /// let err = FlowError::SendTimeout { timeout: Duration::from_millis(5) };
    /// assert_eq!(err.as_label(), "send_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            FlowError::Cancelled => "cancelled",
            FlowError::DeadlineExceeded => "deadline_exceeded",
            FlowError::InvalidConfiguration { .. } => "invalid_configuration",
            FlowError::SendTimeout { .. } => "send_timeout",
            FlowError::Closed => "channel_closed",
            FlowError::NotFound { .. } => "value_not_found",
            FlowError::Handler(_) => "handler_failed",
            FlowError::Panicked { .. } => "callback_panicked",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            FlowError::Cancelled => "context canceled".to_string(),
            FlowError::DeadlineExceeded => "deadline exceeded".to_string(),
            FlowError::InvalidConfiguration { reason } => format!("invalid configuration: {reason}"),
            FlowError::SendTimeout { timeout } => format!("send timeout: {timeout:?}"),
            FlowError::Closed => "channel closed".to_string(),
            FlowError::NotFound { key } => format!("value not found: {key}"),
            FlowError::Handler(e) => format!("handler: {e}"),
            FlowError::Panicked { message } => format!("panic: {message}"),
        }
    }

    /// True for [`FlowError::Cancelled`] and [`FlowError::DeadlineExceeded`].
    ///
    /// # Example
    /// ```
    /// use ctxflow::{ContextError, FlowError};
    ///
    /// assert!(FlowError::from(ContextError::Cancelled).is_cancellation());
    /// assert!(!FlowError::Closed.is_cancellation());
    /// ```
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FlowError::Cancelled | FlowError::DeadlineExceeded)
    }

    /// Returns the context reason if this error is a cancellation/timeout.
    pub fn as_context_error(&self) -> Option<ContextError> {
        match self {
            FlowError::Cancelled => Some(ContextError::Cancelled),
            FlowError::DeadlineExceeded => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns the caller's error if this is a [`FlowError::Handler`].
    pub fn handler_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            FlowError::Handler(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<ContextError> for FlowError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => FlowError::Cancelled,
            ContextError::DeadlineExceeded => FlowError::DeadlineExceeded,
        }
    }
}

/// # Interrupted worker-pool run.
///
/// Carries whatever results were produced before the run stopped. Slots whose
/// jobs were never dispatched (or were dropped after cancellation) hold
/// `U::default()`. For [`FlowError::InvalidConfiguration`] no work started and
/// `results` is empty.
pub struct BatchError<U> {
    /// Partially filled results, one slot per input index.
    pub results: Vec<U>,
    /// Why the run stopped.
    pub error: FlowError,
}

impl<U> BatchError<U> {
    /// Discards the partial results and returns the underlying error.
    pub fn into_error(self) -> FlowError {
        self.error
    }
}

impl<U> fmt::Debug for BatchError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchError")
            .field("slots", &self.results.len())
            .field("error", &self.error)
            .finish()
    }
}

impl<U> fmt::Display for BatchError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch interrupted: {}", self.error)
    }
}

impl<U> StdError for BatchError<U> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

impl<U> From<BatchError<U>> for FlowError {
    fn from(err: BatchError<U>) -> Self {
        err.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_error_converts_by_kind() {
        assert!(matches!(FlowError::from(ContextError::Cancelled), FlowError::Cancelled));
        assert!(matches!(
            FlowError::from(ContextError::DeadlineExceeded),
            FlowError::DeadlineExceeded
        ));
    }

    #[test]
    fn test_handler_error_is_kept_verbatim() {
        let err = FlowError::handler(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let inner = err.handler_error().expect("handler error");
        let io = inner
            .downcast_ref::<std::io::Error>()
            .expect("io error survives wrapping");
        assert_eq!(io.to_string(), "disk gone");
        assert!(!err.is_cancellation());
        assert_eq!(err.as_label(), "handler_failed");
    }

    #[test]
    fn test_batch_error_exposes_source() {
        let err = BatchError {
            results: vec![1, 0, 0],
            error: FlowError::DeadlineExceeded,
        };
        assert_eq!(err.to_string(), "batch interrupted: context deadline exceeded");
        assert!(err.source().is_some());
        assert!(err.into_error().is_cancellation());
    }
}

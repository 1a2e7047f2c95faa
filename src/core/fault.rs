//! Containment of faults raised inside caller-supplied callbacks.
//!
//! A panic inside a work function, handler or transform must never unwind past
//! a primitive's boundary. It is caught here and turned into [`FlowError::Panicked`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinError;

use crate::error::FlowError;

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Maps a failed join to a [`FlowError`].
///
/// A task only fails to join if it panicked or the runtime is shutting down.
pub(crate) fn join_failure(err: JoinError) -> FlowError {
    if err.is_panic() {
        FlowError::Panicked {
            message: panic_message(err.into_panic()),
        }
    } else {
        FlowError::Cancelled
    }
}

/// Polls `fut` to completion, converting a panic into [`FlowError::Panicked`].
pub(crate) async fn contain<F: Future>(fut: F) -> Result<F::Output, FlowError> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| FlowError::Panicked {
            message: panic_message(payload),
        })
}

/// Runs a synchronous callback, converting a panic into [`FlowError::Panicked`].
pub(crate) fn contain_sync<R>(f: impl FnOnce() -> R) -> Result<R, FlowError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| FlowError::Panicked {
        message: panic_message(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contain_reports_str_and_string_payloads() {
        let err = contain(async { panic!("static message") }).await.unwrap_err();
        assert!(matches!(err, FlowError::Panicked { ref message } if message == "static message"));

        let n = 7;
        let err = contain_sync(|| panic!("formatted {n}")).unwrap_err();
        assert!(matches!(err, FlowError::Panicked { ref message } if message == "formatted 7"));
    }

    #[tokio::test]
    async fn test_contain_passes_values_through() {
        assert_eq!(contain(async { 5 }).await.unwrap(), 5);
        assert_eq!(contain_sync(|| "ok").unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_join_failure_maps_panics() {
        let handle = tokio::spawn(async { panic!("in task") });
        let err = join_failure(handle.await.unwrap_err());
        assert_eq!(err.as_label(), "callback_panicked");
    }
}

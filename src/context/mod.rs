//! # Cancellation contexts.
//!
//! A [`Context`] carries three things down every call boundary:
//! - a **done signal** (one-shot, observable by any number of waiters),
//! - an optional **deadline** (never later than any ancestor's),
//! - an immutable chain of **scoped values** keyed by [`ContextKey`].
//!
//! ## Architecture
//! ```text
//! Context::background()
//!     │
//!     ├── with_timeout(50ms) ──► (ctx A, CancelHandle)   timer task fires DeadlineExceeded
//!     │        │
//!     │        └── with_cancel() ──► (ctx B, CancelHandle)   B.token = A.token.child_token()
//!     │                 │
//!     │                 └── with_value(&REQUEST_ID, "r-1") ──► ctx C   (shares B's done signal)
//!     ▼
//! parent cancel ──► child tokens cancelled ──► child.err() resolves to the parent's reason
//! ```
//!
//! ## Rules
//! - The reason is written **once** (first writer wins) and never changes afterward.
//! - The reason is stored **before** the token is cancelled, so anyone who sees
//!   the done signal also sees the reason.
//! - Every derived context must be released through its [`CancelHandle`] on all
//!   exit paths; releasing twice is harmless.

mod context;
mod handle;
mod key;

pub use context::Context;
pub use handle::{CancelGuard, CancelHandle};
pub use key::ContextKey;

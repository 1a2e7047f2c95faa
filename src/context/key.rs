//! Typed keys and the immutable value chain behind [`Context::value`](crate::Context::value).

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed key for a value stored in a [`Context`](crate::Context).
///
/// Two keys match only if both their name and value type match, so unrelated
/// modules can reuse a name without clobbering each other.
///
/// # Example
/// ```
/// use ctxflow::{Context, ContextKey};
///
/// const REQUEST_ID: ContextKey<String> = ContextKey::new("request_id");
///
/// let ctx = Context::background().with_value(&REQUEST_ID, "req-123".to_string());
/// assert_eq!(ctx.value(&REQUEST_ID).unwrap(), "req-123");
/// ```
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    /// Creates a key with a human-readable name.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the key name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.name).finish()
    }
}

/// One link of the value chain. Newer bindings point at older ones.
pub(crate) struct Binding {
    name: &'static str,
    type_id: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    next: Option<Arc<Binding>>,
}

impl Binding {
    pub(crate) fn push<T: Send + Sync + 'static>(
        next: Option<Arc<Binding>>,
        key: &ContextKey<T>,
        value: T,
    ) -> Arc<Binding> {
        Arc::new(Binding {
            name: key.name,
            type_id: TypeId::of::<T>(),
            value: Arc::new(value),
            next,
        })
    }

    /// Walks the chain innermost-first and returns the first match.
    pub(crate) fn find<'a, T: 'static>(
        mut cur: Option<&'a Arc<Binding>>,
        key: &ContextKey<T>,
    ) -> Option<&'a T> {
        let want = TypeId::of::<T>();
        while let Some(b) = cur {
            if b.name == key.name && b.type_id == want {
                return b.value.downcast_ref::<T>();
            }
            cur = b.next.as_ref();
        }
        None
    }
}

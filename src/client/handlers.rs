//! Explicit subscription registries for message and status callbacks
//!
//! Handlers are invoked synchronously in registration order, one message at a
//! time, and must be non-blocking; slow work belongs on a queue or task, not
//! in the handler. `subscribe` returns a [`Subscription`] token that removes
//! the handler again.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct RegistryInner<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// A list of subscribed callbacks for one event kind
pub struct HandlerRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T> Clone for HandlerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a handler; the returned token unsubscribes it
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription<T> {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invoke every handler with the value, in registration order.
    /// Callbacks run outside the registry lock, so a handler may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unsubscribe token returned by [`HandlerRegistry::subscribe`]
pub struct Subscription<T> {
    registry: Weak<Mutex<RegistryInner<T>>>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Remove the handler. Idempotent; a token for an already-dropped
    /// registry is a no-op.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.registry.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handlers_invoked_in_registration_order() {
        let registry: HandlerRegistry<u32> = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let _a = registry.subscribe(move |v| seen_a.lock().unwrap().push(("a", *v)));
        let seen_b = Arc::clone(&seen);
        let _b = registry.subscribe(move |v| seen_b.lock().unwrap().push(("b", *v)));

        registry.emit(&1);
        registry.emit(&2);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn test_unsubscribe_removes_handler() {
        let registry: HandlerRegistry<u32> = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_clone = Arc::clone(&count);
        let sub = registry.subscribe(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.emit(&1);
        sub.unsubscribe();
        registry.emit(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let registry: HandlerRegistry<u32> = HandlerRegistry::new();
        let registry_clone = registry.clone();
        let _outer = registry.subscribe(move |_| {
            // Late subscriber sees later emissions only
            let sub = registry_clone.subscribe(|_| {});
            sub.unsubscribe();
        });
        registry.emit(&1);
        assert_eq!(registry.len(), 1);
    }
}

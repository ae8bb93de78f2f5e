//! Broadcast event — one producer, many listeners, last value cached.
//!
//! Listeners live in an id-keyed ordered map, so dispatch follows
//! registration order and removal never depends on closure identity.
//! The registry lock is never held while a listener runs: listeners may
//! subscribe, dispose, or fire re-entrantly.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::EventError;
use crate::subscription::{ListenerId, Registration, Subscription, Unsubscribe};

pub(crate) type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    listener: Listener<E>,
    registration: Arc<Registration>,
}

struct Registry<E> {
    listeners: BTreeMap<ListenerId, Entry<E>>,
    current: Option<E>,
    disposed: bool,
}

struct EventInner<E> {
    registry: Mutex<Registry<E>>,
    next_id: AtomicU64,
}

impl<E> EventInner<E> {
    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

}

impl<E: Send> Unsubscribe for EventInner<E> {
    fn unsubscribe(&self, id: ListenerId) {
        // Dropped after the guard: the closure may own subscriptions of its own.
        let removed = self.lock().listeners.remove(&id);
        drop(removed);
    }
}

/// A broadcast event.
///
/// Cloning yields another handle to the same channel.
///
/// # Listener panics
///
/// A panicking listener is caught and logged; the remaining listeners of the
/// same fire still run, and [`fire`](Self::fire) then reports
/// [`EventError::ListenerPanicked`] once for the whole fire.
pub struct Event<E> {
    inner: Arc<EventInner<E>>,
}

impl<E> Clone for Event<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Clone + Send + 'static> Default for Event<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> Event<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventInner {
                registry: Mutex::new(Registry {
                    listeners: BTreeMap::new(),
                    current: None,
                    disposed: false,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `listener` for every future fire.
    ///
    /// Registering the same closure twice yields two independent
    /// registrations. On a disposed event the returned subscription is
    /// already disposed.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        self.subscribe_with(|_| Arc::new(listener))
    }

    /// Register a listener built with access to its own registration.
    pub(crate) fn subscribe_with(
        &self,
        build: impl FnOnce(Arc<Registration>) -> Listener<E>,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let owner = Arc::downgrade(&self.inner);
        let owner: Weak<dyn Unsubscribe> = owner;
        let registration = Registration::new(id, owner);
        let listener = build(Arc::clone(&registration));

        let mut registry = self.inner.lock();
        if registry.disposed {
            drop(registry);
            tracing::debug!(listener = id, "subscribe on disposed event; listener dropped");
            registration.dispose();
        } else {
            registry.listeners.insert(
                id,
                Entry {
                    listener,
                    registration: Arc::clone(&registration),
                },
            );
        }
        Subscription::listener(registration)
    }

    /// Cache `value`, then dispatch it to every listener registered when the
    /// fire began, in registration order.
    ///
    /// A listener disposed before its turn is skipped, including one disposed
    /// by an earlier listener of this same fire. Listeners added during the
    /// fire wait for the next one.
    ///
    /// The disposed check and the call are not atomic with respect to other
    /// threads: a `dispose()` racing on another thread may still see one
    /// in-flight invocation. A disposal that happens-before the listener's
    /// turn (same thread, or synchronized with it) always wins.
    pub fn fire(&self, value: E) -> Result<(), EventError> {
        let snapshot: Vec<(ListenerId, Listener<E>, Arc<Registration>)> = {
            let mut registry = self.inner.lock();
            if registry.disposed {
                return Err(EventError::Disposed);
            }
            registry.current = Some(value.clone());
            registry
                .listeners
                .iter()
                .map(|(id, entry)| {
                    (
                        *id,
                        Arc::clone(&entry.listener),
                        Arc::clone(&entry.registration),
                    )
                })
                .collect()
        };

        let mut panicked = 0;
        let mut first = None;
        for (id, listener, registration) in snapshot {
            if registration.is_disposed() {
                tracing::trace!(listener = id, "listener disposed mid-fire; skipped");
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener(&value))) {
                let message = panic_message(payload.as_ref());
                tracing::error!(listener = id, panic = %message, "event listener panicked");
                panicked += 1;
                first.get_or_insert(message);
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(EventError::ListenerPanicked { panicked, first }),
        }
    }

    /// The most recently fired value. Survives [`dispose`](Self::dispose).
    #[must_use]
    pub fn current(&self) -> Option<E> {
        self.inner.lock().current.clone()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Remove every listener and mark its subscription disposed. Later fires
    /// fail with [`EventError::Disposed`].
    pub fn dispose(&self) {
        let listeners = {
            let mut registry = self.inner.lock();
            registry.disposed = true;
            mem::take(&mut registry.listeners)
        };
        tracing::trace!(count = listeners.len(), "event disposed");
        for entry in listeners.values() {
            entry.registration.mark_disposed();
        }
        drop(listeners);
    }
}

impl<E> fmt::Debug for Event<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.inner.lock();
        f.debug_struct("Event")
            .field("listeners", &registry.listeners.len())
            .field("has_current", &registry.current.is_some())
            .field("disposed", &registry.disposed)
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

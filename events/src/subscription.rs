//! Subscription handles — the single disposal capability in this crate.
//!
//! Every registration (event listeners, combinators, external resources)
//! hands back a [`Subscription`]. Disposal is idempotent and takes effect
//! immediately: a listener whose subscription is disposed is never invoked
//! again, even by a fire that is already dispatching.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub(crate) type ListenerId = u64;

/// Registry side of a listener registration.
pub(crate) trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: ListenerId);
}

/// Shared state of one listener registration.
///
/// Held by the caller's [`Subscription`] and, for self-disposing combinators,
/// by the listener closure itself. Only a weak reference points back at the
/// registry so listeners never keep their event alive.
pub(crate) struct Registration {
    id: ListenerId,
    registry: Weak<dyn Unsubscribe>,
    disposed: AtomicBool,
}

impl Registration {
    pub(crate) fn new(id: ListenerId, registry: Weak<dyn Unsubscribe>) -> Arc<Self> {
        Arc::new(Self {
            id,
            registry,
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }

    /// Flag the registration without touching the registry, for a registry
    /// that already dropped the listener itself.
    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

enum Kind {
    Listener(Arc<Registration>),
    Callback(Mutex<Option<Teardown>>),
    Composite(Vec<Subscription>),
    Inert,
}

/// Disposal handle for a listener or an external resource.
///
/// Dropping a `Subscription` disposes it. Use [`detach`](Self::detach) to
/// keep the registration alive for as long as its source lives.
#[must_use = "dropping a Subscription disposes it; call `detach()` to keep the listener"]
pub struct Subscription {
    kind: Kind,
}

impl Subscription {
    pub(crate) fn listener(registration: Arc<Registration>) -> Self {
        Self {
            kind: Kind::Listener(registration),
        }
    }

    /// A subscription that runs `teardown` exactly once when disposed.
    ///
    /// This is how external sources (timers, watchers, server channels) plug
    /// into [`Resource`](crate::Resource) subscribers.
    pub fn from_fn(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind: Kind::Callback(Mutex::new(Some(Box::new(teardown)))),
        }
    }

    /// Bundle several subscriptions so they are disposed together.
    pub fn merge(parts: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            kind: Kind::Composite(parts.into_iter().collect()),
        }
    }

    /// A subscription with nothing to dispose.
    pub fn empty() -> Self {
        Self { kind: Kind::Inert }
    }

    /// Dispose the subscription. Calling this more than once has no effect.
    pub fn dispose(&self) {
        match &self.kind {
            Kind::Listener(registration) => registration.dispose(),
            Kind::Callback(teardown) => {
                let teardown = teardown
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(teardown) = teardown {
                    teardown();
                }
            }
            Kind::Composite(parts) => parts.iter().for_each(Subscription::dispose),
            Kind::Inert => {}
        }
    }

    /// Whether [`dispose`](Self::dispose) has run (for every part, if composite).
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        match &self.kind {
            Kind::Listener(registration) => registration.is_disposed(),
            Kind::Callback(teardown) => teardown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none(),
            Kind::Composite(parts) => parts.iter().all(Subscription::is_disposed),
            Kind::Inert => true,
        }
    }

    /// Give up the handle without disposing.
    ///
    /// Listeners stay registered until their event is disposed; teardown
    /// callbacks are dropped without running.
    pub fn detach(mut self) {
        if let Kind::Composite(parts) = mem::replace(&mut self.kind, Kind::Inert) {
            parts.into_iter().for_each(Subscription::detach);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Listener(registration) => format!("listener #{}", registration.id),
            Kind::Callback(_) => "callback".to_string(),
            Kind::Composite(parts) => format!("composite of {}", parts.len()),
            Kind::Inert => "inert".to_string(),
        };
        f.debug_struct("Subscription")
            .field("kind", &kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

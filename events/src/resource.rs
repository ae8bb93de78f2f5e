//! Demand-driven resources.
//!
//! A [`Resource`] adapts an external subscribe-style source into a value
//! holder that is only live while someone observes it:
//!
//! ```text
//! Inactive ──first observe()──► Active ──last Observation dropped──► Inactive
//!     │                           │
//!     └──────── dispose() ────────┴──► Disposed (terminal)
//! ```
//!
//! Activation calls the subscriber exactly once and keeps the returned
//! [`Subscription`]; deactivation disposes it exactly once. Observation is an
//! explicit reference count ([`Observation`] guards), and [`ObserverScope`]
//! lets a render pass track the resources it reads.
//!
//! Lock order is `lifecycle` before `snapshot`. The snapshot lock is never
//! held while the getter runs; the lifecycle lock is held across
//! seed/subscribe/dispose calls so transitions never interleave.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Deserialize;

use crate::error::ResourceError;
use crate::event::Event;
use crate::subscription::Subscription;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

type Subscriber<T> = Box<dyn Fn(Sink<T>) -> anyhow::Result<Subscription> + Send + Sync>;
type Getter<T> = Box<dyn Fn() -> T + Send + Sync>;

/// How [`Resource::current`] behaves when nobody observes the resource and
/// there is no getter to compute a fresh value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactiveRead {
    /// Return the last cached value (possibly `None`) and log a warning.
    #[default]
    Stale,
    /// Fail with [`ResourceError::NotObserved`].
    Strict,
}

struct Snapshot<T> {
    value: Option<T>,
    live: bool,
    disposed: bool,
}

#[derive(Default)]
struct Lifecycle {
    observers: usize,
    subscription: Option<Subscription>,
}

struct Shared<T> {
    id: u64,
    name: String,
    subscriber: Subscriber<T>,
    getter: Option<Getter<T>>,
    inactive_read: InactiveRead,
    snapshot: Mutex<Snapshot<T>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<T> Shared<T> {
    fn snapshot(&self) -> MutexGuard<'_, Snapshot<T>> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, value: T) {
        let mut snapshot = self.snapshot();
        if snapshot.live {
            let previous = snapshot.value.replace(value);
            drop(snapshot);
            drop(previous);
        } else {
            tracing::debug!(resource = %self.name, "value pushed while inactive; ignored");
        }
    }

    fn release(&self) {
        let mut lifecycle = self.lifecycle();
        lifecycle.observers = lifecycle.observers.saturating_sub(1);
        if lifecycle.observers > 0 {
            return;
        }
        let subscription = lifecycle.subscription.take();
        self.snapshot().live = false;
        if let Some(subscription) = subscription {
            tracing::debug!(resource = %self.name, "last observer left; deactivating");
            subscription.dispose();
        }
    }
}

impl<T: Send + 'static> Shared<T> {
    fn activate(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> Result<(), ResourceError> {
        if let Some(getter) = &self.getter {
            let seeded = getter();
            self.snapshot().value = Some(seeded);
        }
        self.snapshot().live = true;

        let sink = Sink {
            shared: Arc::downgrade(self),
        };
        match (self.subscriber)(sink) {
            Ok(subscription) => {
                tracing::debug!(resource = %self.name, "activated");
                lifecycle.subscription = Some(subscription);
                Ok(())
            }
            Err(source) => {
                self.snapshot().live = false;
                tracing::warn!(resource = %self.name, error = %source, "activation failed");
                Err(ResourceError::Activation {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }
}

/// A value holder whose external subscription exists only while observed.
///
/// Cloning yields another handle to the same resource.
pub struct Resource<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Resource<T> {
    /// Start building a resource around `subscriber`.
    ///
    /// The subscriber receives a [`Sink`] and returns the subscription that
    /// stops the external source. It must not push into the sink after that
    /// subscription is disposed.
    pub fn builder(
        subscriber: impl Fn(Sink<T>) -> anyhow::Result<Subscription> + Send + Sync + 'static,
    ) -> ResourceBuilder<T> {
        ResourceBuilder {
            subscriber: Box::new(subscriber),
            getter: None,
            inactive_read: InactiveRead::default(),
            name: None,
        }
    }

    /// A resource that mirrors `event` while observed.
    pub fn from_event(event: &Event<T>) -> ResourceBuilder<T> {
        let event = event.clone();
        Self::builder(move |sink| {
            Ok(event.subscribe(move |value| sink.set(value.clone())))
        })
    }

    /// Register an observer, activating the resource if it is the first.
    ///
    /// If activation fails the resource stays inactive and the error is
    /// returned; no observer is registered.
    pub fn observe(&self) -> Result<Observation<T>, ResourceError> {
        let mut lifecycle = self.shared.lifecycle();
        if self.shared.snapshot().disposed {
            return Err(ResourceError::Disposed(self.shared.name.clone()));
        }
        if lifecycle.observers == 0 {
            self.shared.activate(&mut lifecycle)?;
        }
        lifecycle.observers += 1;
        Ok(Observation {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Read the value.
    ///
    /// - Active: the latest value pushed through the sink.
    /// - Inactive with a getter: a freshly computed value; the subscriber is
    ///   not touched and nothing is cached.
    /// - Inactive without a getter: governed by [`InactiveRead`].
    /// - Disposed: [`ResourceError::Disposed`].
    pub fn current(&self) -> Result<Option<T>, ResourceError> {
        {
            let snapshot = self.shared.snapshot();
            if snapshot.disposed {
                return Err(ResourceError::Disposed(self.shared.name.clone()));
            }
            if snapshot.live {
                return Ok(snapshot.value.clone());
            }
        }

        if let Some(getter) = &self.shared.getter {
            return Ok(Some(getter()));
        }

        match self.shared.inactive_read {
            InactiveRead::Stale => {
                tracing::warn!(
                    resource = %self.shared.name,
                    "read outside of active observation; value may be stale"
                );
                Ok(self.shared.snapshot().value.clone())
            }
            InactiveRead::Strict => Err(ResourceError::NotObserved(self.shared.name.clone())),
        }
    }

    /// Read the value on behalf of `scope`, which keeps the resource observed
    /// until the scope is cleared or dropped.
    pub fn current_in(&self, scope: &ObserverScope) -> Result<Option<T>, ResourceError> {
        if !scope.is_tracking(self.shared.id) {
            let observation = self.observe()?;
            scope.track(self.shared.id, Box::new(observation));
        }
        self.current()
    }

    /// Deactivate if needed and refuse any further use.
    pub fn dispose(&self) {
        let mut lifecycle = self.shared.lifecycle();
        {
            let mut snapshot = self.shared.snapshot();
            if snapshot.disposed {
                return;
            }
            snapshot.disposed = true;
            snapshot.live = false;
        }
        if let Some(subscription) = lifecycle.subscription.take() {
            tracing::debug!(resource = %self.shared.name, "disposed while active");
            subscription.dispose();
        }
    }
}

impl<T> Resource<T> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.snapshot().live
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.snapshot().disposed
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.shared.lifecycle().observers
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.shared.name)
            .field("active", &self.is_active())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

pub struct ResourceBuilder<T> {
    subscriber: Subscriber<T>,
    getter: Option<Getter<T>>,
    inactive_read: InactiveRead,
    name: Option<String>,
}

impl<T: Clone + Send + 'static> ResourceBuilder<T> {
    /// Synchronous fallback used for inactive reads and [`Sink::refresh`].
    pub fn getter(mut self, getter: impl Fn() -> T + Send + Sync + 'static) -> Self {
        self.getter = Some(Box::new(getter));
        self
    }

    pub fn inactive_read(mut self, policy: InactiveRead) -> Self {
        self.inactive_read = policy;
        self
    }

    /// Name used in logs and errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Resource<T> {
        let id = NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed);
        Resource {
            shared: Arc::new(Shared {
                id,
                name: self.name.unwrap_or_else(|| format!("resource#{id}")),
                subscriber: self.subscriber,
                getter: self.getter,
                inactive_read: self.inactive_read,
                snapshot: Mutex::new(Snapshot {
                    value: None,
                    live: false,
                    disposed: false,
                }),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }
}

impl<T> fmt::Debug for ResourceBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBuilder")
            .field("name", &self.name)
            .field("has_getter", &self.getter.is_some())
            .field("inactive_read", &self.inactive_read)
            .finish_non_exhaustive()
    }
}

/// Write side handed to a resource's subscriber.
///
/// Writes are ignored unless the resource is active.
pub struct Sink<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> Sink<T> {
    /// Replace the resource's value.
    pub fn set(&self, value: T) {
        if let Some(shared) = self.shared.upgrade() {
            shared.store(value);
        }
    }

    /// Recompute the value through the resource's getter.
    pub fn refresh(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match &shared.getter {
            Some(getter) => {
                let value = getter();
                shared.store(value);
            }
            None => {
                tracing::warn!(resource = %shared.name, "refresh requested without a getter");
            }
        }
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// One registered observer. Dropping it releases the observation.
#[must_use = "dropping an Observation releases it immediately"]
pub struct Observation<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone> Observation<T> {
    /// The latest value; `None` until the source pushes one. Fails once the
    /// resource is disposed, even though this observation is still held.
    pub fn current(&self) -> Result<Option<T>, ResourceError> {
        let snapshot = self.shared.snapshot();
        if snapshot.disposed {
            return Err(ResourceError::Disposed(self.shared.name.clone()));
        }
        Ok(snapshot.value.clone())
    }
}

impl<T> Drop for Observation<T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

impl<T> fmt::Debug for Observation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("resource", &self.shared.name)
            .finish()
    }
}

/// Observation tracking for one reactive context (e.g. a panel render pass).
///
/// Resources read through [`Resource::current_in`] stay observed, once per
/// resource, until the scope is cleared or dropped.
#[derive(Default)]
pub struct ObserverScope {
    observations: Mutex<HashMap<u64, Box<dyn Send>>>,
}

impl ObserverScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn observations(&self) -> MutexGuard<'_, HashMap<u64, Box<dyn Send>>> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_tracking(&self, resource: u64) -> bool {
        self.observations().contains_key(&resource)
    }

    fn track(&self, resource: u64, observation: Box<dyn Send>) {
        let duplicate = {
            let mut observations = self.observations();
            if observations.contains_key(&resource) {
                Some(observation)
            } else {
                observations.insert(resource, observation);
                None
            }
        };
        drop(duplicate);
    }

    /// Number of resources currently observed through this scope.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations().is_empty()
    }

    /// Release every observation held by this scope.
    pub fn clear(&self) {
        let released = mem::take(&mut *self.observations());
        drop(released);
    }
}

impl fmt::Debug for ObserverScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverScope")
            .field("observed", &self.len())
            .finish()
    }
}

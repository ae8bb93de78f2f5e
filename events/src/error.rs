//! Error types for events and demand-driven resources.

use thiserror::Error;

/// Failure reported by [`Event::fire`](crate::Event::fire).
#[derive(Debug, Error)]
pub enum EventError {
    /// The event was disposed; nothing is dispatched.
    #[error("event has been disposed")]
    Disposed,
    /// One or more listeners panicked. Every other listener still ran.
    #[error("{panicked} listener(s) panicked during fire; first: {first}")]
    ListenerPanicked { panicked: usize, first: String },
}

/// Failure reported by [`Resource`](crate::Resource) reads and observations.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource `{0}` has been disposed")]
    Disposed(String),
    /// Strict resources refuse reads while nobody observes them.
    #[error("resource `{0}` was read outside of active observation")]
    NotObserved(String),
    /// The external subscriber failed to start; the resource stays inactive.
    #[error("failed to activate resource `{name}`")]
    Activation {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

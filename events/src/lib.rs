//! Event and demand-driven resource coordination for live panel state.
//!
//! Server status, goal state and selection reach the panel through a few
//! small primitives:
//!
//! - [`Event`] broadcasts a value to many listeners and caches the last one.
//! - [`on_next_event`] / [`on_event_while`] build restricted listeners on top.
//! - [`without_reentrancy`] / [`action_without_reentrancy`] collapse bursts of
//!   triggers into at most one in-flight async execution.
//! - [`combine`] merges two filtered events into one stream.
//! - [`Resource`] turns a subscribe-style source into a value that is only
//!   live while observed.
//!
//! Every registration returns a [`Subscription`]; disposal is the only
//! cancellation primitive and takes effect immediately.
//!
//! ```text
//! producer ──fire()──► Event ──► listeners / combinators / combine()
//!                        │
//!                        └──► Resource (live while observed) ──► current()
//! ```

mod combinators;
mod combine;
mod error;
mod event;
mod guard;
mod resource;
mod subscription;

pub use combinators::{Flow, on_event_while, on_next_event};
pub use combine::combine;
pub use error::{EventError, ResourceError};
pub use event::Event;
pub use guard::{WithoutReentrancy, action_without_reentrancy, without_reentrancy};
pub use resource::{InactiveRead, Observation, ObserverScope, Resource, ResourceBuilder, Sink};
pub use subscription::Subscription;

//! Restricted subscriptions built on [`Event`]: one-shot and conditional.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::event::{Event, panic_message};
use crate::subscription::Subscription;

/// Whether an [`on_event_while`] listener wants further values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Invoke `listener` with the next fired value only.
///
/// The subscription is disposed before the listener runs, so a listener that
/// fires the same event re-entrantly is not called again. Dispose the
/// returned handle to cancel before any fire.
pub fn on_next_event<E>(
    event: &Event<E>,
    listener: impl FnOnce(&E) + Send + 'static,
) -> Subscription
where
    E: Clone + Send + 'static,
{
    let pending = Mutex::new(Some(listener));
    event.subscribe_with(move |registration| {
        Arc::new(move |value: &E| {
            registration.dispose();
            let listener = pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(listener) = listener {
                listener(value);
            }
        })
    })
}

/// Feed every fired value to an async `listener` until it returns
/// [`Flow::Stop`].
///
/// Fires are queued in order and awaited one at a time on a dedicated tokio
/// task. After `Stop` the subscription is disposed and values still queued
/// are discarded, so no invocation follows the one that stopped.
///
/// Invocations never overlap: a slow listener delays every value fired after
/// the one it is handling. Spawn from inside the listener if later values
/// must not wait.
///
/// A panicking invocation is logged and disposes the subscription, like
/// `Stop`.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn on_event_while<E, F, Fut>(event: &Event<E>, listener: F) -> Subscription
where
    E: Clone + Send + 'static,
    F: Fn(E) -> Fut + Send + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<E>();
    event.subscribe_with(move |registration| {
        let worker_registration = Arc::clone(&registration);
        tokio::spawn(async move {
            let registration = worker_registration;
            while let Some(value) = rx.recv().await {
                if registration.is_disposed() {
                    break;
                }
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                    Ok(pending) => AssertUnwindSafe(pending).catch_unwind().await,
                    Err(payload) => Err(payload),
                };
                match outcome {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => {
                        tracing::trace!("on_event_while listener stopped");
                        registration.dispose();
                        break;
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(
                            panic = %message,
                            "on_event_while listener panicked; unsubscribing"
                        );
                        registration.dispose();
                        break;
                    }
                }
            }
        });
        Arc::new(move |value: &E| {
            if tx.send(value.clone()).is_err() {
                tracing::debug!("on_event_while worker gone; unsubscribing");
                registration.dispose();
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_on_next_event_fires_once() {
        let event = Event::<u8>::new();
        let calls = counter();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            on_next_event(&event, move |v| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(*v);
            })
        };

        event.fire(1).unwrap();
        event.fire(2).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(event.listener_count(), 0);
    }

    #[test]
    fn test_on_next_event_survives_reentrant_fire() {
        let event = Event::<u8>::new();
        let calls = counter();

        let _sub = {
            let calls = Arc::clone(&calls);
            let event_inner = event.clone();
            on_next_event(&event, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                event_inner.fire(99).unwrap();
            })
        };

        event.fire(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.current(), Some(99));
    }

    #[test]
    fn test_on_next_event_cancelled_before_fire() {
        let event = Event::<u8>::new();
        let calls = counter();
        let sub = {
            let calls = Arc::clone(&calls);
            on_next_event(&event, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        sub.dispose();
        event.fire(1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_on_event_while_stops_on_third_of_five() {
        let event = Event::<u32>::new();
        let calls = counter();

        let sub = {
            let calls = Arc::clone(&calls);
            on_event_while(&event, move |v| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if v == 3 { Flow::Stop } else { Flow::Continue }
                }
            })
        };

        for v in 1..=5 {
            event.fire(v).unwrap();
        }
        // Let the worker drain its queue.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(sub.is_disposed());
        assert_eq!(event.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_event_while_dispatches_fires_during_pending_invocation() {
        let event = Event::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let seen = Arc::clone(&seen);
            on_event_while(&event, move |v| {
                let seen = Arc::clone(&seen);
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    seen.lock().unwrap().push(v);
                    Flow::Continue
                }
            })
        };

        event.fire(1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        event.fire(2).unwrap();
        event.fire(3).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_on_event_while_panicking_listener_unsubscribes() {
        let event = Event::<u32>::new();
        let calls = counter();

        let sub = {
            let calls = Arc::clone(&calls);
            on_event_while(&event, move |v| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    assert_ne!(v, 1, "listener failed on first value");
                    Flow::Continue
                }
            })
        };

        event.fire(1).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(sub.is_disposed());
        assert_eq!(event.listener_count(), 0);
        assert!(event.fire(2).is_ok());
        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_event_while_slow_listener_delays_later_values() {
        let event = Event::<u32>::new();
        let start = tokio::time::Instant::now();
        let handled = Arc::new(Mutex::new(Vec::new()));

        let _sub = {
            let handled = Arc::clone(&handled);
            on_event_while(&event, move |v| {
                let handled = Arc::clone(&handled);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    handled.lock().unwrap().push((v, start.elapsed()));
                    Flow::Continue
                }
            })
        };

        event.fire(1).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        event.fire(2).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let handled = handled.lock().unwrap();
        assert_eq!(handled.len(), 2);
        assert_eq!(handled[1].0, 2);
        assert!(handled[1].1 >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_on_event_while_disposed_by_caller() {
        let event = Event::<u32>::new();
        let calls = counter();

        let sub = {
            let calls = Arc::clone(&calls);
            on_event_while(&event, move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Flow::Continue
                }
            })
        };

        event.fire(1).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        sub.dispose();
        assert!(matches!(event.fire(2), Ok(())));
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

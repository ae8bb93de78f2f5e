//! Reentrancy guards for async actions.
//!
//! A guarded action has at most one execution in flight. A call that arrives
//! while one is running does not queue: it resolves at once with the
//! configured fallback and never touches the action.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// An async action that refuses to overlap with itself.
///
/// The busy flag belongs to this instance, so independent guarded actions
/// never block each other. Share one instance (e.g. behind an `Arc`) between
/// the triggers that must not overlap.
pub struct WithoutReentrancy<F, T> {
    action: F,
    fallback: T,
    busy: AtomicBool,
}

/// Wrap `action` so overlapping calls return `fallback` instead of running.
pub fn without_reentrancy<F, Fut, T>(fallback: T, action: F) -> WithoutReentrancy<F, T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
    T: Clone,
{
    WithoutReentrancy {
        action,
        fallback,
        busy: AtomicBool::new(false),
    }
}

/// [`without_reentrancy`] for actions with no result: overlapping calls are
/// dropped.
pub fn action_without_reentrancy<F, Fut>(action: F) -> WithoutReentrancy<F, ()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    without_reentrancy((), action)
}

impl<F, Fut, T> WithoutReentrancy<F, T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
    T: Clone,
{
    /// Run the action, or return the fallback if a previous call has not
    /// settled yet.
    ///
    /// The flag is released however the action ends: normal return, error
    /// value, panic, or the returned future being dropped mid-flight.
    pub async fn call(&self) -> T {
        let Some(_busy) = BusyFlag::acquire(&self.busy) else {
            tracing::trace!("guarded action already in flight; returning fallback");
            return self.fallback.clone();
        };
        (self.action)().await
    }
}

impl<F, T> WithoutReentrancy<F, T> {
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl<F, T: fmt::Debug> fmt::Debug for WithoutReentrancy<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithoutReentrancy")
            .field("fallback", &self.fallback)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::sync::Notify;
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_call_returns_fallback_immediately() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guarded = {
            let runs = Arc::clone(&runs);
            without_reentrancy("skipped", move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    "ran"
                }
            })
        };

        let start = Instant::now();
        let (first, (second, second_at)) = tokio::join!(guarded.call(), async {
            sleep(Duration::from_millis(10)).await;
            let result = guarded.call().await;
            (result, start.elapsed())
        });

        assert_eq!(first, "ran");
        assert_eq!(second, "skipped");
        assert!(second_at < Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!guarded.is_busy());
    }

    #[tokio::test]
    async fn test_sequential_calls_both_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guarded = {
            let runs = Arc::clone(&runs);
            action_without_reentrancy(move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        guarded.call().await;
        guarded.call().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_result_releases_guard() {
        let guarded = without_reentrancy(Ok(0), || async { Err::<u32, String>("boom".into()) });

        assert_eq!(guarded.call().await, Err("boom".to_string()));
        assert!(!guarded.is_busy());
        assert_eq!(guarded.call().await, Err("boom".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_action_releases_guard() {
        let guarded = Arc::new(action_without_reentrancy(|| async {
            panic!("action failed");
        }));

        let task = {
            let guarded = Arc::clone(&guarded);
            tokio::spawn(async move { guarded.call().await })
        };
        assert!(task.await.is_err());
        assert!(!guarded.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_call_releases_guard() {
        let gate = Arc::new(Notify::new());
        let guarded = {
            let gate = Arc::clone(&gate);
            action_without_reentrancy(move || {
                let gate = Arc::clone(&gate);
                async move { gate.notified().await }
            })
        };

        let in_flight = tokio::time::timeout(Duration::from_millis(5), guarded.call()).await;
        assert!(in_flight.is_err());
        assert!(!guarded.is_busy());
    }

    #[tokio::test]
    async fn test_independent_guards_do_not_interfere() {
        let gate = Arc::new(Notify::new());
        let slow = {
            let gate = Arc::clone(&gate);
            without_reentrancy(false, move || {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    true
                }
            })
        };
        let fast = without_reentrancy(false, || async { true });

        let (slow_result, fast_result) = tokio::join!(slow.call(), async {
            let result = fast.call().await;
            gate.notify_one();
            result
        });
        assert!(slow_result);
        assert!(fast_result);
    }
}

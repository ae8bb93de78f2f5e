//! Merge two filtered events into one derived stream.

use crate::error::EventError;
use crate::event::Event;
use crate::subscription::Subscription;

/// Build an event that re-fires every value of `a` passing `filter_a` and
/// every value of `b` passing `filter_b`, in the order they were fired.
///
/// The returned subscription owns both inner subscriptions; disposing it
/// stops all further merged fires even while `a` and `b` keep firing.
pub fn combine<E>(
    a: &Event<E>,
    filter_a: impl Fn(&E) -> bool + Send + Sync + 'static,
    b: &Event<E>,
    filter_b: impl Fn(&E) -> bool + Send + Sync + 'static,
) -> (Event<E>, Subscription)
where
    E: Clone + Send + 'static,
{
    let merged = Event::new();
    let from_a = forward(a, filter_a, &merged);
    let from_b = forward(b, filter_b, &merged);
    (merged, Subscription::merge([from_a, from_b]))
}

fn forward<E>(
    source: &Event<E>,
    filter: impl Fn(&E) -> bool + Send + Sync + 'static,
    target: &Event<E>,
) -> Subscription
where
    E: Clone + Send + 'static,
{
    let target = target.clone();
    source.subscribe(move |value| {
        if !filter(value) {
            return;
        }
        match target.fire(value.clone()) {
            Ok(()) => {}
            // Each panic was already logged by the merged event.
            Err(EventError::ListenerPanicked { .. }) => {}
            Err(EventError::Disposed) => {
                tracing::debug!("merged event disposed; forwarded value dropped");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Change {
        Selection(u32),
        Text(u32),
    }

    fn collect(event: &Event<Change>) -> (Arc<Mutex<Vec<Change>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = {
            let seen = Arc::clone(&seen);
            event.subscribe(move |c| seen.lock().unwrap().push(c.clone()))
        };
        (seen, sub)
    }

    #[test]
    fn test_combine_forwards_qualifying_fires_in_call_order() {
        let selection = Event::<Change>::new();
        let text = Event::<Change>::new();
        let (merged, _teardown) = combine(
            &selection,
            |c| matches!(c, Change::Selection(line) if *line > 0),
            &text,
            |_| true,
        );
        let (seen, _sub) = collect(&merged);

        selection.fire(Change::Selection(1)).unwrap();
        text.fire(Change::Text(2)).unwrap();
        selection.fire(Change::Selection(0)).unwrap();
        selection.fire(Change::Selection(3)).unwrap();
        text.fire(Change::Text(4)).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Change::Selection(1),
                Change::Text(2),
                Change::Selection(3),
                Change::Text(4),
            ]
        );
        assert_eq!(merged.current(), Some(Change::Text(4)));
    }

    #[test]
    fn test_disposing_combiner_stops_merged_fires() {
        let a = Event::<Change>::new();
        let b = Event::<Change>::new();
        let (merged, teardown) = combine(&a, |_| true, &b, |_| true);
        let (seen, _sub) = collect(&merged);

        a.fire(Change::Text(1)).unwrap();
        teardown.dispose();
        a.fire(Change::Text(2)).unwrap();
        b.fire(Change::Text(3)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Change::Text(1)]);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 0);
    }

    #[test]
    fn test_disposed_merged_event_does_not_break_sources() {
        let a = Event::<Change>::new();
        let b = Event::<Change>::new();
        let (merged, _teardown) = combine(&a, |_| true, &b, |_| true);
        merged.dispose();

        assert!(a.fire(Change::Selection(1)).is_ok());
    }
}

//! In-process publish/subscribe for "go refetch" signals.
//!
//! Delivery is synchronous, on the publishing thread, in registration order.
//! There is no persistence or replay: a late subscriber misses earlier events.
//! A handler that panics is logged and skipped; the remaining handlers still
//! run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Orders appeared or grew in the active set.
    NewOrder,
    /// Some server state changed (e.g. printed flags) and views should re-sync.
    StateChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BusEvent {
    NewOrder {
        new_order_ids: Vec<i64>,
        grown_order_ids: Vec<i64>,
    },
    StateChanged {
        source: &'static str,
    },
}

impl BusEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BusEvent::NewOrder { .. } => Topic::NewOrder,
            BusEvent::StateChanged { .. } => Topic::StateChanged,
        }
    }
}

pub type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

/// Returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.push(Subscriber {
            id,
            topic,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns `false` when `id` was not subscribed to `topic`.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| !(s.id == id && s.topic == topic));
        subscribers.len() != before
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Deliver `event` to every current subscriber of its topic. Returns the
    /// number of handlers that completed without panicking.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();
        // Snapshot the handler list so handlers may (un)subscribe re-entrantly.
        let handlers: Vec<Handler> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| s.handler.clone())
            .collect();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(topic = ?topic, "Event handler panicked"),
            }
        }
        debug!(topic = ?topic, delivered, "Published event");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed() -> BusEvent {
        BusEvent::StateChanged { source: "test" }
    }

    #[test]
    fn test_delivery_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = seen.clone();
            bus.subscribe(Topic::StateChanged, move |_| seen.lock().unwrap().push(n));
        }
        assert_eq!(bus.publish(state_changed()), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.subscribe(Topic::NewOrder, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.publish(state_changed()), 0);
        bus.publish(BusEvent::NewOrder {
            new_order_ids: vec![1],
            grown_order_ids: vec![],
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        bus.subscribe(Topic::StateChanged, |_| panic!("boom"));
        let h = hits.clone();
        bus.subscribe(Topic::StateChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.publish(state_changed()), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        let id = bus.subscribe(Topic::StateChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!bus.unsubscribe(Topic::NewOrder, id));
        assert!(bus.unsubscribe(Topic::StateChanged, id));
        assert!(!bus.unsubscribe(Topic::StateChanged, id));
        bus.publish(state_changed());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(Topic::StateChanged), 0);
    }

    #[test]
    fn test_late_subscriber_misses_past_events() {
        let bus = EventBus::new();
        bus.publish(state_changed());
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        bus.subscribe(Topic::StateChanged, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

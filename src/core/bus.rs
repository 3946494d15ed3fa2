//! In-process event bus.
//!
//! Handlers subscribe to an event type and are invoked synchronously, in
//! subscription order, for every published event of that type. A failing
//! or panicking handler is logged and does not affect delivery to the
//! remaining handlers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, error};

use crate::domain::Event;

/// A consumer of published events
pub trait EventHandler: Send + Sync {
    /// Handle one event; the event must not be mutated
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// Identifies one subscription for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome counts of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handlers that returned successfully
    pub delivered: usize,

    /// Handlers that returned an error or panicked
    pub failed: usize,
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
}

/// Publish/subscribe bus keyed by event type
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event_type = event_type.into();

        debug!(event_type = %event_type, subscription = id.0, "Subscribed handler");

        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event_type)
            .or_default()
            .push(Subscription { id, handler });
        id
    }

    /// Register a closure for an event type
    pub fn subscribe_fn<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event_type, Arc::new(handler))
    }

    /// Remove a subscription; returns false if it was not present
    pub fn unsubscribe(&self, event_type: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());

        let Some(list) = subscribers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(event_type);
        }
        removed
    }

    /// Number of handlers subscribed to an event type
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Deliver an event to every handler subscribed to its type
    pub fn publish(&self, event: &Event) -> DeliveryReport {
        // Snapshot so handlers can (un)subscribe without deadlocking
        let snapshot: Vec<Subscription> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        debug!(
            event_type = %event.event_type,
            event_id = %event.id,
            handlers = snapshot.len(),
            "Publishing event"
        );

        let mut report = DeliveryReport::default();

        for subscription in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscription.handler.handle(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(
                        event_type = %event.event_type,
                        event_id = %event.id,
                        subscription = subscription.id.0,
                        error = %e,
                        "Event delivery failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    error!(
                        event_type = %event.event_type,
                        event_id = %event.id,
                        subscription = subscription.id.0,
                        "Event handler panicked"
                    );
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_no_subscribers() {
        let bus = EventBus::new();
        let report = bus.publish(&Event::new("order_placed", "test"));
        assert_eq!(report, DeliveryReport::default());
    }

    #[test]
    fn test_only_matching_type_delivered() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.subscribe_fn("order_placed", move |e: &Event| {
            sink.lock().unwrap().push(e.event_type.clone());
            Ok(())
        });

        bus.publish(&Event::new("order_shipped", "test"));
        bus.publish(&Event::new("order_placed", "test"));

        assert_eq!(*seen.lock().unwrap(), vec!["order_placed".to_string()]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe_fn("deal_won", |_: &Event| Ok(()));
        assert_eq!(bus.subscriber_count("deal_won"), 1);

        assert!(bus.unsubscribe("deal_won", id));
        assert_eq!(bus.subscriber_count("deal_won"), 0);

        // No-op when absent
        assert!(!bus.unsubscribe("deal_won", id));
        assert!(!bus.unsubscribe("never_seen", id));
    }

    #[test]
    fn test_handler_may_subscribe_during_delivery() {
        let bus = Arc::new(EventBus::new());

        let inner = Arc::clone(&bus);
        bus.subscribe_fn("ping", move |_: &Event| {
            inner.subscribe_fn("pong", |_: &Event| Ok(()));
            Ok(())
        });

        let report = bus.publish(&Event::new("ping", "test"));
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.subscriber_count("pong"), 1);
    }
}

//! Event Bus Integration Tests
//!
//! Delivery order and failure isolation.

use std::sync::{Arc, Mutex};

use bizflow::core::{DeliveryReport, EventHandler};
use bizflow::{Event, EventBus};

/// Handler that records its label, then optionally fails
struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
}

impl EventHandler for Recorder {
    fn handle(&self, _event: &Event) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(self.label);
        if self.fail {
            anyhow::bail!("{} refused the event", self.label);
        }
        Ok(())
    }
}

fn recorder(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> Arc<Recorder> {
    Arc::new(Recorder {
        label,
        log: Arc::clone(log),
        fail,
    })
}

#[test]
fn test_handlers_invoked_in_subscription_order() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe("order_placed", recorder("h1", &log, false));
    bus.subscribe("order_placed", recorder("h2", &log, false));

    let report = bus.publish(&Event::new("order_placed", "shop"));

    assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    assert_eq!(report, DeliveryReport { delivered: 2, failed: 0 });
}

#[test]
fn test_failing_handler_does_not_block_later_handlers() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe("order_placed", recorder("h1", &log, true));
    bus.subscribe("order_placed", recorder("h2", &log, false));

    let report = bus.publish(&Event::new("order_placed", "shop"));

    assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
}

#[test]
fn test_panicking_handler_is_isolated() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.subscribe_fn("order_placed", |_: &Event| -> anyhow::Result<()> {
        panic!("handler bug");
    });
    bus.subscribe("order_placed", recorder("h2", &log, false));

    let report = bus.publish(&Event::new("order_placed", "shop"));

    assert_eq!(*log.lock().unwrap(), vec!["h2"]);
    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
}

#[test]
fn test_handlers_see_the_published_event() {
    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&seen);
    bus.subscribe_fn("deal_won", move |e: &Event| {
        *sink.lock().unwrap() = Some(e.clone());
        Ok(())
    });

    let event = Event::new("deal_won", "crm").with_field("amount", serde_json::json!(1200));
    bus.publish(&event);

    assert_eq!(seen.lock().unwrap().as_ref(), Some(&event));
}

#[test]
fn test_unsubscribed_handler_no_longer_called() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = bus.subscribe("order_placed", recorder("h1", &log, false));
    bus.subscribe("order_placed", recorder("h2", &log, false));
    assert!(bus.unsubscribe("order_placed", first));

    bus.publish(&Event::new("order_placed", "shop"));
    assert_eq!(*log.lock().unwrap(), vec!["h2"]);
}

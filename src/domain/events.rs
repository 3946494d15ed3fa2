//! Events published on the bus.
//!
//! An event is the only payload crossing from trigger sources (webhooks,
//! schedules, chat mentions, inbox files) into the orchestration core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// An immutable notification delivered to subscribers of its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Type tag used for routing (e.g. "order_placed")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Originating integration or subsystem
    pub source: String,

    /// Arbitrary payload
    #[serde(default)]
    pub data: Map<String, Value>,

    /// When the event was created
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            data: Map::new(),
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
        }
    }

    /// Attach a payload
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Add one payload field
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new("order_placed", "shopify").with_field("order_id", json!(1042));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("order_placed"));
        assert_eq!(value["source"], json!("shopify"));
        assert_eq!(value["data"]["order_id"], json!(1042));
        assert!(value.get("id").is_some());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_event_defaults_on_parse() {
        // Inbox files usually omit id and timestamp
        let event: Event =
            serde_json::from_str(r#"{"type": "deal_won", "source": "crm"}"#).unwrap();

        assert_eq!(event.event_type, "deal_won");
        assert!(event.data.is_empty());
    }
}

//! Fire-and-forget events for chaining workflows
//!
//! Engines emit an event only after their store writes commit; the
//! orchestrator turns each event into a new workflow run. Delivery is
//! at-least-once, so every consumer must tolerate duplicates.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A named event with a JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event name (the workflow trigger)
    pub name: String,

    /// Event payload
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Where emitted events go
///
/// Implementations are fire-and-forget: failures are logged inside the
/// sink and never propagate to the emitting engine.
pub trait EventSink: Send + Sync {
    /// Emit an event
    fn send(&self, event: Event);
}

/// In-memory sink that queues events for inspection
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Take all queued events
    pub fn drain(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock())
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn send(&self, event: Event) {
        tracing::debug!(event = %event.name, "Event queued");
        self.events.lock().push(event);
    }
}

/// Sink that drops every event (for wiring without an orchestrator)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, event: Event) {
        tracing::debug!(event = %event.name, "Event dropped (no sink configured)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_queues_and_drains() {
        let sink = MemorySink::new();
        sink.send(Event::new("top-up-credited", json!({"merchant": "m1"})));
        sink.send(Event::new("shipment-confirmed", json!({"order": "o1"})));

        assert_eq!(sink.len(), 2);
        let events = sink.drain();
        assert_eq!(events[0].name, "top-up-credited");
        assert_eq!(events[1].name, "shipment-confirmed");
        assert!(sink.is_empty());
    }
}

//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the hand-off point between state producers (scheduler,
//! script executions) and the WebSocket broker. Publishing never blocks and
//! never fails: with no subscriber the event is dropped, and a slow
//! subscriber observes `RecvError::Lagged` instead of slowing the producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::channels;

// ---------------------------------------------------------------------------
// BusEvent
// ---------------------------------------------------------------------------

/// A state change addressed to one broker channel.
///
/// `message_type` is one of the `MSG_*` constants in [`channels`] and
/// becomes the `type` field of the server message; `data` is sent verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    /// Broker channel, e.g. `"nodes"` or `"job:42"`.
    pub channel: String,

    /// Server message type, e.g. `"job_update"`.
    pub message_type: String,

    /// Message payload.
    pub data: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl BusEvent {
    /// Create an event with an empty object payload.
    pub fn new(channel: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            message_type: message_type.into(),
            data: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// A `job_update` on the job's own channel.
    pub fn job_update(job_id: stampede_core::types::DbId, data: serde_json::Value) -> Self {
        Self::new(channels::job(job_id), channels::MSG_JOB_UPDATE).with_data(data)
    }

    /// Set the JSON payload for the event.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Re-address the same payload to another channel.
    pub fn on_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use stampede_events::{BusEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(BusEvent::new("nodes", "node_update"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: BusEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::job_update(
            42,
            serde_json::json!({"status": "RUNNING"}),
        ));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.channel, "job:42");
        assert_eq!(received.message_type, channels::MSG_JOB_UPDATE);
        assert_eq!(received.data["status"], "RUNNING");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BusEvent::new(channels::NODES, channels::MSG_NODE_UPDATE));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.channel, "nodes");
        assert_eq!(e2.channel, "nodes");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(BusEvent::new(channels::SYSTEM, channels::MSG_SYSTEM_METRICS));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn on_channel_keeps_payload() {
        let event = BusEvent::job_update(7, serde_json::json!({"x": 1})).on_channel(channels::JOBS);
        assert_eq!(event.channel, "jobs");
        assert_eq!(event.message_type, channels::MSG_JOB_UPDATE);
        assert_eq!(event.data["x"], 1);
    }
}

//! One-way publish interface to realtime subscribers. Delivery is best effort:
//! nothing published here can fail an audit write or a business call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const AUDIT_RECORDED: &str = "audit.recorded";
pub const SECURITY_DENIED: &str = "security.denied";

const DEFAULT_CAPACITY: usize = 1024;

pub trait NotificationRelay: Send + Sync {
    fn publish(&self, kind: &str, payload: Value);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: Uuid,
    pub kind: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

impl RelayEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            occurred_at: Utc::now(),
            payload,
        }
    }
}

/// Fans events out to every live subscriber over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    sender: broadcast::Sender<RelayEvent>,
}

impl BroadcastRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl NotificationRelay for BroadcastRelay {
    fn publish(&self, kind: &str, payload: Value) {
        // Err only means nobody is listening.
        if let Err(err) = self.sender.send(RelayEvent::new(kind, payload)) {
            tracing::debug!(kind, error = %err, "relay event dropped");
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRelay;

impl NotificationRelay for NoopRelay {
    fn publish(&self, _kind: &str, _payload: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let relay = BroadcastRelay::default();
        let mut rx = relay.subscribe();

        relay.publish(AUDIT_RECORDED, json!({"action": "request.create"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, AUDIT_RECORDED);
        assert_eq!(event.payload["action"], json!("request.create"));
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let relay = BroadcastRelay::new(4);
        assert_eq!(relay.subscriber_count(), 0);
        relay.publish(SECURITY_DENIED, json!({}));
        NoopRelay.publish(SECURITY_DENIED, json!({}));
    }
}

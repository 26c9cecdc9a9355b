//! Broker wire format.
//!
//! Clients send `{ "type": "auth"|"subscribe"|"unsubscribe"|"ping", "data": ... }`;
//! the server sends `{ "type", "data", "timestamp" }`.

use axum::extract::ws::Message;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stampede_core::types::{DbId, Timestamp};
use stampede_events::{channels, BusEvent};

/// Close code sent when the handshake fails authentication.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth { token: String },
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
    pub timestamp: Timestamp,
}

impl ServerMessage {
    pub fn new(message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn welcome(client_id: &str, user_id: DbId, role: &str) -> Self {
        Self::new(
            channels::MSG_WELCOME,
            json!({ "client_id": client_id, "user_id": user_id, "role": role }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(channels::MSG_HEARTBEAT, json!({}))
    }

    pub fn subscription_confirmed(channel: &str, subscribed: bool) -> Self {
        Self::new(
            channels::MSG_SUBSCRIPTION_CONFIRMED,
            json!({ "channel": channel, "subscribed": subscribed }),
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(channels::MSG_ERROR, json!({ "message": message.into() }))
    }

    /// Error answering a request about `channel`.
    pub fn channel_error(channel: &str, message: impl Into<String>) -> Self {
        Self::new(
            channels::MSG_ERROR,
            json!({ "channel": channel, "message": message.into() }),
        )
    }

    /// Encode as a text frame.
    pub fn to_ws(&self) -> Message {
        let text = serde_json::to_string(self).unwrap_or_default();
        Message::Text(text.into())
    }
}

impl From<&BusEvent> for ServerMessage {
    fn from(event: &BusEvent) -> Self {
        Self {
            message_type: event.message_type.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_messages() {
        let sub: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","data":{"channel":"job:123"}}"#).unwrap();
        assert_eq!(sub, ClientMessage::Subscribe { channel: "job:123".into() });

        let auth: ClientMessage =
            serde_json::from_str(r#"{"type":"auth","data":{"token":"abc"}}"#).unwrap();
        assert_eq!(auth, ClientMessage::Auth { token: "abc".into() });

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn rejects_unknown_client_message() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shout","data":{}}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn server_message_shape() {
        let msg = ServerMessage::subscription_confirmed("nodes", true);
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "subscription_confirmed");
        assert_eq!(json["data"]["channel"], "nodes");
        assert_eq!(json["data"]["subscribed"], true);
        assert!(json["timestamp"].is_string());
    }
}

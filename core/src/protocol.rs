//! WebSocket wire protocol
//!
//! Every frame is a JSON [`MessageEnvelope`]. Clients send [`ClientMessage`]s,
//! the server answers with [`ServerEvent`]s. `Reply` belongs to the turn the
//! client just sent; `Proactive` arrives whenever a notification is pushed
//! into the conversation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::Participant;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MessageEnvelope<T> {
    pub v: u32,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub request_id: Option<Uuid>,
    pub event_id: Option<u64>,
    pub payload: T,
}

impl<T> MessageEnvelope<T> {
    pub fn request(payload: T) -> Self {
        Self {
            v: 1,
            msg_type: "request".to_string(),
            request_id: Some(Uuid::new_v4()),
            event_id: None,
            payload,
        }
    }

    pub fn event(event_id: u64, payload: T) -> Self {
        Self {
            v: 1,
            msg_type: "event".to_string(),
            request_id: None,
            event_id: Some(event_id),
            payload,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens (or reattaches to) a conversation
    Hello {
        client: ClientInfo,
        user: Participant,
        /// Reattach to an earlier conversation instead of starting a new one
        #[serde(default)]
        conversation_id: Option<String>,
    },
    /// Free text turn
    Message { text: String },
    /// Structured event turn, e.g. `notifyEvent`
    Event {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    HelloAck {
        server: ServerInfo,
        conversation_id: String,
    },
    /// Answer to the client's last turn
    Reply { text: String },
    /// Message pushed into the conversation outside of any client turn
    Proactive { turn_id: Uuid, text: String },
    Error { code: String, message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

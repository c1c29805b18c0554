//! Conversation adapter over live WebSocket connections.
//!
//! A conversation is reachable while some connection is attached to it.
//! Proactive messages are written to that connection's outbound queue as
//! `ServerEvent::Proactive` frames.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use nudge_core::protocol::ServerEvent;
use nudge_core::transport::{Continuation, ConversationAdapter, ResumedTurn, TransportError};
use nudge_core::SessionHandle;

pub const CHANNEL_ID: &str = "websocket";

struct Connection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
pub struct WsAdapter {
    /// conversation id → attached connection
    connections: Mutex<HashMap<String, Connection>>,
}

impl WsAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to `conversation_id`, replacing any earlier one
    pub async fn attach(
        &self,
        conversation_id: &str,
        connection_id: Uuid,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        let previous = self.connections.lock().await.insert(
            conversation_id.to_string(),
            Connection { id: connection_id, tx },
        );
        if previous.is_some() {
            debug!(conversation = %conversation_id, "conversation reattached");
        }
    }

    /// Detach, unless another connection has taken the conversation over since
    pub async fn detach(&self, conversation_id: &str, connection_id: Uuid) {
        let mut connections = self.connections.lock().await;
        if connections
            .get(conversation_id)
            .is_some_and(|c| c.id == connection_id)
        {
            connections.remove(conversation_id);
        }
    }

    async fn sender_for(
        &self,
        handle: &SessionHandle,
    ) -> Result<mpsc::UnboundedSender<ServerEvent>, TransportError> {
        if handle.channel_id != CHANNEL_ID {
            return Err(TransportError::ChannelMismatch {
                expected: CHANNEL_ID.to_string(),
                found: handle.channel_id.clone(),
            });
        }
        let connections = self.connections.lock().await;
        match connections.get(&handle.conversation_id) {
            Some(conn) if !conn.tx.is_closed() => Ok(conn.tx.clone()),
            _ => Err(TransportError::ConversationNotFound {
                conversation_id: handle.conversation_id.clone(),
            }),
        }
    }
}

#[async_trait]
impl ConversationAdapter for WsAdapter {
    async fn resume(
        &self,
        handle: &SessionHandle,
        continuation: Continuation,
    ) -> Result<(), TransportError> {
        self.sender_for(handle).await?;
        let turn = ResumedTurn::new(handle.clone());
        debug!(conversation = %handle.display_ref(), turn_id = %turn.turn_id, "conversation resumed");
        tokio::spawn(continuation.run(turn));
        Ok(())
    }

    async fn send(&self, turn: &ResumedTurn, text: &str) -> Result<(), TransportError> {
        let tx = self.sender_for(&turn.handle).await?;
        tx.send(ServerEvent::Proactive {
            turn_id: turn.turn_id,
            text: text.to_string(),
        })
        .map_err(|_| TransportError::Disconnected {
            reason: format!("connection for {} closed", turn.handle.conversation_id),
        })
    }

    fn name(&self) -> &str {
        CHANNEL_ID
    }
}

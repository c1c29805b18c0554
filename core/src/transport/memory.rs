//! In-memory conversation adapter
//!
//! For single-process use. Conversations are opened and closed explicitly;
//! every proactive send lands on an unbounded mpsc outbox so callers (and
//! tests) can observe exactly what was delivered where.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{Continuation, ConversationAdapter, ResumedTurn, TransportError};
use crate::session::SessionHandle;

/// A message the adapter pushed into a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub handle: SessionHandle,
    pub turn_id: Uuid,
    pub text: String,
}

/// In-memory adapter for a single channel
///
/// # Example
/// ```rust,ignore
/// let (adapter, mut outbox) = InMemoryAdapter::new("test");
/// adapter.open_conversation("conv-1");
///
/// // ... engine delivers into conv-1 ...
///
/// let sent = outbox.recv().await.unwrap();
/// assert_eq!(sent.conversation_id, "conv-1");
/// ```
pub struct InMemoryAdapter {
    channel_id: String,
    /// conversation id → reachable
    conversations: Mutex<HashMap<String, bool>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl InMemoryAdapter {
    pub fn new(channel_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let adapter = Self {
            channel_id: channel_id.into(),
            conversations: Mutex::new(HashMap::new()),
            outbound,
        };
        (adapter, rx)
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Make a conversation resumable
    pub fn open_conversation(&self, conversation_id: impl Into<String>) {
        self.conversations.lock().insert(conversation_id.into(), true);
    }

    /// Keep the conversation known but make every resume fail, as a stale
    /// handle would
    pub fn close_conversation(&self, conversation_id: &str) {
        if let Some(reachable) = self.conversations.lock().get_mut(conversation_id) {
            *reachable = false;
        }
    }

    fn check_reachable(&self, handle: &SessionHandle) -> Result<(), TransportError> {
        if handle.channel_id != self.channel_id {
            return Err(TransportError::ChannelMismatch {
                expected: self.channel_id.clone(),
                found: handle.channel_id.clone(),
            });
        }
        match self.conversations.lock().get(&handle.conversation_id) {
            Some(true) => Ok(()),
            _ => Err(TransportError::ConversationNotFound {
                conversation_id: handle.conversation_id.clone(),
            }),
        }
    }
}

#[async_trait]
impl ConversationAdapter for InMemoryAdapter {
    async fn resume(
        &self,
        handle: &SessionHandle,
        continuation: Continuation,
    ) -> Result<(), TransportError> {
        self.check_reachable(handle)?;

        let turn = ResumedTurn::new(handle.clone());
        debug!(
            conversation_id = %handle.conversation_id,
            turn_id = %turn.turn_id,
            "resuming conversation"
        );
        tokio::spawn(continuation.run(turn));
        Ok(())
    }

    async fn send(&self, turn: &ResumedTurn, text: &str) -> Result<(), TransportError> {
        self.check_reachable(&turn.handle)?;

        self.outbound
            .send(OutboundMessage {
                conversation_id: turn.handle.conversation_id.clone(),
                handle: turn.handle.clone(),
                turn_id: turn.turn_id,
                text: text.to_string(),
            })
            .map_err(|_| TransportError::Disconnected {
                reason: "outbox receiver dropped".to_string(),
            })
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

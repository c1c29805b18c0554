//! Conversation adapter contract
//!
//! The adapter is the boundary between the core and whatever channel carries
//! bytes to the end user. It does two things:
//!
//! - **resume** a dormant conversation from a stored [`SessionHandle`] and run
//!   a one-shot [`Continuation`] inside it
//! - **send** text into a resumed conversation
//!
//! `resume` must invoke the continuation exactly once when it returns `Ok`,
//! and never when it returns `Err`. The continuation may run later, on
//! another task; `resume` does not wait for it.
//!
//! # Implementations
//! - [`InMemoryAdapter`]: single process, mpsc outbox (tests, demos)
//! - `WsAdapter` in the `nudge` binary: live WebSocket connections

mod memory;

pub use memory::{InMemoryAdapter, OutboundMessage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionHandle;

/// Errors that can occur in the adapter
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The handle points at a conversation the adapter cannot reach
    #[error("conversation not found: {conversation_id}")]
    ConversationNotFound { conversation_id: String },

    /// The handle belongs to a different channel
    #[error("handle is for channel {found}, adapter serves {expected}")]
    ChannelMismatch { expected: String, found: String },

    /// Connection lost
    #[error("transport disconnected: {reason}")]
    Disconnected { reason: String },

    /// Message could not be handed to the channel
    #[error("failed to send to {conversation_id}: {error}")]
    SendFailed {
        conversation_id: String,
        error: String,
    },
}

/// Context of a conversation that has been resumed outside of a live turn
#[derive(Debug, Clone, Serialize)]
pub struct ResumedTurn {
    /// Unique id of this proactive turn
    pub turn_id: Uuid,
    /// The handle the conversation was resumed from
    pub handle: SessionHandle,
    pub resumed_at: DateTime<Utc>,
}

impl ResumedTurn {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            handle,
            resumed_at: Utc::now(),
        }
    }
}

/// One-shot work scheduled into a resumed conversation.
///
/// Dropping a continuation without running it is allowed (the adapter
/// shutting down, say); the party waiting on its result sees that as a
/// failed delivery.
pub struct Continuation {
    run: Box<dyn FnOnce(ResumedTurn) -> BoxFuture<'static, ()> + Send>,
}

impl Continuation {
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(ResumedTurn) -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// Run the continuation inside `turn`
    pub async fn run(self, turn: ResumedTurn) {
        (self.run)(turn).await
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Continuation")
    }
}

/// Channel adapter able to resume dormant conversations
#[async_trait]
pub trait ConversationAdapter: Send + Sync {
    /// Resume the conversation behind `handle` and schedule `continuation`
    /// inside it.
    async fn resume(
        &self,
        handle: &SessionHandle,
        continuation: Continuation,
    ) -> Result<(), TransportError>;

    /// Send text into a resumed conversation
    async fn send(&self, turn: &ResumedTurn, text: &str) -> Result<(), TransportError>;

    /// Adapter name for logs
    fn name(&self) -> &str;
}

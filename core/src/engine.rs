//! Proactive continuation engine
//!
//! Delivers a message into a user's dormant conversation:
//!
//! ```text
//! Requested ──lookup──▶ Resuming ──adapter ok──▶ Delivering ──▶ Committed
//!                          │
//!                          └──adapter err──▶ ResumeFailed
//! ```
//!
//! The registry is only touched inside the continuation, i.e. after the
//! adapter has confirmed the resume. A failed resume therefore never advances
//! a delivery counter.
//!
//! The resume call and the continuation run on their own tasks. A caller that
//! stops waiting (or times out) does not cancel a delivery that is already
//! scheduled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{NudgeError, Result};
use crate::registry::RegistrySlot;
use crate::transport::{Continuation, ConversationAdapter, ResumedTurn};

/// Where a delivery attempt is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Requested,
    Resuming,
    Delivering,
    Committed,
    ResumeFailed,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::ResumeFailed)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Resuming => "resuming",
            Self::Delivering => "delivering",
            Self::Committed => "committed",
            Self::ResumeFailed => "resume_failed",
        };
        f.write_str(name)
    }
}

/// Proof of a committed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub username: String,
    /// Counter value after this delivery
    pub delivery_count: u64,
    /// The proactive turn the message was sent in
    pub turn_id: Uuid,
    pub state: DeliveryState,
}

#[derive(Clone)]
pub struct ProactiveContinuationEngine {
    slot: RegistrySlot,
    adapter: Arc<dyn ConversationAdapter>,
    wait_timeout: Option<Duration>,
}

impl ProactiveContinuationEngine {
    pub fn new(slot: RegistrySlot, adapter: Arc<dyn ConversationAdapter>) -> Self {
        Self {
            slot,
            adapter,
            wait_timeout: None,
        }
    }

    /// Stop waiting for the continuation after `timeout`. The continuation
    /// itself keeps running.
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn slot(&self) -> &RegistrySlot {
        &self.slot
    }

    /// Deliver `message` into the conversation `username` last registered from.
    pub async fn deliver(&self, username: &str, message: &str) -> Result<DeliveryReceipt> {
        trace_state(username, DeliveryState::Requested);

        let registry = self.slot.load().await?;
        let entry = registry
            .lookup(username)
            .cloned()
            .ok_or_else(|| NudgeError::unknown_user(username))?;

        trace_state(username, DeliveryState::Resuming);

        let (result_tx, result_rx) = oneshot::channel();
        let continuation = {
            let slot = self.slot.clone();
            let adapter = self.adapter.clone();
            let username = username.to_string();
            let message = message.to_string();
            Continuation::new(move |turn: ResumedTurn| {
                async move {
                    let result =
                        deliver_in_resumed_turn(&slot, adapter.as_ref(), &turn, &username, &message)
                            .await
                            .map(|count| (turn.turn_id, count));
                    // The requester may have stopped waiting
                    let _ = result_tx.send(result);
                }
                .boxed()
            })
        };

        let adapter = self.adapter.clone();
        let handle = entry.session.clone();
        let resume = tokio::spawn(async move { adapter.resume(&handle, continuation).await });

        match resume.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    username = %username,
                    conversation = %entry.session.display_ref(),
                    error = %e,
                    state = %DeliveryState::ResumeFailed,
                    "could not resume conversation"
                );
                return Err((username.to_string(), e).into());
            }
            Err(join_err) => {
                warn!(username = %username, error = %join_err, "resume task aborted");
                return Err(NudgeError::delivery_failed(username, "resume task aborted"));
            }
        }

        let outcome = match self.wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, result_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(username = %username, timeout = ?limit, "stopped waiting for delivery");
                    return Err(NudgeError::delivery_failed(
                        username,
                        format!(
                            "timed out after {:?} waiting for the conversation; the message may still arrive",
                            limit
                        ),
                    ));
                }
            },
            None => result_rx.await,
        };

        match outcome {
            Ok(Ok((turn_id, delivery_count))) => Ok(DeliveryReceipt {
                username: username.to_string(),
                delivery_count,
                turn_id,
                state: DeliveryState::Committed,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(NudgeError::delivery_failed(
                username,
                "conversation was resumed but the delivery never ran",
            )),
        }
    }
}

/// Body of the continuation: runs inside the resumed conversation.
///
/// Reloads the registry (this may be a different process than the one that
/// requested the delivery), bumps the counter, persists the full snapshot,
/// and only then sends.
async fn deliver_in_resumed_turn(
    slot: &RegistrySlot,
    adapter: &dyn ConversationAdapter,
    turn: &ResumedTurn,
    username: &str,
    message: &str,
) -> Result<u64> {
    trace_state(username, DeliveryState::Delivering);

    let delivery_count = slot.update(|registry| registry.increment_and_get(username)).await?;

    adapter
        .send(turn, message)
        .await
        .map_err(|e| NudgeError::from((username.to_string(), e)))?;

    info!(
        username = %username,
        turn_id = %turn.turn_id,
        conversation = %turn.handle.display_ref(),
        delivery_count,
        state = %DeliveryState::Committed,
        "proactive message delivered"
    );
    Ok(delivery_count)
}

fn trace_state(username: &str, state: DeliveryState) {
    debug!(username = %username, state = %state, "delivery state");
}

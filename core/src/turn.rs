//! Turn controller
//!
//! Per-turn entry point. Classifies the inbound activity, runs the matching
//! handler and produces the reply for the current turn (or nothing, for
//! system-origin events).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::{Action, CommandInterpreter, InboundEvent};
use crate::config::Config;
use crate::engine::ProactiveContinuationEngine;
use crate::error::{NudgeError, Result};
use crate::registry::{RegistryEntry, RegistrySlot, Upserted};
use crate::session::{Participant, SessionHandle};
use crate::store::RegistryStore;
use crate::transport::ConversationAdapter;

pub const HELP_TEXT: &str = "\
Commands:
  reg <username>              register this conversation for notifications
  show                        list registered users
  send <username> <message>   push a message into that user's conversation
  info                        show details about this turn
  help                        show this help";

/// What arrived on a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    /// Free text typed by a user
    Message { text: String },
    /// Structured event from a system producer
    Event(InboundEvent),
    /// Participants joined the conversation
    ConversationUpdate { members_added: Vec<Participant> },
}

/// One inbound activity plus the conversation it arrived on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundTurn {
    pub session: SessionHandle,
    pub activity: Activity,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl InboundTurn {
    pub fn message(session: SessionHandle, text: impl Into<String>) -> Self {
        Self {
            session,
            activity: Activity::Message { text: text.into() },
            received_at: Utc::now(),
        }
    }

    pub fn event(session: SessionHandle, event: InboundEvent) -> Self {
        Self {
            session,
            activity: Activity::Event(event),
            received_at: Utc::now(),
        }
    }

    pub fn members_added(session: SessionHandle, members: Vec<Participant>) -> Self {
        Self {
            session,
            activity: Activity::ConversationUpdate {
                members_added: members,
            },
            received_at: Utc::now(),
        }
    }
}

/// Handles activity that is not a command (membership changes)
pub trait Greeter: Send + Sync {
    fn greet(&self, turn: &InboundTurn, members_added: &[Participant]) -> Option<String>;
}

/// Welcomes every added member except the bot itself
#[derive(Debug, Clone, Default)]
pub struct WelcomeGreeter {
    pub bot_id: Option<String>,
}

impl Greeter for WelcomeGreeter {
    fn greet(&self, _turn: &InboundTurn, members_added: &[Participant]) -> Option<String> {
        let names: Vec<&str> = members_added
            .iter()
            .filter(|m| self.bot_id.as_deref() != Some(m.id.as_str()))
            .map(|m| m.name.as_deref().unwrap_or(m.id.as_str()))
            .collect();
        if names.is_empty() {
            return None;
        }
        Some(format!(
            "Welcome, {}! Send 'reg <username>' to get notifications here, or 'help' for all commands.",
            names.join(", ")
        ))
    }
}

pub struct TurnController {
    interpreter: CommandInterpreter,
    slot: RegistrySlot,
    engine: ProactiveContinuationEngine,
    greeter: Arc<dyn Greeter>,
}

impl TurnController {
    pub fn new(interpreter: CommandInterpreter, engine: ProactiveContinuationEngine) -> Self {
        Self {
            interpreter,
            slot: engine.slot().clone(),
            engine,
            greeter: Arc::new(WelcomeGreeter::default()),
        }
    }

    /// Wire everything from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn RegistryStore>,
        adapter: Arc<dyn ConversationAdapter>,
    ) -> Self {
        let slot = config.registry_slot(store);
        let engine = ProactiveContinuationEngine::new(slot, adapter)
            .with_wait_timeout(config.delivery.wait_timeout());
        Self::new(CommandInterpreter::from_config(&config.commands), engine)
    }

    pub fn with_greeter(mut self, greeter: Arc<dyn Greeter>) -> Self {
        self.greeter = greeter;
        self
    }

    pub fn slot(&self) -> &RegistrySlot {
        &self.slot
    }

    /// Handle one turn and return the reply for it, if any.
    ///
    /// Only `StoreUnavailable` escapes as an error.
    pub async fn handle_turn(&self, turn: &InboundTurn) -> Result<Option<String>> {
        let reply = match &turn.activity {
            Activity::Message { text } => match self.interpreter.classify_text(text) {
                Ok(action) => self.dispatch_live(action, turn).await.map(Some),
                Err(e) => Err(e),
            },
            Activity::Event(event) => self.handle_event(event).await,
            Activity::ConversationUpdate { members_added } => {
                Ok(self.greeter.greet(turn, members_added))
            }
        };

        match reply {
            Err(e) if e.is_recoverable() => Ok(Some(e.user_message())),
            other => other,
        }
    }

    async fn dispatch_live(&self, action: Action, turn: &InboundTurn) -> Result<String> {
        match action {
            Action::Register { username } => self.handle_register(&username, &turn.session).await,
            Action::List => self.handle_list().await,
            Action::Deliver { username, message } => {
                let receipt = self.engine.deliver(&username, &message).await?;
                Ok(format!(
                    "Delivered to '{}' (delivery #{}).",
                    receipt.username, receipt.delivery_count
                ))
            }
            Action::Echo => Ok(echo(turn)),
            Action::Help => Ok(HELP_TEXT.to_string()),
        }
    }

    async fn handle_register(&self, username: &str, session: &SessionHandle) -> Result<String> {
        let outcome = self
            .slot
            .update(|registry| Ok(registry.upsert(username, session.clone())))
            .await?;

        info!(
            username = %username,
            conversation = %session.display_ref(),
            replaced = outcome == Upserted::Replaced,
            "user registered"
        );
        Ok(match outcome {
            Upserted::Inserted => format!("Registered '{}'.", username),
            Upserted::Replaced => format!(
                "Registered '{}'. Notifications now go to this conversation.",
                username
            ),
        })
    }

    async fn handle_list(&self) -> Result<String> {
        let registry = self.slot.load().await?;
        Ok(render_listing(&registry.snapshot_for_display()))
    }

    /// System events are silent: nothing is replied on success, and an
    /// unregistered or unreachable target is only logged.
    async fn handle_event(&self, event: &InboundEvent) -> Result<Option<String>> {
        let registry = self.slot.load().await?;
        let Some(action) = self.interpreter.classify_event(event, &registry)? else {
            debug!(event = %event.name, "event ignored");
            return Ok(None);
        };
        let Action::Deliver { username, message } = action else {
            return Ok(None);
        };

        match self.engine.deliver(&username, &message).await {
            Ok(receipt) => {
                debug!(username = %receipt.username, count = receipt.delivery_count, "event delivered");
                Ok(None)
            }
            Err(NudgeError::StoreUnavailable(e)) => Err(NudgeError::StoreUnavailable(e)),
            Err(e) => {
                warn!(username = %username, error = %e, "dropping undeliverable notify event");
                Ok(None)
            }
        }
    }
}

fn echo(turn: &InboundTurn) -> String {
    match serde_json::to_string_pretty(turn) {
        Ok(json) => format!("Turn context:\n{}", json),
        Err(e) => format!("Turn context unavailable: {}", e),
    }
}

/// Plain-text table of registry entries, or a hint when there are none
pub fn render_listing(entries: &[RegistryEntry]) -> String {
    if entries.is_empty() {
        return "No users registered yet. Send 'reg <username>' to register.".to_string();
    }

    let mut out = format!("Registered users ({}):\n", entries.len());
    out.push_str("| username | deliveries | conversation |\n");
    out.push_str("|---|---|---|\n");
    for entry in entries {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            entry.username,
            entry.delivery_count,
            entry.session.display_ref()
        ));
    }
    out
}

//! Command interpreter
//!
//! Turns the text of a live turn, or a structured inbound event, into an
//! [`Action`]. Text commands:
//!
//! | input                         | action                      |
//! |-------------------------------|-----------------------------|
//! | `reg <username>` (or synonym) | `Register`                  |
//! | `show`                        | `List`                      |
//! | `send <username> <message…>`  | `Deliver`                   |
//! | `info…`                       | `Echo`                      |
//! | `help…` / anything else       | `Help`                      |
//!
//! Keywords are case-insensitive and usernames are case-folded. Message text
//! is kept verbatim.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CommandConfig;
use crate::error::{NudgeError, Result};
use crate::registry::NotifyRegistry;

/// Name of the inbound event that requests a proactive delivery
pub const NOTIFY_EVENT: &str = "notifyEvent";

const REGISTER_USAGE: &str = "reg <username>";
const SEND_USAGE: &str = "send <username> <message>";
const EVENT_USAGE: &str = r#"notifyEvent {"username": "<username>", "message": "<message>"}"#;

/// What a turn asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Register { username: String },
    List,
    Deliver { username: String, message: String },
    Echo,
    Help,
}

/// A structured event delivered as a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Payload schema of [`NOTIFY_EVENT`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotifyEventPayload {
    pub username: String,
    pub message: String,
}

pub struct CommandInterpreter {
    register_keywords: Vec<String>,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::from_config(&CommandConfig::default())
    }
}

impl CommandInterpreter {
    pub fn from_config(config: &CommandConfig) -> Self {
        Self {
            register_keywords: config
                .register_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Classify the text of a live turn.
    ///
    /// Only a keyword missing its argument is an error; unmatched text is `Help`.
    pub fn classify_text(&self, raw: &str) -> Result<Action> {
        let text = raw.trim();
        let (keyword, rest) = split_token(text);
        let keyword = keyword.to_lowercase();

        if self.register_keywords.iter().any(|k| *k == keyword) {
            let (name, _) = split_token(rest);
            if name.is_empty() {
                return Err(NudgeError::malformed("missing username", REGISTER_USAGE));
            }
            return Ok(Action::Register {
                username: normalize_username(name),
            });
        }

        if text.eq_ignore_ascii_case("show") {
            return Ok(Action::List);
        }

        if keyword == "send" {
            let (name, message) = split_token(rest);
            if name.is_empty() {
                return Err(NudgeError::malformed("missing username", SEND_USAGE));
            }
            if message.is_empty() {
                return Err(NudgeError::malformed("missing message", SEND_USAGE));
            }
            return Ok(Action::Deliver {
                username: normalize_username(name),
                message: message.to_string(),
            });
        }

        if text.to_lowercase().starts_with("info") {
            return Ok(Action::Echo);
        }

        Ok(Action::Help)
    }

    /// Decode a notify event's payload. `Ok(None)` for events of any other name.
    pub fn decode_event(&self, event: &InboundEvent) -> Result<Option<NotifyEventPayload>> {
        if event.name != NOTIFY_EVENT {
            return Ok(None);
        }

        let payload: NotifyEventPayload = serde_json::from_value(event.payload.clone())
            .map_err(|e| NudgeError::malformed(e.to_string(), EVENT_USAGE))?;
        if payload.username.trim().is_empty() {
            return Err(NudgeError::malformed("empty username", EVENT_USAGE));
        }

        Ok(Some(payload))
    }

    /// Classify a system-origin event.
    ///
    /// A notify event becomes `Deliver` only when its target is registered;
    /// otherwise it is dropped (`Ok(None)`), since there is nobody to tell.
    pub fn classify_event(
        &self,
        event: &InboundEvent,
        registry: &NotifyRegistry,
    ) -> Result<Option<Action>> {
        let Some(payload) = self.decode_event(event)? else {
            return Ok(None);
        };

        let username = normalize_username(&payload.username);
        if !registry.contains(&username) {
            debug!(username = %username, "dropping notify event for unregistered user");
            return Ok(None);
        }

        Ok(Some(Action::Deliver {
            username,
            message: payload.message,
        }))
    }
}

/// Registry key for a username as typed
pub fn normalize_username(name: &str) -> String {
    name.trim().to_lowercase()
}

/// First whitespace-delimited token and the rest, with the separator removed.
/// The rest keeps its internal whitespace.
fn split_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use serde_json::json;

    fn interpreter() -> CommandInterpreter {
        CommandInterpreter::default()
    }

    #[test]
    fn test_register() {
        let action = interpreter().classify_text("  REG Alice  ").unwrap();
        assert_eq!(action, Action::Register { username: "alice".to_string() });

        // Only the first token after the keyword is the name
        let action = interpreter().classify_text("reg bob extra words").unwrap();
        assert_eq!(action, Action::Register { username: "bob".to_string() });

        let action = interpreter().classify_text("anmelden carol").unwrap();
        assert_eq!(action, Action::Register { username: "carol".to_string() });
    }

    #[test]
    fn test_register_without_name_is_malformed() {
        let err = interpreter().classify_text("reg").unwrap_err();
        assert!(matches!(err, NudgeError::MalformedCommand { usage, .. } if usage == REGISTER_USAGE));

        assert!(interpreter().classify_text("reg    ").is_err());
    }

    #[test]
    fn test_show_must_be_exact() {
        assert_eq!(interpreter().classify_text("Show").unwrap(), Action::List);
        assert_eq!(interpreter().classify_text("show me").unwrap(), Action::Help);
    }

    #[test]
    fn test_send_keeps_message_verbatim() {
        let action = interpreter()
            .classify_text("send Bob  Build #42   FAILED on main")
            .unwrap();
        assert_eq!(
            action,
            Action::Deliver {
                username: "bob".to_string(),
                message: "Build #42   FAILED on main".to_string(),
            }
        );
    }

    #[test]
    fn test_send_missing_parts() {
        assert!(matches!(
            interpreter().classify_text("send"),
            Err(NudgeError::MalformedCommand { .. })
        ));
        assert!(matches!(
            interpreter().classify_text("send bob"),
            Err(NudgeError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn test_info_and_help_fallback() {
        assert_eq!(interpreter().classify_text("info").unwrap(), Action::Echo);
        assert_eq!(interpreter().classify_text("INFORMATION please").unwrap(), Action::Echo);
        assert_eq!(interpreter().classify_text("help").unwrap(), Action::Help);
        assert_eq!(interpreter().classify_text("").unwrap(), Action::Help);
        assert_eq!(interpreter().classify_text("registry").unwrap(), Action::Help);
    }

    #[test]
    fn test_custom_register_keywords() {
        let interpreter = CommandInterpreter::from_config(&CommandConfig {
            register_keywords: vec!["Inscrire".to_string()],
        });
        assert_eq!(
            interpreter.classify_text("inscrire dana").unwrap(),
            Action::Register { username: "dana".to_string() }
        );
        assert_eq!(interpreter.classify_text("reg dana").unwrap(), Action::Help);
    }

    #[test]
    fn test_event_for_registered_user() {
        let mut registry = NotifyRegistry::new();
        registry.upsert("alice", SessionHandle::new("test", "c1", "u1"));

        let event = InboundEvent {
            name: NOTIFY_EVENT.to_string(),
            payload: json!({ "username": "Alice", "message": "Task done" }),
        };
        let action = interpreter().classify_event(&event, &registry).unwrap();
        assert_eq!(
            action,
            Some(Action::Deliver {
                username: "alice".to_string(),
                message: "Task done".to_string(),
            })
        );
    }

    #[test]
    fn test_event_for_unknown_user_is_dropped() {
        let event = InboundEvent {
            name: NOTIFY_EVENT.to_string(),
            payload: json!({ "username": "ghost", "message": "boo" }),
        };
        let action = interpreter()
            .classify_event(&event, &NotifyRegistry::new())
            .unwrap();
        assert_eq!(action, None);
    }

    #[test]
    fn test_event_schema_is_enforced() {
        let registry = NotifyRegistry::new();
        let missing = InboundEvent {
            name: NOTIFY_EVENT.to_string(),
            payload: json!({ "username": "alice" }),
        };
        assert!(matches!(
            interpreter().classify_event(&missing, &registry),
            Err(NudgeError::MalformedCommand { .. })
        ));

        let blank = InboundEvent {
            name: NOTIFY_EVENT.to_string(),
            payload: json!({ "username": "  ", "message": "x" }),
        };
        assert!(interpreter().classify_event(&blank, &registry).is_err());

        let other = InboundEvent {
            name: "typing".to_string(),
            payload: serde_json::Value::Null,
        };
        assert_eq!(interpreter().classify_event(&other, &registry).unwrap(), None);
    }
}

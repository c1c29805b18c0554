//! Resumable conversation handles
//!
//! A [`SessionHandle`] is captured from the turn that registered a user and
//! stored verbatim in the registry. The core never looks inside it; only the
//! conversation adapter interprets the fields when resuming.

use serde::{Deserialize, Serialize};

/// Identity of the participant a conversation was held with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Durable descriptor sufficient to resume one specific conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Channel the conversation lives on (e.g. "websocket", "msteams")
    pub channel_id: String,
    /// Channel-scoped conversation identifier
    pub conversation_id: String,
    /// Who the conversation is with
    pub participant: Participant,
    /// Endpoint the adapter should talk to when resuming, if the channel needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

impl SessionHandle {
    pub fn new(
        channel_id: impl Into<String>,
        conversation_id: impl Into<String>,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation_id: conversation_id.into(),
            participant: Participant {
                id: participant_id.into(),
                name: None,
            },
            service_url: None,
        }
    }

    pub fn with_participant_name(mut self, name: impl Into<String>) -> Self {
        self.participant.name = Some(name.into());
        self
    }

    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    /// Short form used in listings and logs
    pub fn display_ref(&self) -> String {
        format!("{}/{}", self.channel_id, self.conversation_id)
    }
}

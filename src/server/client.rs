//! One-shot system producer: connect, say hello, fire a `notifyEvent`, leave.

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use nudge_core::protocol::{ClientInfo, ClientMessage, MessageEnvelope, ServerEvent};
use nudge_core::{Participant, NOTIFY_EVENT};

pub async fn send_notify(url: &str, username: &str, message: &str) -> Result<()> {
    let (mut ws, _) = connect_async(url)
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;

    let hello = MessageEnvelope::request(ClientMessage::Hello {
        client: ClientInfo {
            name: "nudge-notify".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        user: Participant {
            id: "system".to_string(),
            name: Some("nudge notify".to_string()),
        },
        conversation_id: None,
    });
    ws.send(Message::Text(serde_json::to_string(&hello)?)).await?;

    // Wait for the ack; the greeting reply that follows is not ours to show
    loop {
        let frame = ws
            .next()
            .await
            .context("server closed the connection before acknowledging hello")??;
        let Message::Text(text) = frame else { continue };
        let envelope: MessageEnvelope<ServerEvent> = serde_json::from_str(&text)?;
        match envelope.payload {
            ServerEvent::HelloAck { conversation_id, .. } => {
                debug!(conversation = %conversation_id, "producer connected");
                break;
            }
            ServerEvent::Error { code, message } => bail!("server rejected hello ({}): {}", code, message),
            _ => {}
        }
    }

    let event = MessageEnvelope::request(ClientMessage::Event {
        name: NOTIFY_EVENT.to_string(),
        payload: json!({ "username": username, "message": message }),
    });
    ws.send(Message::Text(serde_json::to_string(&event)?)).await?;
    ws.close(None).await?;
    Ok(())
}

//! WebSocket server: every connection is one conversation.
//!
//! After `Hello` the connection is attached to a conversation id (new, or the
//! one the client asked to reattach to). `Message` and `Event` frames become
//! turns for the [`TurnController`]; replies go back as `Reply` frames, and
//! proactive deliveries from any other turn arrive as `Proactive` frames.

mod adapter;
mod client;

pub use adapter::{WsAdapter, CHANNEL_ID};
pub use client::send_notify;

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use nudge_core::protocol::{ClientMessage, MessageEnvelope, ServerEvent, ServerInfo};
use nudge_core::{Config, InboundEvent, InboundTurn, NudgeError, SessionHandle, TurnController};

pub struct AppState {
    pub controller: Arc<TurnController>,
    pub adapter: Arc<WsAdapter>,
    pub service_url: String,
}

pub async fn start_server(config: &Config, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;

    let store = config.open_store()?;
    let adapter = Arc::new(WsAdapter::new());
    let controller = TurnController::from_config(config, store.clone(), adapter.clone());
    let state = Arc::new(AppState {
        controller: Arc::new(controller),
        adapter,
        service_url: format!("ws://{}", addr),
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        store = store.name(),
        registry_key = %config.registry.key,
        "nudge server listening on ws://{}",
        addr
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws_stream) => handle_connection(ws_stream, state).await,
                        Err(e) => debug!(peer = %peer, error = %e, "websocket handshake failed"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = Uuid::new_v4();

    // Forward ServerEvents to the socket
    let send_task = tokio::spawn(async move {
        let mut event_id = 0;
        while let Some(event) = rx.recv().await {
            event_id += 1;
            let envelope = MessageEnvelope::event(event_id, event);
            match serde_json::to_string(&envelope) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!(error = %e, "failed to encode server event"),
            }
        }
    });

    let mut session: Option<SessionHandle> = None;

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let envelope = match serde_json::from_str::<MessageEnvelope<ClientMessage>>(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                let _ = tx.send(ServerEvent::Error {
                    code: "bad_frame".to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        match envelope.payload {
            ClientMessage::Hello {
                client,
                user,
                conversation_id,
            } => {
                if let Some(current) = &session {
                    state.adapter.detach(&current.conversation_id, connection_id).await;
                }
                let conversation_id = conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let mut handle = SessionHandle::new(CHANNEL_ID, conversation_id.clone(), user.id.clone())
                    .with_service_url(state.service_url.clone());
                if let Some(name) = &user.name {
                    handle = handle.with_participant_name(name.clone());
                }

                state.adapter.attach(&conversation_id, connection_id, tx.clone()).await;
                info!(
                    conversation = %handle.display_ref(),
                    client = %client.name,
                    client_version = %client.version,
                    "conversation attached"
                );
                let _ = tx.send(ServerEvent::HelloAck {
                    server: ServerInfo {
                        name: "nudge-server".to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                    conversation_id,
                });

                let greeting = InboundTurn::members_added(handle.clone(), vec![user]);
                session = Some(handle);
                tokio::spawn(run_turn(state.clone(), greeting, tx.clone()));
            }
            ClientMessage::Message { text } => {
                let Some(handle) = &session else {
                    send_hello_required(&tx);
                    continue;
                };
                let turn = InboundTurn::message(handle.clone(), text);
                tokio::spawn(run_turn(state.clone(), turn, tx.clone()));
            }
            ClientMessage::Event { name, payload } => {
                let Some(handle) = &session else {
                    send_hello_required(&tx);
                    continue;
                };
                let turn = InboundTurn::event(handle.clone(), InboundEvent { name, payload });
                tokio::spawn(run_turn(state.clone(), turn, tx.clone()));
            }
        }
    }

    if let Some(handle) = session {
        state.adapter.detach(&handle.conversation_id, connection_id).await;
        debug!(conversation = %handle.display_ref(), "connection closed");
    }
    send_task.abort();
}

async fn run_turn(state: Arc<AppState>, turn: InboundTurn, tx: mpsc::UnboundedSender<ServerEvent>) {
    match state.controller.handle_turn(&turn).await {
        Ok(Some(text)) => {
            let _ = tx.send(ServerEvent::Reply { text });
        }
        Ok(None) => {}
        Err(e) => {
            error!(conversation = %turn.session.display_ref(), error = %e, "turn failed");
            let code = match &e {
                NudgeError::StoreUnavailable(_) => "store_unavailable",
                _ => "turn_failed",
            };
            let _ = tx.send(ServerEvent::Error {
                code: code.to_string(),
                message: e.to_string(),
            });
        }
    }
}

fn send_hello_required(tx: &mpsc::UnboundedSender<ServerEvent>) {
    let _ = tx.send(ServerEvent::Error {
        code: "hello_required".to_string(),
        message: "send hello before any other frame".to_string(),
    });
}

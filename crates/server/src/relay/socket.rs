//! Per-connection realtime loop
//!
//! Each socket gets a writer task draining its bounded outbound queue and a
//! read loop on the upgrade task. Everything slower than a queue push is
//! handed to the task pool.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::frame::{InboundFrame, ServerFrame};
use super::moderation;
use super::registry::Outbound;
use crate::ai::prompts;
use crate::config::AppState;
use crate::models::Message;

/// GET /ws/{userId}/{sessionId}
pub async fn ws_chat(
    ws: WebSocketUpgrade,
    Path((user_id, session_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    info!("GET /ws/{}/{}", user_id, session_id);
    ws.on_upgrade(move |socket| run_connection(state, socket, session_id, user_id))
}

/// GET /ws-voice/{sessionId}/{userId}
pub async fn ws_voice(
    ws: WebSocketUpgrade,
    Path((session_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    info!("GET /ws-voice/{}/{}", session_id, user_id);
    ws.on_upgrade(move |socket| run_connection(state, socket, session_id, user_id))
}

async fn run_connection(
    state: AppState,
    socket: WebSocket,
    session_id: String,
    participant_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = state.registry.channel();

    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(WsMessage::Text(payload.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection_id = state
        .registry
        .register(&session_id, &participant_id, tx.clone());

    while let Some(result) = stream.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                handle_inbound(&state, &session_id, &participant_id, &tx, text.as_str());
            }
            Ok(WsMessage::Close(_)) => {
                debug!("[Relay] {} sent close frame", participant_id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "[Relay] Read error from {} in session {}: {}",
                    participant_id, session_id, e
                );
                break;
            }
        }
    }

    state
        .registry
        .release(&session_id, &participant_id, connection_id);
    drop(tx);
    let _ = writer.await;
    debug!("[Relay] Connection {} closed", connection_id);
}

/// Route one inbound text frame: reject, warn, or relay and persist.
pub(crate) fn handle_inbound(
    state: &AppState,
    session_id: &str,
    participant_id: &str,
    own_tx: &Outbound,
    raw: &str,
) {
    let frame = match InboundFrame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("[Relay] Invalid frame from {}: {}", participant_id, e);
            reply(own_tx, ServerFrame::error(session_id, "Invalid message format"));
            return;
        }
    };
    let text = frame.text().to_string();

    if state.moderation.is_interruption(&text) {
        info!("[Relay] Interruption from {} in session {}", participant_id, session_id);
        reply(
            own_tx,
            ServerFrame::warning(session_id, prompts::interrupt_warning("your partner")),
        );
        return;
    }

    let report = state
        .registry
        .broadcast(session_id, participant_id, Arc::from(raw));
    debug!(
        "[Relay] {} -> session {}: delivered {}, dropped {}",
        participant_id, session_id, report.delivered, report.dropped
    );

    if !text.trim().is_empty() {
        let store = state.store.clone();
        let sid = session_id.to_string();
        let message = Message::new(participant_id, text.clone());
        state.tasks.spawn("persist-message", async move {
            store
                .append_message(&sid, &message)
                .await
                .with_context(|| format!("append message to session {}", sid))
        });
    }

    if state.ai.is_enabled() && state.moderation.should_moderate(frame.kind(), &text) {
        state.tasks.spawn(
            "moderate",
            moderation::moderate(state.clone(), session_id.to_string(), text),
        );
    }
}

fn reply(own_tx: &Outbound, frame: ServerFrame) {
    if own_tx.try_send(frame.to_payload()).is_err() {
        warn!("[Relay] Could not queue {:?} frame for sender", frame.kind);
    }
}

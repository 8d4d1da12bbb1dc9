//! WebSocket connection lifecycle.
//!
//! One task per connection reads inbound frames and dispatches them;
//! a second spawned task drains the connection's outbound queue onto
//! the socket. Teardown is ordered: presence leaves first so other
//! members see the departure, then the queue is dropped and the
//! writer task drains whatever is already enqueued (auth_failed
//! included) before the socket closes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::AuthValidator;
use crate::clipboard::ClipboardPersister;
use crate::config::RelayConfig;
use crate::identity::Identity;
use crate::repository::RelayRepository;

use super::protocol::{Envelope, Outbound, ServerMessage};
use super::router::{dispatch, ConnectionContext, DispatchResult};
use super::state::RelayState;

pub async fn handle_beam_ws(
    socket: WebSocket,
    beam_id: String,
    identity: Option<Identity>,
    state: Arc<RelayState>,
    repository: Arc<RelayRepository>,
    relay_config: RelayConfig,
) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    state.metrics.connection_opened();
    info!(beam = %beam_id, conn = %connection_id, "WebSocket connection opened");

    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(relay_config.outbound_channel_capacity);

    let persister = ClipboardPersister::new(repository.clone(), relay_config.persist_timeout);
    let writer = tokio::spawn(outbound_loop(
        ws_tx,
        rx,
        connection_id.clone(),
        beam_id.clone(),
        identity.clone(),
        persister,
        state.clone(),
    ));

    let validator = AuthValidator::new(
        repository.clone(),
        relay_config.require_beam_key,
        relay_config.auth_timeout,
    );
    let mut ctx = ConnectionContext {
        connection_id: connection_id.clone(),
        beam_id: beam_id.clone(),
        identity,
        member: None,
        tx: tx.clone(),
        state: state.clone(),
        validator,
        repository,
    };

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if handle_text_frame(&mut ctx, &text).await == DispatchResult::Close {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(conn = %connection_id, "Client closed connection");
                break;
            }
            // Ping/pong are handled by axum; binary frames are not
            // part of the protocol.
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %connection_id, "WebSocket error: {e}");
                break;
            }
        }
    }

    // Ordered teardown: presence first, then the outbound queue.
    if let Some(member) = &ctx.member {
        state.remove_member(&beam_id, &member.client_id).await;
        state.leave(&beam_id, &connection_id).await;
    }
    drop(ctx);
    drop(tx);
    if let Err(e) = writer.await {
        warn!(conn = %connection_id, "Writer task panicked: {e}");
    }

    state.metrics.connection_closed();
    info!(beam = %beam_id, conn = %connection_id, "WebSocket connection closed");
}

/// One inbound text frame: parse, then dispatch. An unparsable frame
/// gets exactly one `protocol_error` message and closes the
/// connection; garbage never reaches the dispatcher.
async fn handle_text_frame(ctx: &mut ConnectionContext, text: &str) -> DispatchResult {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(conn = %ctx.connection_id, "Malformed envelope: {e}");
            let _ = ctx
                .tx
                .send(Outbound::Direct(ServerMessage::ProtocolError {
                    message: "malformed message".to_string(),
                }))
                .await;
            return DispatchResult::Close;
        }
    };
    ctx.state.metrics.envelope_received();
    dispatch(ctx, envelope).await
}

/// Drains the outbound queue onto the socket. Runs until every sender
/// handle is dropped, so queued messages always flush before close.
async fn outbound_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: String,
    beam_id: String,
    identity: Option<Identity>,
    persister: ClipboardPersister,
    state: Arc<RelayState>,
) {
    while let Some(event) = rx.recv().await {
        if let Outbound::Clipboard {
            message, extra, ..
        } = &event
        {
            // The origin connection durably captures the share, once,
            // when an identity is attached.
            if clipboard_origin(&event, &connection_id) {
                if let Some(identity) = &identity {
                    spawn_persist(
                        persister.clone(),
                        state.clone(),
                        beam_id.clone(),
                        message.clone(),
                        extra.clone(),
                        identity.clone(),
                    );
                }
            }
        }

        let payload = match render_outbound(event, &connection_id) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(conn = %connection_id, "Failed to serialize outbound message: {e}");
                continue;
            }
        };
        if ws_tx.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

fn clipboard_origin(event: &Outbound, connection_id: &str) -> bool {
    matches!(event, Outbound::Clipboard { origin, .. } if origin == connection_id)
}

/// Shapes an outbound event into the JSON text for one connection.
/// Clipboard events resolve `is_original_sender` here, at the edge,
/// since the same group event reaches every member.
fn render_outbound(event: Outbound, connection_id: &str) -> serde_json::Result<String> {
    match event {
        Outbound::Direct(message) => serde_json::to_string(&message),
        Outbound::Forward(envelope) => serde_json::to_string(&envelope),
        Outbound::Clipboard {
            message,
            extra,
            origin,
        } => serde_json::to_string(&ServerMessage::ShareClipboard {
            message,
            extra,
            is_original_sender: origin == connection_id,
        }),
    }
}

fn spawn_persist(
    persister: ClipboardPersister,
    state: Arc<RelayState>,
    beam_id: String,
    content: Value,
    content_type: Value,
    identity: Identity,
) {
    tokio::spawn(async move {
        match persister
            .persist(&beam_id, &content, &content_type, &identity)
            .await
        {
            Ok(note) => {
                state.metrics.note_persisted();
                debug!(beam = %beam_id, note = %note.id, "Clipboard note persisted");
            }
            Err(e) => {
                state.metrics.persist_failed();
                warn!(beam = %beam_id, "Failed to persist clipboard note: {e}");
            }
        }
    });
}

//! Bridges one browser WebSocket to one live session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use livewire_core::LiveMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, error, info, instrument, warn};

const CLIENT_INPUT_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Runs a live session for the lifetime of the socket.
///
/// Client frames feed the session input; every output item is written back
/// as a [`ServerMessage`]. A client close completes the input, which ends
/// the session normally. A session that ends first closes the socket.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut socket_tx, socket_rx) = socket.split();
    let (input_tx, input_rx) = mpsc::channel(CLIENT_INPUT_BUFFER);

    let mut session = match state
        .orchestrator
        .live(ReceiverStream::new(input_rx), state.config.live_config())
    {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to start live session.");
            let _ = send_msg(&mut socket_tx, ServerMessage::from(&e)).await;
            return;
        }
    };
    let session_id = session.id();
    tracing::Span::current().record("session_id", tracing::field::display(session_id));
    info!("Live session started.");

    if send_msg(&mut socket_tx, ServerMessage::SessionStarted { session_id })
        .await
        .is_err()
    {
        error!("Failed to send session_started to client.");
        session.close();
        while session.next().await.is_some() {}
        state.memory.remove(session_id).await;
        return;
    }

    let reader = tokio::spawn(forward_client_messages(socket_rx, input_tx).in_current_span());

    while let Some(item) = session.next().await {
        let message = match item {
            Ok(event) => ServerMessage::Event { event },
            Err(e) => {
                warn!(error = %e, code = e.code(), "Live session failed.");
                ServerMessage::from(&e)
            }
        };
        if let Err(e) = send_msg(&mut socket_tx, message).await {
            warn!(error = %e, "Client went away. Closing live session.");
            session.close();
            while session.next().await.is_some() {}
            break;
        }
    }

    reader.abort();
    let _ = socket_tx.close().await;
    let transcript = state.memory.remove(session_id).await;
    info!(messages = transcript.len(), "Live session finished.");
}

/// Pushes decoded client frames into the session input until the client
/// closes or the session stops accepting input.
async fn forward_client_messages(
    mut socket_rx: SplitStream<WebSocket>,
    input: mpsc::Sender<LiveMessage>,
) {
    while let Some(msg_result) = socket_rx.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    if input.send(msg.into()).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed client message."),
            },
            Ok(Message::Close(_)) => {
                info!("Client closed the connection.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Error reading from client websocket.");
                break;
            }
        }
    }
}

/// Serializes and sends a single [`ServerMessage`] to the client.
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: ServerMessage) -> Result<()> {
    let json = serde_json::to_string(&msg)?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}

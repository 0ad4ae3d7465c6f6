//! One Gemini Live websocket connection exposed as a [`SessionHandle`].

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use livewire_core::{
    ConnectionState, ConnectionStateChange, ConnectionStateStream, LiveError, LiveMessage,
    ProviderEvent, ProviderEventStream, SessionHandle,
};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::types::{self, ClientMessage, Setup};

type EventResult = Result<ProviderEvent, LiveError>;

/// Connection state shared by the session and its tasks.
#[derive(Clone)]
struct StateCell(Arc<watch::Sender<ConnectionStateChange>>);

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionStateChange::new(
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
        ));
        Self(Arc::new(tx))
    }

    fn set(&self, next: ConnectionState, reason: Option<String>) {
        self.0.send_if_modified(|change| {
            if change.current == next {
                return false;
            }
            *change = ConnectionStateChange {
                previous: change.current,
                current: next,
                reason,
            };
            true
        });
    }

    fn current(&self) -> ConnectionState {
        self.0.borrow().current
    }
}

pub struct GeminiSession {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    events: Mutex<Option<mpsc::UnboundedReceiver<EventResult>>>,
    state: StateCell,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: AtomicBool,
}

impl GeminiSession {
    /// Opens the websocket and sends `setup`. The session reports
    /// `Connected` once the server acknowledges the setup.
    pub async fn connect(url: &str, setup: Setup) -> Result<Self, LiveError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| LiveError::Transport(format!("Gemini connect failed: {e}")))?;
        info!("Connected to Gemini Live websocket.");
        let (sink, stream) = ws_stream.split();
        Self::start(sink, stream, setup).await
    }

    /// Runs a session over an already-open frame sink and stream.
    pub async fn start<Si, St, E>(mut sink: Si, stream: St, setup: Setup) -> Result<Self, LiveError>
    where
        Si: Sink<WsMessage> + Unpin + Send + 'static,
        Si::Error: Display + Send,
        St: Stream<Item = Result<WsMessage, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let payload = serde_json::to_string(&ClientMessage::Setup(setup))
            .map_err(|e| LiveError::Protocol(e.to_string()))?;
        sink.send(WsMessage::Text(payload.into()))
            .await
            .map_err(|e| LiveError::Transport(format!("failed to send setup: {e}")))?;

        let state = StateCell::new();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_frames(sink, outgoing_rx, state.clone()));
        let reader = tokio::spawn(read_frames(stream, events_tx, state.clone()));

        Ok(Self {
            outgoing,
            events: Mutex::new(Some(events_rx)),
            state,
            reader,
            writer,
            closed: AtomicBool::new(false),
        })
    }
}

async fn write_frames<Si>(
    mut sink: Si,
    mut outgoing: mpsc::UnboundedReceiver<WsMessage>,
    state: StateCell,
) where
    Si: Sink<WsMessage> + Unpin,
    Si::Error: Display,
{
    while let Some(frame) = outgoing.recv().await {
        let closing = matches!(frame, WsMessage::Close(_));
        if let Err(e) = sink.send(frame).await {
            error!("Error writing to Gemini websocket: {}", e);
            state.set(ConnectionState::Disconnected, Some(e.to_string()));
            return;
        }
        if closing {
            return;
        }
    }
}

async fn read_frames<St, E>(
    mut stream: St,
    events: mpsc::UnboundedSender<EventResult>,
    state: StateCell,
) where
    St: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        let decoded = match frame {
            Ok(WsMessage::Text(text)) => types::decode(text.as_bytes()),
            Ok(WsMessage::Binary(data)) => types::decode(&data),
            Ok(WsMessage::Close(close_frame)) => {
                let reason = close_frame
                    .map(|frame| format!("closed by server: {} {}", frame.code, frame.reason))
                    .unwrap_or_else(|| "closed by server".to_string());
                warn!(%reason, "Gemini websocket closed.");
                state.set(ConnectionState::Disconnected, Some(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Error reading from Gemini websocket: {}", e);
                let _ = events.send(Err(LiveError::Transport(e.to_string())));
                state.set(ConnectionState::Disconnected, Some(e.to_string()));
                return;
            }
        };

        match decoded {
            Ok(decoded) => {
                for event in decoded {
                    if event == ProviderEvent::SetupComplete {
                        info!("Gemini session setup is complete.");
                        state.set(ConnectionState::Connected, None);
                    }
                    if events.send(Ok(event)).is_err() {
                        debug!("Gemini event receiver dropped.");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Undecodable Gemini frame.");
                let _ = events.send(Err(e));
            }
        }
    }
    state.set(
        ConnectionState::Disconnected,
        Some("stream ended".to_string()),
    );
}

#[async_trait]
impl SessionHandle for GeminiSession {
    async fn send(&self, message: LiveMessage) -> Result<(), LiveError> {
        let encoded = types::encode(&message)?;
        let payload =
            serde_json::to_string(&encoded).map_err(|e| LiveError::Protocol(e.to_string()))?;
        self.outgoing
            .send(WsMessage::Text(payload.into()))
            .map_err(|_| LiveError::Transport("Gemini connection is closed".into()))
    }

    fn receive(&self) -> ProviderEventStream {
        let receiver = self
            .events
            .lock()
            .map(|mut events| events.take())
            .unwrap_or_default();
        match receiver {
            Some(receiver) => Box::pin(UnboundedReceiverStream::new(receiver)),
            None => Box::pin(futures_util::stream::empty()),
        }
    }

    fn connection_state_changes(&self) -> ConnectionStateStream {
        Box::pin(WatchStream::new(self.state.0.subscribe()))
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.state.current() == ConnectionState::Connected
    }

    async fn close(&self) -> Result<(), LiveError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // The writer exits after flushing the close frame.
        let _ = self.outgoing.send(WsMessage::Close(None));
        self.reader.abort();
        self.state.set(
            ConnectionState::Disconnected,
            Some("closed by client".to_string()),
        );
        Ok(())
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

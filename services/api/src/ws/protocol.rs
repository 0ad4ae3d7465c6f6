//! Defines the WebSocket message protocol between the browser client and the gateway.

use livewire_core::{ControlSignal, LiveError, LiveEvent, LiveMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_AUDIO_MIME_TYPE: &str = "audio/pcm;rate=16000";

fn default_audio_mime_type() -> String {
    DEFAULT_AUDIO_MIME_TYPE.to_string()
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A text turn from the user.
    Text { text: String },
    /// A chunk of base64 encoded microphone audio.
    Audio {
        data: String,
        #[serde(default = "default_audio_mime_type")]
        mime_type: String,
    },
    ActivityStart,
    ActivityEnd,
    AudioStreamEnd,
}

impl From<ClientMessage> for LiveMessage {
    fn from(message: ClientMessage) -> Self {
        match message {
            ClientMessage::Text { text } => LiveMessage::user_text(text),
            ClientMessage::Audio { data, mime_type } => LiveMessage::user_audio(mime_type, data),
            ClientMessage::ActivityStart => LiveMessage::control(ControlSignal::ActivityStart),
            ClientMessage::ActivityEnd => LiveMessage::control(ControlSignal::ActivityEnd),
            ClientMessage::AudioStreamEnd => LiveMessage::control(ControlSignal::AudioStreamEnd),
        }
    }
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The live session is running; sent once before any event.
    SessionStarted { session_id: Uuid },
    /// One item of the session's output stream.
    Event { event: LiveEvent },
    /// Reports a fatal error to the client. Always the last message.
    Error { code: String, message: String },
}

impl From<&LiveError> for ServerMessage {
    fn from(error: &LiveError) -> Self {
        ServerMessage::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

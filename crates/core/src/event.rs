//! Events received from providers and events emitted to callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::message::{ToolCall, ToolResult};
use crate::state::StateChangeEvent;

/// Opaque token a provider hands out so a dropped session can be resumed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionResumptionHandle(String);

impl SessionResumptionHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionResumptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumptionUpdate {
    pub handle: Option<SessionResumptionHandle>,
    pub resumable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentDelta {
    Text { text: String },
    Audio { mime_type: String, data: String },
    InputTranscription { text: String },
    OutputTranscription { text: String },
}

/// One event from a provider's receive stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    SetupComplete,
    ContentDelta { delta: ContentDelta },
    ToolCall { call: ToolCall },
    ToolCallCancellation { ids: Vec<String> },
    SessionResumption { update: ResumptionUpdate },
    TurnComplete,
    Interrupted,
    /// The provider will drop the connection soon.
    GoAway {
        #[serde(skip_serializing_if = "Option::is_none")]
        time_left: Option<String>,
    },
    SessionEnded { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Transport-level connection transition reported by a session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub reason: Option<String>,
}

impl ConnectionStateChange {
    pub fn new(previous: ConnectionState, current: ConnectionState) -> Self {
        Self {
            previous,
            current,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Why a session ended without a propagated error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEndReason {
    /// The connection dropped and reconnecting was not allowed.
    ConnectionLost,
    /// The provider ended the session.
    ProviderEnded,
}

impl SessionEndReason {
    pub fn code(self) -> &'static str {
        match self {
            SessionEndReason::ConnectionLost => "CONNECTION_LOST",
            SessionEndReason::ProviderEnded => "PROVIDER_ENDED",
        }
    }
}

impl fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Items of a live session's output stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Provider event passed through unchanged.
    Content { event: ProviderEvent },
    /// The provider reported the connection ready.
    Ready,
    StateChanged { change: StateChangeEvent },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        #[serde(with = "duration_millis")]
        delay: Duration,
    },
    Reconnected { attempt: u32 },
    ToolCall { call: ToolCall },
    ToolCallCompleted { result: ToolResult },
    SessionEnded {
        reason: SessionEndReason,
        recoverable: bool,
    },
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
    }
}

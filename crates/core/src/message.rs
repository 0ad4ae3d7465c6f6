//! Messages flowing from the client into a live session.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    /// Out-of-band signals from the client (activity boundaries, stream end).
    Control,
}

impl Role {
    /// Roles whose client input is written to memory before it is sent.
    pub fn is_persisted_on_input(self) -> bool {
        matches!(self, Role::User | Role::Control)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
            Role::Control => write!(f, "control"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    ActivityStart,
    ActivityEnd,
    AudioStreamEnd,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// The outcome of a [`ToolCall`], sent back into the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
            is_error: false,
        }
    }

    /// Wraps a failed execution so the model sees the error as the tool's output.
    pub fn failure(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output: json!({ "error": message.into() }),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveContent {
    Text { text: String },
    /// Base64 encoded audio.
    Audio { mime_type: String, data: String },
    ToolCall { call: ToolCall },
    ToolResult { result: ToolResult },
    Control { signal: ControlSignal },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub role: Role,
    pub content: LiveContent,
}

impl LiveMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: LiveContent::Text { text: text.into() },
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: LiveContent::Text { text: text.into() },
        }
    }

    pub fn user_audio(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: LiveContent::Audio {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn control(signal: ControlSignal) -> Self {
        Self {
            role: Role::Control,
            content: LiveContent::Control { signal },
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: LiveContent::ToolCall { call },
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: LiveContent::ToolResult { result },
        }
    }
}

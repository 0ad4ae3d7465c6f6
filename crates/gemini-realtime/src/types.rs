//! Wire types for the Gemini Live `BidiGenerateContent` websocket protocol.

use livewire_core::{
    ContentDelta, ControlSignal, LiveConfig, LiveContent, LiveError, LiveMessage, ProviderEvent,
    ResponseModality, ResumptionUpdate, Role, SessionResumptionHandle, ToolCall, ToolResult,
    ToolSchema,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// --- Client -> server ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    pub session_resumption: SessionResumptionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

impl Setup {
    pub fn new(
        config: &LiveConfig,
        tools: &[ToolSchema],
        resumption: Option<&SessionResumptionHandle>,
    ) -> Self {
        let audio = config.response_modality == ResponseModality::Audio;
        let speech_config = config
            .voice
            .as_ref()
            .filter(|_| audio)
            .map(|voice| SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.clone(),
                    },
                },
            });

        let tools = if tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: tools
                    .iter()
                    .map(|schema| FunctionDeclaration {
                        name: schema.name.clone(),
                        description: schema.description.clone(),
                        parameters: schema.parameters.clone(),
                    })
                    .collect(),
            }]
        };

        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![if audio { Modality::Audio } else { Modality::Text }],
                speech_config,
            },
            system_instruction: config.instructions.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part { text: text.clone() }],
            }),
            tools,
            session_resumption: SessionResumptionConfig {
                handle: resumption.map(|h| h.as_str().to_string()),
            },
            input_audio_transcription: audio.then_some(Empty {}),
            output_audio_transcription: audio.then_some(Empty {}),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Serialize)]
pub struct SessionResumptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

/// Serializes as `{}`.
#[derive(Debug, Serialize, PartialEq)]
pub struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
pub struct Part {
    pub text: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_stream_end: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl From<&ToolResult> for FunctionResponse {
    fn from(result: &ToolResult) -> Self {
        // The API only accepts an object here.
        let response = match &result.output {
            Value::Object(_) => result.output.clone(),
            other => json!({ "output": other }),
        };
        Self {
            id: result.call_id.clone(),
            name: result.name.clone(),
            response,
        }
    }
}

/// Maps an outgoing message to its wire form.
pub fn encode(message: &LiveMessage) -> Result<ClientMessage, LiveError> {
    let encoded = match &message.content {
        LiveContent::Text { text } => {
            let (role, turn_complete) = match message.role {
                Role::Assistant => ("model", false),
                _ => ("user", true),
            };
            ClientMessage::ClientContent(ClientContent {
                turns: vec![Content {
                    role: Some(role.to_string()),
                    parts: vec![Part { text: text.clone() }],
                }],
                turn_complete,
            })
        }
        LiveContent::Audio { mime_type, data } => ClientMessage::RealtimeInput(RealtimeInput {
            audio: Some(Blob {
                mime_type: mime_type.clone(),
                data: data.clone(),
            }),
            ..RealtimeInput::default()
        }),
        LiveContent::Control { signal } => {
            let mut input = RealtimeInput::default();
            match signal {
                ControlSignal::ActivityStart => input.activity_start = Some(Empty {}),
                ControlSignal::ActivityEnd => input.activity_end = Some(Empty {}),
                ControlSignal::AudioStreamEnd => input.audio_stream_end = Some(true),
            }
            ClientMessage::RealtimeInput(input)
        }
        LiveContent::ToolResult { result } => ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse::from(result)],
        }),
        LiveContent::ToolCall { .. } => {
            return Err(LiveError::Protocol(
                "tool calls cannot be sent to the model".into(),
            ));
        }
    };
    Ok(encoded)
}

// --- Server -> client ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub tool_call: Option<ServerToolCall>,
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    pub go_away: Option<GoAway>,
    pub session_resumption_update: Option<SessionResumptionUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerToolCall {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub args: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumptionUpdate {
    pub new_handle: Option<String>,
    #[serde(default)]
    pub resumable: bool,
}

impl ServerMessage {
    /// Flattens one server frame into provider events, in frame order.
    pub fn into_events(self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(ProviderEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(transcription) = content.input_transcription {
                events.push(ProviderEvent::ContentDelta {
                    delta: ContentDelta::InputTranscription {
                        text: transcription.text,
                    },
                });
            }
            for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
                if let Some(text) = part.text {
                    events.push(ProviderEvent::ContentDelta {
                        delta: ContentDelta::Text { text },
                    });
                }
                if let Some(blob) = part.inline_data {
                    events.push(ProviderEvent::ContentDelta {
                        delta: ContentDelta::Audio {
                            mime_type: blob.mime_type,
                            data: blob.data,
                        },
                    });
                }
            }
            if let Some(transcription) = content.output_transcription {
                events.push(ProviderEvent::ContentDelta {
                    delta: ContentDelta::OutputTranscription {
                        text: transcription.text,
                    },
                });
            }
            if content.interrupted == Some(true) {
                events.push(ProviderEvent::Interrupted);
            }
            if content.turn_complete == Some(true) {
                events.push(ProviderEvent::TurnComplete);
            }
        }

        if let Some(tool_call) = self.tool_call {
            events.extend(tool_call.function_calls.into_iter().map(|call| {
                ProviderEvent::ToolCall {
                    call: ToolCall {
                        id: call.id,
                        name: call.name,
                        arguments: call.args.unwrap_or_else(|| json!({})),
                    },
                }
            }));
        }
        if let Some(cancellation) = self.tool_call_cancellation {
            events.push(ProviderEvent::ToolCallCancellation {
                ids: cancellation.ids,
            });
        }
        if let Some(update) = self.session_resumption_update {
            events.push(ProviderEvent::SessionResumption {
                update: ResumptionUpdate {
                    handle: update.new_handle.map(SessionResumptionHandle::new),
                    resumable: update.resumable,
                },
            });
        }
        if let Some(go_away) = self.go_away {
            events.push(ProviderEvent::GoAway {
                time_left: go_away.time_left,
            });
        }
        events
    }
}

/// Decodes a text or binary frame payload.
pub fn decode(payload: &[u8]) -> Result<Vec<ProviderEvent>, LiveError> {
    serde_json::from_slice::<ServerMessage>(payload)
        .map(ServerMessage::into_events)
        .map_err(|e| LiveError::Protocol(format!("undecodable Gemini frame: {e}")))
}

//! Message shapes exchanged with the remote speech endpoint.
//!
//! These are the provider-neutral shapes the engine produces and consumes.
//! Transports translate them to and from their own envelopes (see the
//! `gemini` module). Audio travels as base64 text inside JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::{SessionConfig, ToolDefinition};

// ── Client messages ─────────────────────────────────────────────────────

/// Messages sent from the client to the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// A media frame (microphone audio or camera image).
    Media(MediaBlob),
    /// The answer to a tool invocation.
    FunctionResponses(FunctionResponse),
    /// A typed user turn.
    Text(String),
}

impl ClientMessage {
    /// Build a media message.
    pub fn media(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Media(MediaBlob { data: data.into(), mime_type: mime_type.into() })
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Media(blob) if blob.mime_type.starts_with("image/") => "video",
            Self::Media(_) => "audio",
            Self::FunctionResponses(_) => "tool_response",
            Self::Text(_) => "text",
        }
    }
}

/// Base64 media payload with its MIME descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    /// Base64-encoded bytes.
    pub data: String,
    /// e.g. `audio/pcm;rate=16000` or `image/jpeg`.
    pub mime_type: String,
}

/// A tool result keyed by the invocation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    /// The invocation id being answered.
    pub id: String,
    /// The tool name the peer asked for.
    pub name: String,
    /// `{ "result": ... }` on success, `{ "error": ... }` on failure.
    pub response: Value,
}

impl FunctionResponse {
    /// A successful result.
    pub fn result(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        Self { id: id.into(), name: name.into(), response: json!({ "result": result }) }
    }

    /// An error-shaped result.
    pub fn error(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), response: json!({ "error": message.into() }) }
    }

    /// Whether this response carries an error.
    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

// ── Server messages ─────────────────────────────────────────────────────

/// A message received from the remote peer.
///
/// Every field is optional; one message may carry audio, transcripts and a
/// turn marker at the same time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Present once, acknowledging the session setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    /// Model output and transcripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    /// Tool invocations the peer is waiting on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallMessage>,
    /// Invocations the peer no longer needs answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    /// The peer is about to disconnect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    /// Parse a raw JSON message.
    pub fn from_json(raw: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The setup acknowledgment message.
    pub fn setup_complete() -> Self {
        Self { setup_complete: Some(json!({})), ..Default::default() }
    }

    /// A message carrying one base64 audio payload.
    pub fn audio(data: impl Into<String>) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: Some("audio/pcm;rate=24000".to_string()),
                            data: data.into(),
                        }),
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// A message carrying tool invocations.
    pub fn tool_call(calls: Vec<ToolInvocation>) -> Self {
        Self { tool_call: Some(ToolCallMessage { function_calls: calls }), ..Default::default() }
    }

    /// Whether this message acknowledges the session setup.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Base64 audio payloads in the order they appear.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.as_deref().is_none_or(|m| m.starts_with("audio/")))
            .map(|blob| blob.data.as_str())
    }
}

/// Model output for the current turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    /// Output parts (audio and/or text).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    /// Transcript of what the user said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    /// Transcript of what the model said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
    /// The model finished its turn.
    #[serde(default)]
    pub turn_complete: bool,
    /// The user barged in; pending output must be cut off.
    #[serde(default)]
    pub interrupted: bool,
}

/// A model turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    /// Content parts.
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Inline binary content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Base64 payload inside a part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    /// MIME type, when the peer sends one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded bytes.
    pub data: String,
}

/// A transcript fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    /// Fragment text.
    #[serde(default)]
    pub text: String,
}

/// Tool invocations bundled in one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallMessage {
    /// The invocations.
    #[serde(default)]
    pub function_calls: Vec<ToolInvocation>,
}

/// One tool invocation from the remote peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Invocation id, echoed back in the result.
    #[serde(default)]
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as JSON.
    #[serde(default)]
    pub args: Value,
}

impl ToolInvocation {
    /// Create a new invocation.
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self { id: id.into(), name: name.into(), args }
    }
}

/// Ids of invocations that no longer need an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    /// Cancelled invocation ids.
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Advance notice of a server-side disconnect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    /// Remaining time, as reported by the peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

// ── Session setup ───────────────────────────────────────────────────────

/// Everything the remote peer needs to know at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSetup {
    /// Model id.
    pub model: String,
    /// Response modalities.
    pub modalities: Vec<String>,
    /// Synthetic voice name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// System instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Declared tools.
    pub tools: Vec<ToolDefinition>,
    /// Ask for input/output transcriptions.
    pub transcription: bool,
}

impl SessionSetup {
    /// Build the setup from a session configuration and the tool table's declarations.
    pub fn from_config(config: &SessionConfig, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: config.model.clone(),
            modalities: config.modalities.clone(),
            voice: config.voice.clone(),
            instruction: config.instruction.clone(),
            tools,
            transcription: config.transcription,
        }
    }
}

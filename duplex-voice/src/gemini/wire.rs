//! Gemini Live JSON envelopes.

use serde::Serialize;
use serde_json::{Value, json};

use crate::config::ToolDefinition;
use crate::error::{DuplexError, Result};
use crate::protocol::{ClientMessage, FunctionResponse, ServerMessage, SessionSetup};

/// Gemini-specific client message format.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    setup: Option<GeminiSetup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realtime_input: Option<GeminiRealtimeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_response: Option<GeminiToolResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_content: Option<GeminiClientContent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiSetup {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_audio_transcription: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_audio_transcription: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiClientContent {
    turns: Vec<GeminiTurn>,
    turn_complete: bool,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiTurn {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRealtimeInput {
    media_chunks: Vec<GeminiMediaChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiMediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolResponse {
    function_responses: Vec<FunctionResponse>,
}

/// Build the first message sent on a new connection.
pub(crate) fn setup_message(setup: &SessionSetup) -> GeminiClientMessage {
    let mut generation_config = json!({ "responseModalities": setup.modalities });

    if let Some(voice) = &setup.voice {
        generation_config["speechConfig"] = json!({
            "voiceConfig": {
                "prebuiltVoiceConfig": {
                    "voiceName": voice
                }
            }
        });
    }

    let system_instruction = setup
        .instruction
        .as_ref()
        .map(|text| GeminiContent { parts: vec![GeminiPart { text: text.clone() }] });

    let transcription = setup.transcription.then(|| json!({}));

    GeminiClientMessage {
        setup: Some(GeminiSetup {
            model: setup.model.clone(),
            system_instruction,
            generation_config,
            tools: convert_tools(&setup.tools),
            input_audio_transcription: transcription.clone(),
            output_audio_transcription: transcription,
        }),
        ..Default::default()
    }
}

/// Wrap a client message in its Gemini envelope.
pub(crate) fn client_message(message: ClientMessage) -> GeminiClientMessage {
    match message {
        ClientMessage::Media(blob) => GeminiClientMessage {
            realtime_input: Some(GeminiRealtimeInput {
                media_chunks: vec![GeminiMediaChunk { mime_type: blob.mime_type, data: blob.data }],
            }),
            ..Default::default()
        },
        ClientMessage::Text(text) => GeminiClientMessage {
            client_content: Some(GeminiClientContent {
                turns: vec![GeminiTurn {
                    role: "user".to_string(),
                    parts: vec![GeminiPart { text }],
                }],
                turn_complete: true,
            }),
            ..Default::default()
        },
        ClientMessage::FunctionResponses(response) => GeminiClientMessage {
            tool_response: Some(GeminiToolResponse { function_responses: vec![response] }),
            ..Default::default()
        },
    }
}

/// Serialize an envelope to the text frame sent on the socket.
pub(crate) fn encode(message: &GeminiClientMessage) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| DuplexError::protocol(format!("JSON serialize error: {}", e)))
}

/// Longest slice of a bad frame quoted in errors and logs.
const RAW_PREVIEW_LEN: usize = 256;

/// Parse a text frame from the server.
pub(crate) fn decode(raw: &str) -> Result<ServerMessage> {
    tracing::trace!(len = raw.len(), raw = %preview(raw), "decoding Gemini message");
    serde_json::from_str(raw).map_err(|e| {
        DuplexError::protocol(format!("Parse error: {}, raw: {}", e, preview(raw)))
    })
}

/// The first `RAW_PREVIEW_LEN` bytes of `raw`, cut on a char boundary.
fn preview(raw: &str) -> std::borrow::Cow<'_, str> {
    if raw.len() <= RAW_PREVIEW_LEN {
        return raw.into();
    }
    let mut end = RAW_PREVIEW_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... ({} bytes)", &raw[..end], raw.len()).into()
}

fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<Value>> {
    if tools.is_empty() {
        return None;
    }
    let function_declarations: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description.clone().unwrap_or_default(),
                "parameters": t.parameters.clone().unwrap_or_else(|| json!({ "type": "object", "properties": {} }))
            })
        })
        .collect();

    Some(vec![json!({ "functionDeclarations": function_declarations })])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;

    fn to_value(message: &GeminiClientMessage) -> Value {
        serde_json::from_str(&encode(message).unwrap()).unwrap()
    }

    #[test]
    fn test_decode_error_quotes_a_bounded_preview() {
        let raw = format!("{{\"serverContent\": \"{}", "é".repeat(100_000));
        let err = decode(&raw).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, DuplexError::ProtocolError(_)));
        assert!(msg.len() < 1024, "error text is {} bytes", msg.len());
        assert!(msg.contains(&format!("({} bytes)", raw.len())));
    }

    #[test]
    fn test_short_frames_are_quoted_whole() {
        let msg = decode("not json").unwrap_err().to_string();
        assert!(msg.ends_with("raw: not json"), "{}", msg);
    }

    #[test]
    fn test_convert_tools() {
        let tools = vec![
            ToolDefinition::new("navigate")
                .with_description("Open a screen")
                .with_parameters(json!({
                    "type": "object",
                    "properties": { "to": { "type": "string" } }
                })),
            ToolDefinition::new("no_params"),
        ];

        let result = convert_tools(&tools).unwrap();
        let decls = result[0]["functionDeclarations"].as_array().unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0]["name"], "navigate");
        assert!(decls[0]["parameters"]["properties"].get("to").is_some());
        assert_eq!(decls[1]["description"], "");
        assert_eq!(decls[1]["parameters"]["type"], "object");
    }

    #[test]
    fn test_convert_tools_empty() {
        assert!(convert_tools(&[]).is_none());
    }

    #[test]
    fn test_setup_message() {
        let config = SessionConfig::new().with_voice("Kore").with_instruction("Be brief.");
        let setup = SessionSetup::from_config(&config, vec![ToolDefinition::new("navigate")]);
        let value = to_value(&setup_message(&setup));

        let body = &value["setup"];
        assert_eq!(body["model"], config.model);
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            body["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "navigate");
        assert_eq!(body["inputAudioTranscription"], json!({}));
    }

    #[test]
    fn test_media_envelope() {
        let value = to_value(&client_message(ClientMessage::media("AAAA", "audio/pcm;rate=16000")));
        assert_eq!(
            value,
            json!({ "realtimeInput": { "mediaChunks": [ { "mimeType": "audio/pcm;rate=16000", "data": "AAAA" } ] } })
        );
    }

    #[test]
    fn test_text_envelope() {
        let value = to_value(&client_message(ClientMessage::Text("hello".into())));
        assert_eq!(value["clientContent"]["turns"][0]["role"], "user");
        assert_eq!(value["clientContent"]["turns"][0]["parts"][0]["text"], "hello");
        assert_eq!(value["clientContent"]["turnComplete"], true);
    }

    #[test]
    fn test_tool_response_envelope() {
        let response = FunctionResponse::result("c1", "navigate", json!("ok"));
        let value = to_value(&client_message(ClientMessage::FunctionResponses(response)));
        assert_eq!(
            value,
            json!({ "toolResponse": { "functionResponses": [ { "id": "c1", "name": "navigate", "response": { "result": "ok" } } ] } })
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(DuplexError::ProtocolError(_))));
        assert!(decode(r#"{"setupComplete": {}}"#).unwrap().is_setup_complete());
    }
}

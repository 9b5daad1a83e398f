//! Gemini Live API transport.
//!
//! Connects to Google's WebSocket-based Live API and translates between the
//! engine's message shapes and Gemini's envelopes:
//!
//! - Input audio: 16kHz mono PCM in `realtimeInput.mediaChunks`
//! - Output audio: 24kHz mono PCM in `serverContent.modelTurn.parts[].inlineData`
//! - Tool results in `toolResponse.functionResponses`
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_voice::gemini::GeminiConnector;
//! use duplex_voice::AudioSession;
//!
//! let session = AudioSession::builder()
//!     .connector(GeminiConnector::from_env()?)
//!     .devices(devices)
//!     .instruction("You are a helpful assistant.")
//!     .build()?;
//! ```

mod connector;
mod wire;

pub use connector::GeminiConnector;

/// Gemini Live API WebSocket URL.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Available voices for Gemini Live (varies by model).
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

//! # duplex-voice
//!
//! Real-time duplex audio streaming between a local microphone/speaker and a
//! remote conversational model.
//!
//! The crate captures microphone audio, resamples it to 16kHz PCM16 and streams
//! it to the peer while scheduling the peer's 24kHz replies for gapless
//! playback. Tool calls issued by the peer are dispatched to registered
//! handlers and every call is answered.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────┐         ┌──────────────────────┐
//!        │     MediaDevices     │         │      Connector       │
//!        │  (cpal, mocks, ...)  │         │  (Gemini Live, ...)  │
//!        └──────────┬───────────┘         └──────────┬───────────┘
//!                   │                                │
//!                   └──────────────┬─────────────────┘
//!                                  │
//!                        ┌─────────▼─────────┐
//!                        │   AudioSession    │──► SessionObserver
//!                        │  (driver task)    │
//!                        └─────────┬─────────┘
//!                                  │
//!          ┌───────────────┬───────┴───────┬────────────────┐
//!          │               │               │                │
//!  ┌───────▼───────┐ ┌─────▼──────┐ ┌──────▼───────┐ ┌──────▼───────┐
//!  │CapturePipeline│ │  Playback  │ │ ToolRegistry │ │  Transcript  │
//!  │ (echo guard)  │ │ Scheduler  │ │              │ │  Coalescer   │
//!  └───────────────┘ └────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! ## Features
//!
//! - `gemini`: WebSocket transport for the Gemini Live API
//! - `desktop-audio`: microphone and speaker access through `cpal`
//!
//! ## Example
//!
//! ```rust,ignore
//! use duplex_voice::{AudioSession, SessionState, ToolDefinition};
//! use duplex_voice::desktop::CpalDevices;
//! use duplex_voice::gemini::GeminiConnector;
//!
//! #[tokio::main]
//! async fn main() -> duplex_voice::Result<()> {
//!     let session = AudioSession::builder()
//!         .connector(GeminiConnector::from_env()?)
//!         .devices(CpalDevices::new())
//!         .instruction("You are a helpful voice assistant.")
//!         .tool_fn(ToolDefinition::new("get_time"), |_| Ok(serde_json::json!("noon")))
//!         .build()?;
//!
//!     session.start().await?;
//!     session.wait_for(|s| *s == SessionState::Active || s.is_terminal()).await?;
//!     tokio::signal::ctrl_c().await?;
//!     session.stop().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod capture;
pub mod config;
pub mod devices;
pub mod error;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod surface;
pub mod tools;
pub mod transcript;
pub mod transport;

// Backends
#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "desktop-audio")]
pub mod desktop;

// Re-exports
pub use audio::{AudioChunk, AudioFormat, AudioFrame, INPUT_TARGET_RATE, OUTPUT_RATE};
pub use capture::{CaptureOutcome, CapturePipeline, downsample};
pub use config::{SessionConfig, ToolDefinition};
pub use devices::{CaptureContext, MediaDevices, MediaTrack, Microphone, OutputContext};
pub use error::{DuplexError, Result};
pub use playback::{PlaybackMonitor, PlaybackScheduler};
pub use protocol::{ClientMessage, FunctionResponse, ServerMessage, SessionSetup, ToolInvocation};
pub use session::{AudioSession, AudioSessionBuilder, NoOpObserver, SessionObserver, SessionState};
pub use surface::ConversationSurface;
pub use tools::{AsyncToolHandler, FnToolHandler, ToolHandler, ToolRegistry};
pub use transcript::{Speaker, TranscriptEntry};
pub use transport::{Connector, Link, LinkEvent, LinkPeer};

//! Voice Console
//!
//! Talk to Gemini Live from the terminal using the default microphone and
//! speaker. Transcripts are printed as they arrive; a couple of local tools
//! show the dispatch path.
//!
//! # Usage
//!
//! ```bash
//! export GOOGLE_API_KEY="your-api-key"
//! cargo run --example voice_console --features gemini,desktop-audio
//! ```
//!
//! Optionally pass a TOML file with session settings:
//!
//! ```bash
//! cargo run --example voice_console --features gemini,desktop-audio -- console.toml
//! ```
//!
//! Press Ctrl+C to hang up.

use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use duplex_voice::desktop::CpalDevices;
use duplex_voice::gemini::GeminiConnector;
use duplex_voice::{
    AudioSession, DuplexError, SessionConfig, SessionObserver, SessionState, Speaker,
    ToolDefinition, ToolInvocation, TranscriptEntry,
};
use serde_json::json;
use tracing::{error, info, warn};

struct ConsoleObserver;

#[async_trait]
impl SessionObserver for ConsoleObserver {
    async fn on_state_change(&self, state: SessionState) -> duplex_voice::Result<()> {
        info!(%state, "status");
        Ok(())
    }

    async fn on_transcript(&self, entry: &TranscriptEntry) -> duplex_voice::Result<()> {
        if entry.is_final {
            let who = match entry.speaker {
                Speaker::User => "you",
                Speaker::Model => "model",
            };
            println!("[{}] {}", who, entry.text);
        }
        Ok(())
    }

    async fn on_tool_call(&self, call: &ToolInvocation) -> duplex_voice::Result<()> {
        info!(tool = %call.name, args = %call.args, "tool call");
        Ok(())
    }

    async fn on_error(&self, error: &DuplexError) -> duplex_voice::Result<()> {
        error!(error = %error, "session error");
        Ok(())
    }
}

fn load_config() -> anyhow::Result<SessionConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(SessionConfig::from_toml_str(&raw)?)
        }
        None => Ok(SessionConfig::new()
            .with_instruction("You are a friendly voice assistant. Keep answers short.")),
    }
}

async fn run() -> anyhow::Result<()> {
    let config = load_config()?;
    info!(model = %config.model, voice = ?config.voice, "Configuring session");

    let session = AudioSession::builder()
        .config(config)
        .connector(GeminiConnector::from_env()?)
        .devices(CpalDevices::new())
        .observer(ConsoleObserver)
        .tool_fn(
            ToolDefinition::new("get_time").with_description("Current UNIX time in seconds"),
            |_| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| DuplexError::tool(e.to_string()))?;
                Ok(json!(now.as_secs()))
            },
        )
        .tool_fn(
            ToolDefinition::new("roll_die")
                .with_description("Roll a die with the given number of sides")
                .with_parameters(json!({
                    "type": "object",
                    "properties": { "sides": { "type": "integer", "minimum": 2 } },
                    "required": ["sides"]
                })),
            |call| {
                let sides = call.args["sides"].as_u64().filter(|s| *s >= 2).ok_or_else(|| {
                    DuplexError::tool("sides must be an integer of at least 2")
                })?;
                let seed = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() as u64)
                    .unwrap_or(0);
                Ok(json!(seed % sides + 1))
            },
        )
        .build()?;

    session.start().await?;
    let state = session.wait_for(|s| *s == SessionState::Active || s.is_terminal()).await?;
    if state != SessionState::Active {
        anyhow::bail!("session ended before it became active ({})", state);
    }
    info!(session_id = %session.id(), "Listening. Press Ctrl+C to hang up.");

    let mut states = session.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Hanging up"),
        _ = states.wait_for(|s| s.is_terminal()) => warn!("Session ended by the remote side"),
    }

    session.stop().await;
    info!(
        frames_sent = session.frames_sent(),
        frames_dropped = session.frames_dropped(),
        "Session closed"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Voice console failed");
            ExitCode::FAILURE
        }
    }
}

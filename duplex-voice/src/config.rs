//! Configuration types for duplex audio sessions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::{INPUT_TARGET_RATE, OUTPUT_RATE};
use crate::error::{DuplexError, Result};

/// Default model for the remote speech endpoint.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default voice.
pub const DEFAULT_VOICE: &str = "Puck";

/// Default lead time added when playback has underrun.
pub const DEFAULT_PLAYBACK_PAD: f64 = 0.05;

/// Tool/function definition declared to the remote peer at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None, parameters: None }
    }

    /// Set the tool description.
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = Some(schema);
        self
    }
}

/// Configuration for a duplex audio session.
///
/// Every conversation surface (assistant button, chat, language tutor, live
/// studio, voice console) differs only in these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model to use (provider-specific).
    pub model: String,

    /// System instruction for the remote peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    /// Synthetic voice for audio output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Response modalities, `["AUDIO"]` by default.
    pub modalities: Vec<String>,

    /// Rate microphone audio is resampled to before sending.
    pub input_sample_rate: u32,

    /// Rate of the audio the remote peer sends back.
    pub output_sample_rate: u32,

    /// Seconds of lead time used when playback has underrun.
    pub playback_pad_secs: f64,

    /// Transcript fragments closer together than this are merged.
    #[serde(with = "duration_millis")]
    pub transcript_merge_window: Duration,

    /// Upper bound on one tool round trip. `None` waits forever.
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub tool_timeout: Option<Duration>,

    /// Interval between camera frames. `None` or zero disables video.
    #[serde(with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub video_frame_interval: Option<Duration>,

    /// Capacity of the outbound message queue shared by capture and controller.
    pub outbound_capacity: usize,

    /// Whether to ask for input/output transcriptions.
    pub transcription: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instruction: None,
            voice: Some(DEFAULT_VOICE.to_string()),
            modalities: vec!["AUDIO".to_string()],
            input_sample_rate: INPUT_TARGET_RATE,
            output_sample_rate: OUTPUT_RATE,
            playback_pad_secs: DEFAULT_PLAYBACK_PAD,
            transcript_merge_window: Duration::from_secs(3),
            tool_timeout: Some(Duration::from_secs(30)),
            video_frame_interval: None,
            outbound_capacity: 256,
            transcription: true,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| DuplexError::config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the system instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set the voice.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Set the output sample rate.
    pub fn with_output_sample_rate(mut self, rate: u32) -> Self {
        self.output_sample_rate = rate;
        self
    }

    /// Set the underrun pad in seconds.
    pub fn with_playback_pad(mut self, secs: f64) -> Self {
        self.playback_pad_secs = secs;
        self
    }

    /// Set the tool timeout, `None` to wait indefinitely.
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Enable camera frames at the given interval.
    pub fn with_video_interval(mut self, interval: Duration) -> Self {
        self.video_frame_interval = Some(interval);
        self
    }

    /// Set the transcript merge window.
    pub fn with_transcript_merge_window(mut self, window: Duration) -> Self {
        self.transcript_merge_window = window;
        self
    }

    /// The effective video interval, if video is enabled.
    pub fn video_interval(&self) -> Option<Duration> {
        self.video_frame_interval.filter(|d| !d.is_zero())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(DuplexError::config("model must not be empty"));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(DuplexError::config("sample rates must be non-zero"));
        }
        if !(self.playback_pad_secs.is_finite() && self.playback_pad_secs > 0.0) {
            return Err(DuplexError::config("playback pad must be a positive number of seconds"));
        }
        if self.outbound_capacity == 0 {
            return Err(DuplexError::config("outbound capacity must be at least 1"));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

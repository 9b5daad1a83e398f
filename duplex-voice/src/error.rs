//! Error types for the duplex audio engine.

use thiserror::Error;

/// Result type for duplex audio operations.
pub type Result<T> = std::result::Result<T, DuplexError>;

/// Errors that can occur while running a duplex audio session.
///
/// The variants split into two groups. Permission, device, connection and
/// protocol errors are fatal to the session and always travel through the
/// teardown path. Decode and tool errors are local: the session logs them and
/// keeps going.
#[derive(Error, Debug)]
pub enum DuplexError {
    /// Microphone or camera access was denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A capture or playback device is unavailable or failed.
    #[error("Audio device error: {0}")]
    DeviceError(String),

    /// The duplex link could not be opened or broke while streaming.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The remote peer sent something we could not understand.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// An inbound audio payload could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// A host tool handler failed.
    #[error("Tool execution error: {0}")]
    ToolError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Timeout waiting for an operation.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The operation is not valid in the session's current state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The session was already closed and cannot be reused.
    #[error("Session already closed")]
    SessionClosed,

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DuplexError {
    /// Create a new permission error.
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a new device error.
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::ProtocolError(msg.into())
    }

    /// Create a new decode error.
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeError(msg.into())
    }

    /// Create a new tool error.
    pub fn tool<S: Into<String>>(msg: S) -> Self {
        Self::ToolError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether this error ends the session it occurred in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::DeviceError(_)
                | Self::ConnectionError(_)
                | Self::ProtocolError(_)
        )
    }
}

//! Error types for Beacon live sessions

use thiserror::Error;

/// Result type alias for live session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a live voice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access refused or unavailable
    #[error("microphone permission error: {0}")]
    Permission(String),

    /// Handshake failure or mid-session transport fault
    #[error("connection error: {0}")]
    Connection(String),

    /// A single outbound audio chunk could not be sent
    #[error("send error: {0}")]
    Send(String),

    /// A session is already connecting or open
    #[error("a live session is already active")]
    SessionActive,

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed inbound audio payload
    #[error("decode error: {0}")]
    Decode(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

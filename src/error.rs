//! Error types for parley

use thiserror::Error;

/// Result type alias for parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone permission or hardware failure
    #[error("audio device unavailable: {0}")]
    Device(String),

    /// Audio encoding/decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech synthesis playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Request to /api/chat had no audio payload
    #[error("no audio file uploaded")]
    MissingAudio,

    /// Speech-to-text external call failed
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Text-generation external call failed
    #[error("generation failed: {0}")]
    Generation(String),

    /// Gateway request failed or returned a malformed body
    #[error("network error: {0}")]
    Network(String),

    /// Persisted history is malformed
    #[error("history error: {0}")]
    History(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

//! Error types for parley

use thiserror::Error;

use crate::voice::ClassificationError;

/// Result type alias for parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Input frame source failed (device closed, stream torn down)
    #[error("input error: {0}")]
    Input(String),

    /// Output sink failed
    #[error("output error: {0}")]
    Output(String),

    /// Playback worker error
    #[error("playback error: {0}")]
    Playback(String),

    /// Speech classifier rejected a frame
    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    /// Base64 audio chunk could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

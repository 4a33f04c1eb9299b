//! Error types for the parley-core library

use thiserror::Error;

/// Main error type for parley operations.
///
/// Every variant carries a rendered message so the error can be cloned and
/// moved across the worker pool's channels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParleyError {
    /// The input could not be decoded or split into segments.
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// The speech-to-text engine or remote service failed. Fatal to the whole run.
    #[error("Transcription service error: {0}")]
    TranscriptionService(String),

    /// A temporary directory or file could not be created or removed.
    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model error: {0}")]
    Model(String),

    /// The worker pool broke down before every segment reported back.
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

/// Result type alias for parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;

impl ParleyError {
    /// Whether the error came from the speech-to-text engine or service.
    pub fn is_service_failure(&self) -> bool {
        matches!(self, ParleyError::TranscriptionService(_))
    }
}

impl From<std::io::Error> for ParleyError {
    fn from(err: std::io::Error) -> Self {
        ParleyError::Resource(err.to_string())
    }
}

impl From<ffmpeg_next::Error> for ParleyError {
    fn from(err: ffmpeg_next::Error) -> Self {
        ParleyError::Segmentation(format!("FFmpeg: {}", err))
    }
}

impl From<hound::Error> for ParleyError {
    fn from(err: hound::Error) -> Self {
        ParleyError::Resource(format!("WAV encoding failed: {}", err))
    }
}

impl From<reqwest::Error> for ParleyError {
    fn from(err: reqwest::Error) -> Self {
        ParleyError::TranscriptionService(err.to_string())
    }
}

//! Structured error type for public API surfaces.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TtsError>;

/// Errors surfaced to the caller of a synthesis request.
///
/// Nothing in this crate retries on error; every failure is returned to the
/// request that caused it.
#[derive(Debug, Error)]
pub enum TtsError {
    /// Empty or otherwise unusable input text. Raised before any native call.
    #[error("Invalid input: {0}")]
    Input(String),

    /// The native phonemizer failed. `code` is the library's last error code.
    #[error("Phonemizer failed with error code {code}: {message}")]
    Phonemizer { code: i32, message: String },

    /// word2ph does not describe the phoneme sequence it is paired with.
    #[error("Alignment mismatch: {0}")]
    Alignment(String),

    /// Style-vector file with the wrong dtype, shape, or memory order.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Caller-provided output buffer is too small.
    #[error("Output buffer too small: need {required}, got {available}")]
    Capacity { required: usize, available: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Pipeline has been disposed")]
    Disposed,

    #[error("Style vectors are not loaded")]
    NotLoaded,

    #[error("Style id {id} out of range (have {count} styles)")]
    StyleOutOfRange { id: usize, count: usize },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load native library: {0}")]
    Library(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat error classification for hosts that cannot carry the full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Input,
    Phonemizer,
    Alignment,
    UnsupportedFormat,
    Capacity,
    Cancelled,
    Disposed,
    Style,
    Inference,
    Config,
    Io,
}

impl TtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TtsError::Input(_) => ErrorKind::Input,
            TtsError::Phonemizer { .. } => ErrorKind::Phonemizer,
            TtsError::Alignment(_) => ErrorKind::Alignment,
            TtsError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            TtsError::Capacity { .. } => ErrorKind::Capacity,
            TtsError::Cancelled => ErrorKind::Cancelled,
            TtsError::Disposed => ErrorKind::Disposed,
            TtsError::NotLoaded | TtsError::StyleOutOfRange { .. } => ErrorKind::Style,
            TtsError::Inference(_) => ErrorKind::Inference,
            TtsError::Config(_) | TtsError::Json(_) => ErrorKind::Config,
            TtsError::Library(_) | TtsError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TtsError::Cancelled)
    }
}

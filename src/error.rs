//! Error handling for Overdub
//!
//! Environmental failures (permissions, codec support) are recoverable and
//! are expected to be degraded locally. Invalid state transitions are
//! programmer errors and are never recoverable.

use thiserror::Error;

/// Result type alias for Overdub operations
pub type Result<T> = std::result::Result<T, OverdubError>;

/// Main error type for Overdub operations
#[derive(Error, Debug)]
pub enum OverdubError {
    // Platform Errors
    #[error("Microphone access denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Audio Errors
    #[error("Failed to decode audio: {reason}")]
    DecodeFailed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Recording produced no data")]
    EmptyRecording,

    // State Machine Errors
    #[error("Cannot {action} while {from}")]
    InvalidTransition { from: String, action: String },

    // Track / Storage Errors
    #[error("Track not found: {id}")]
    TrackNotFound { id: String },

    #[error("Upload rejected: {reason}")]
    UploadRejected { reason: String },

    #[error("Storage error: {reason}")]
    Storage { reason: String },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OverdubError {
    /// Build an `InvalidTransition` from anything displayable as a state
    pub fn invalid_transition(from: impl std::fmt::Display, action: &str) -> Self {
        OverdubError::InvalidTransition {
            from: from.to_string(),
            action: action.to_string(),
        }
    }

    /// Build a `DecodeFailed` without an underlying source
    pub fn decode(reason: impl Into<String>) -> Self {
        OverdubError::DecodeFailed {
            reason: reason.into(),
            source: None,
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            OverdubError::PermissionDenied { .. } => "PERMISSION_DENIED",
            OverdubError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            OverdubError::DecodeFailed { .. } => "DECODE_FAILED",
            OverdubError::EmptyRecording => "EMPTY_RECORDING",
            OverdubError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OverdubError::TrackNotFound { .. } => "TRACK_NOT_FOUND",
            OverdubError::UploadRejected { .. } => "UPLOAD_REJECTED",
            OverdubError::Storage { .. } => "STORAGE_ERROR",
            OverdubError::Config { .. } => "CONFIG_ERROR",
            OverdubError::Io(_) => "IO_ERROR",
            OverdubError::Wav(_) => "WAV_ERROR",
            OverdubError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the engine in a valid state; the caller may
    /// retry or substitute a placeholder.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OverdubError::PermissionDenied { .. }
                | OverdubError::UnsupportedFormat { .. }
                | OverdubError::DecodeFailed { .. }
                | OverdubError::EmptyRecording
                | OverdubError::TrackNotFound { .. }
                | OverdubError::UploadRejected { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            OverdubError::PermissionDenied { .. } => vec![
                "Allow microphone access in the system or browser settings",
                "Check that no other application holds the input device",
            ],
            OverdubError::UnsupportedFormat { .. } => vec![
                "Convert the file to WAV first",
                "Supported formats: WAV, MP4/M4A, MP3, FLAC, OGG Vorbis; Opus cannot be decoded",
            ],
            OverdubError::DecodeFailed { .. } => vec![
                "The file may be corrupted - try re-exporting from source",
                "A flat waveform is shown until the track can be decoded",
            ],
            OverdubError::EmptyRecording => vec![
                "Check that the microphone is delivering audio",
                "Record for longer before stopping",
            ],
            _ => vec![],
        }
    }
}

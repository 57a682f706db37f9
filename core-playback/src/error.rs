//! # Playback Error Types
//!
//! Error taxonomy shared by the decode core, the frame converter and the
//! playback session.

use thiserror::Error;

/// Errors that can occur during decode and playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Path is missing, unreadable or not a regular file.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    // ========================================================================
    // Format/Stream Errors
    // ========================================================================
    /// No demuxer accepted the container.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Neither a video nor an audio stream could be selected.
    #[error("No decodable streams: {0}")]
    NoDecodableStreams(String),

    /// The operation needs a video stream and the source has none.
    #[error("No video stream")]
    NoVideoStream,

    // ========================================================================
    // Decoding Errors
    // ========================================================================
    /// Decode-ahead limit exceeded before reaching the seek target.
    #[error("Seek timed out after {frames} frames (target {target_ms} ms)")]
    SeekTimeout { target_ms: i64, frames: usize },

    /// Mid-stream decode fault.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    // ========================================================================
    // Argument Errors
    // ========================================================================
    /// Target size rejected by the frame converter.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    /// Playback speed must be strictly positive.
    #[error("Invalid speed: {0} (must be > 0)")]
    InvalidSpeed(f32),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Command not allowed in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The session or decode core has already been released.
    #[error("Released")]
    Released,

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if the source itself could not be reached.
    pub fn is_source_error(&self) -> bool {
        matches!(self, PlaybackError::SourceUnavailable(_) | PlaybackError::Io(_))
    }

    /// Returns `true` if this error is related to container/stream issues.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::UnsupportedFormat(_)
                | PlaybackError::NoDecodableStreams(_)
                | PlaybackError::NoVideoStream
        )
    }

    /// Returns `true` if a live session can keep going after this error.
    ///
    /// Only argument errors qualify: they are rejected without side effects.
    /// Decode and seek faults on a live session move it to `Error`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::InvalidDimensions { .. }
                | PlaybackError::InvalidSpeed(_)
                | PlaybackError::InvalidState(_)
        )
    }
}

impl From<bridge_traits::BridgeError> for PlaybackError {
    fn from(err: bridge_traits::BridgeError) -> Self {
        PlaybackError::Internal(format!("Bridge error: {}", err))
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(PlaybackError::SourceUnavailable("gone".into()).is_source_error());
        assert!(PlaybackError::NoVideoStream.is_format_error());
        assert!(PlaybackError::UnsupportedFormat("txt".into()).is_format_error());
        assert!(!PlaybackError::DecodeFailure("bad".into()).is_recoverable());
        assert!(PlaybackError::InvalidSpeed(0.0).is_recoverable());
        assert!(!PlaybackError::SeekTimeout {
            target_ms: 9000,
            frames: 600
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = PlaybackError::InvalidDimensions {
            width: 0,
            height: 0,
        };
        assert_eq!(err.to_string(), "Invalid dimensions: 0x0");

        let err = PlaybackError::SeekTimeout {
            target_ms: 9000,
            frames: 600,
        };
        assert!(err.to_string().contains("600 frames"));
    }
}

use core_playback::PlaybackError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal fault: {0}")]
    Panicked(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),
}

impl MetadataError {
    /// The underlying decode error, if any.
    pub fn as_playback(&self) -> Option<&PlaybackError> {
        match self {
            MetadataError::Playback(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` when the source has no video stream.
    pub fn is_no_video(&self) -> bool {
        matches!(self, MetadataError::Playback(PlaybackError::NoVideoStream))
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Run `f`, turning a panic into [`MetadataError::Panicked`].
pub(crate) fn guard<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(message = %message, "Recovered from panic");
            Err(MetadataError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_catches_panics() {
        let result: Result<()> = guard(|| panic!("decoder exploded"));
        match result {
            Err(MetadataError::Panicked(message)) => assert_eq!(message, "decoder exploded"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_playback_errors_are_transparent() {
        let err = MetadataError::from(PlaybackError::NoVideoStream);
        assert_eq!(err.to_string(), "No video stream");
        assert!(err.is_no_video());
        assert!(err.as_playback().is_some());
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] core_metadata::MetadataError),
}

impl EngineError {
    /// Whether the failure came from a session command rejected in the
    /// session's current state (for example `play` while `Error`).
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            EngineError::Playback(core_playback::PlaybackError::InvalidState(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use core_playback::PlaybackError;

    #[test]
    fn test_playback_errors_convert() {
        let err: EngineError = PlaybackError::InvalidSpeed(0.0).into();
        assert!(matches!(err, EngineError::Playback(_)));
        assert!(!err.is_invalid_state());

        let err: EngineError = PlaybackError::InvalidState("cannot play while error".into()).into();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_runtime_errors_convert() {
        let err: EngineError = core_runtime::Error::LoggingAlreadyInitialized.into();
        assert!(err.to_string().contains("Logging already initialized"));
    }
}

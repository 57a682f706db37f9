//! # Engine Configuration
//!
//! Builder for [`EngineConfig`], the settings a [`MediaEngine`] is created
//! with.
//!
//! ## Usage
//!
//! ```no_run
//! use core_service::{EngineConfig, SessionConfig};
//! use core_runtime::logging::{LogFormat, LoggingConfig};
//!
//! let config = EngineConfig::builder()
//!     .session(SessionConfig::low_latency())
//!     .event_buffer_size(512)
//!     .logging(LoggingConfig::default().with_format(LogFormat::Json))
//!     .build()
//!     .expect("valid config");
//! ```
//!
//! Everything is optional. Without an explicit backend the engine uses
//! [`core_playback::default_backend`], which picks FFmpeg when the `ffmpeg`
//! feature is on and Symphonia otherwise.
//!
//! [`MediaEngine`]: crate::MediaEngine

use crate::error::{EngineError, Result};
use bridge_traits::{Clock, SystemClock};
use core_playback::{MediaBackend, SessionConfig};
use core_runtime::events::DEFAULT_EVENT_BUFFER_SIZE;
use core_runtime::logging::LoggingConfig;
use std::fmt;
use std::sync::Arc;

/// Upper bound for the engine-wide bus capacity.
const MAX_EVENT_BUFFER_SIZE: usize = 65_536;

/// Settings for one [`MediaEngine`](crate::MediaEngine).
#[derive(Clone)]
pub struct EngineConfig {
    /// Tunables shared by every session and the thumbnail service.
    pub session: SessionConfig,

    /// Capacity of the engine-wide event bus.
    pub event_buffer_size: usize,

    /// Logging bootstrap, applied once by the first successful
    /// [`MediaEngine::initialize`](crate::MediaEngine::initialize).
    pub logging: Option<LoggingConfig>,

    /// Decode backend. `None` selects the default backend at engine creation.
    pub backend: Option<Arc<dyn MediaBackend>>,

    /// Time source for playback clocks.
    pub clock: Arc<dyn Clock>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            logging: None,
            backend: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("session", &self.session)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("logging", &self.logging)
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Session tunables (decode-ahead bounds, speed window, intervals)
    /// - Event bus capacity is > 0 and at most 65,536
    pub fn validate(&self) -> Result<()> {
        self.session.validate().map_err(EngineError::Config)?;

        if self.event_buffer_size == 0 {
            return Err(EngineError::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(EngineError::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    session: Option<SessionConfig>,
    event_buffer_size: Option<usize>,
    logging: Option<LoggingConfig>,
    backend: Option<Arc<dyn MediaBackend>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineConfigBuilder {
    pub fn session(mut self, config: SessionConfig) -> Self {
        self.session = Some(config);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = Some(config);
        self
    }

    /// Decode backend to use instead of the default one.
    pub fn backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Config` when validation fails.
    pub fn build(self) -> Result<EngineConfig> {
        let defaults = EngineConfig::default();
        let config = EngineConfig {
            session: self.session.unwrap_or(defaults.session),
            event_buffer_size: self.event_buffer_size.unwrap_or(defaults.event_buffer_size),
            logging: self.logging,
            backend: self.backend,
            clock: self.clock.unwrap_or(defaults.clock),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder().build().unwrap();
        assert_eq!(config.session, SessionConfig::default());
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert!(config.logging.is_none());
        assert!(config.backend.is_none());
    }

    #[test]
    fn test_builder_rejects_empty_bus() {
        let result = EngineConfig::builder().event_buffer_size(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Event buffer size must be greater than 0"));
    }

    #[test]
    fn test_builder_rejects_oversized_bus() {
        let result = EngineConfig::builder()
            .event_buffer_size(MAX_EVENT_BUFFER_SIZE + 1)
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_builder_validates_session_config() {
        let session = SessionConfig {
            min_speed: 4.0,
            max_speed: 2.0,
            ..SessionConfig::default()
        };
        let result = EngineConfig::builder().session(session).build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_builder_keeps_overrides() {
        let session = SessionConfig {
            position_interval: Duration::from_millis(100),
            ..SessionConfig::default()
        };
        let config = EngineConfig::builder()
            .session(session.clone())
            .event_buffer_size(32)
            .logging(LoggingConfig::default())
            .build()
            .unwrap();

        assert_eq!(config.session, session);
        assert_eq!(config.event_buffer_size, 32);
        assert!(config.logging.is_some());
    }
}

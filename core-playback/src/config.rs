//! # Session Configuration
//!
//! Tunables for decode-ahead bounds, event pacing and speed limits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Playback session configuration.
///
/// Shared by every session an engine creates and by the thumbnail service,
/// which only reads the exact-seek bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames an exact seek may decode forward from the keyframe before
    /// failing with `SeekTimeout`.
    ///
    /// Default: 600 (20 s of 30 fps video, longer than any sane GOP).
    #[serde(default = "default_max_exact_seek_frames")]
    pub max_exact_seek_frames: usize,

    /// Frames a fast (keyframe) seek may consume without producing a frame
    /// of the primary stream.
    ///
    /// Default: 120.
    #[serde(default = "default_max_fast_seek_frames")]
    pub max_fast_seek_frames: usize,

    /// Minimum spacing between two `onPosition` events.
    ///
    /// Default: 250ms.
    #[serde(default = "default_position_interval")]
    pub position_interval: Duration,

    /// Quiet window a seek waits for a superseding seek before decoding.
    ///
    /// Default: 16ms.
    #[serde(default = "default_seek_debounce")]
    pub seek_debounce: Duration,

    /// Lower clamp for positive speeds.
    ///
    /// Default: 0.25.
    #[serde(default = "default_min_speed")]
    pub min_speed: f32,

    /// Upper clamp for positive speeds.
    ///
    /// Default: 3.0.
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,

    /// Decode faults tolerated in a row before the session errors out.
    ///
    /// Default: 10.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: usize,

    /// Output latency subtracted from the clock when audio is attached.
    ///
    /// Default: 0.
    #[serde(default)]
    pub audio_latency: Duration,

    /// Time a playing clock may stand still before a stall is logged.
    ///
    /// Default: 500ms.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_exact_seek_frames: default_max_exact_seek_frames(),
            max_fast_seek_frames: default_max_fast_seek_frames(),
            position_interval: default_position_interval(),
            seek_debounce: default_seek_debounce(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
            max_consecutive_errors: default_max_consecutive_errors(),
            audio_latency: Duration::ZERO,
            stall_timeout: default_stall_timeout(),
        }
    }
}

impl SessionConfig {
    /// Configuration for scrubbing-heavy UIs.
    ///
    /// - Frequent position updates (100ms)
    /// - No seek debounce window
    /// - Tighter fast-seek bound
    pub fn low_latency() -> Self {
        Self {
            position_interval: Duration::from_millis(100),
            seek_debounce: Duration::ZERO,
            max_fast_seek_frames: 60,
            ..Default::default()
        }
    }

    /// Configuration for thumbnail strips over long-GOP sources.
    ///
    /// - Generous exact-seek bound (1800 frames)
    pub fn thumbnail_friendly() -> Self {
        Self {
            max_exact_seek_frames: 1800,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_exact_seek_frames == 0 {
            return Err("max_exact_seek_frames must be > 0".to_string());
        }

        if self.max_fast_seek_frames == 0 {
            return Err("max_fast_seek_frames must be > 0".to_string());
        }

        if self.position_interval.is_zero() {
            return Err("position_interval must be > 0".to_string());
        }

        if !(self.min_speed > 0.0) || !self.min_speed.is_finite() {
            return Err("min_speed must be a positive number".to_string());
        }

        if !self.max_speed.is_finite() || self.max_speed < self.min_speed {
            return Err("max_speed cannot be lower than min_speed".to_string());
        }

        if self.max_consecutive_errors == 0 {
            return Err("max_consecutive_errors must be > 0".to_string());
        }

        Ok(())
    }

    /// Clamp a positive speed into `[min_speed, max_speed]`.
    pub fn clamp_speed(&self, speed: f32) -> f32 {
        speed.clamp(self.min_speed, self.max_speed)
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_max_exact_seek_frames() -> usize {
    600
}

fn default_max_fast_seek_frames() -> usize {
    120
}

fn default_position_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_seek_debounce() -> Duration {
    Duration::from_millis(16)
}

fn default_min_speed() -> f32 {
    0.25
}

fn default_max_speed() -> f32 {
    3.0
}

fn default_max_consecutive_errors() -> usize {
    10
}

fn default_stall_timeout() -> Duration {
    Duration::from_millis(500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_exact_seek_frames, 600);
        assert_eq!(config.position_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(SessionConfig::low_latency().validate().is_ok());
        assert!(SessionConfig::thumbnail_friendly().validate().is_ok());
        assert_eq!(SessionConfig::low_latency().seek_debounce, Duration::ZERO);
    }

    #[test]
    fn test_invalid_configs() {
        let config = SessionConfig {
            max_exact_seek_frames: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            min_speed: 2.0,
            max_speed: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            min_speed: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_clamp_speed() {
        let config = SessionConfig::default();
        assert_eq!(config.clamp_speed(0.1), 0.25);
        assert_eq!(config.clamp_speed(1.5), 1.5);
        assert_eq!(config.clamp_speed(8.0), 3.0);
    }

    #[test]
    fn test_serde_defaults_fill_missing_fields() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"max_exact_seek_frames": 90}"#).unwrap();
        assert_eq!(config.max_exact_seek_frames, 90);
        assert_eq!(config.max_speed, 3.0);
        assert_eq!(config.stall_timeout, Duration::from_millis(500));
    }
}

//! Audio output bridge.
//!
//! The engine decodes audio to interleaved `f32` PCM and pushes it to a
//! host-provided [`AudioOutput`] (Oboe/AAudio, AVAudioEngine, cpal). Device
//! and route changes flow back through [`AudioOutput::state`] and surface as
//! `onAudioStateChanged` events; they never change the playback state
//! machine by themselves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::platform::PlatformSendSync;

/// Audio device/route state as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioRouteState {
    /// Output opened and idle.
    Ready,
    /// Output is consuming samples.
    Playing,
    /// Output paused by the engine.
    Paused,
    /// The OS stopped the stream (route change, focus loss).
    StoppedBySystem,
    /// The device is gone and cannot be restarted.
    Dead,
}

impl AudioRouteState {
    /// Wire string used on the event channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioRouteState::Ready => "ready",
            AudioRouteState::Playing => "playing",
            AudioRouteState::Paused => "paused",
            AudioRouteState::StoppedBySystem => "stoppedBySystem",
            AudioRouteState::Dead => "dead",
        }
    }
}

impl fmt::Display for AudioRouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioRouteState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(AudioRouteState::Ready),
            "playing" => Ok(AudioRouteState::Playing),
            "paused" => Ok(AudioRouteState::Paused),
            "stoppedBySystem" => Ok(AudioRouteState::StoppedBySystem),
            "dead" => Ok(AudioRouteState::Dead),
            other => Err(BridgeError::OperationFailed(format!(
                "unknown audio state: {}",
                other
            ))),
        }
    }
}

/// Chunk of decoded PCM handed to an [`AudioOutput`].
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved samples in the range `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Channel count of `samples`.
    pub channels: u16,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Presentation timestamp of the first frame.
    pub pts: Duration,
}

impl AudioChunk {
    /// Number of frames (samples per channel) in the chunk.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration of the chunk at 1x speed.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Host audio sink.
pub trait AudioOutput: PlatformSendSync {
    /// Open the device for the given stream format.
    fn configure(&self, sample_rate: u32, channels: u16) -> Result<()>;

    /// Queue a chunk for playback. Returns the number of frames accepted.
    fn write(&self, chunk: &AudioChunk) -> Result<usize>;

    fn start(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    /// Drop queued samples (after a seek).
    fn flush(&self) -> Result<()>;

    /// Apply a playback rate. Outputs without time-stretching may ignore it.
    fn set_speed(&self, _speed: f32) -> Result<()> {
        Ok(())
    }

    /// Current device/route state.
    fn state(&self) -> AudioRouteState;

    /// Output latency subtracted from the playback clock.
    fn latency(&self) -> Duration {
        Duration::ZERO
    }
}

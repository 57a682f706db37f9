//! Session lifecycle states.

use bridge_traits::AudioRouteState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`PlaybackSession`](super::PlaybackSession).
///
/// ```text
/// Idle → Preparing → Ready ⇄ Playing ⇄ Paused → Ended
///                      └──────── any live ───────→ Error
///                      └──────── any ────────────→ Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Preparing = 1,
    Ready = 2,
    Playing = 3,
    Paused = 4,
    Ended = 5,
    Error = 6,
    Released = 7,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Preparing => "preparing",
            SessionState::Ready => "ready",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Ended => "ended",
            SessionState::Error => "error",
            SessionState::Released => "released",
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Preparing,
            2 => SessionState::Ready,
            3 => SessionState::Playing,
            4 => SessionState::Paused,
            5 => SessionState::Ended,
            6 => SessionState::Error,
            _ => SessionState::Released,
        }
    }

    /// States that accept `seek`, `play` and `pause`.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Playing | SessionState::Paused | SessionState::Ended
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Released)
    }

    /// Audio route state the session reports for itself.
    pub fn audio_route(&self) -> AudioRouteState {
        match self {
            SessionState::Idle | SessionState::Preparing | SessionState::Ready => {
                AudioRouteState::Ready
            }
            SessionState::Playing => AudioRouteState::Playing,
            SessionState::Paused | SessionState::Ended => AudioRouteState::Paused,
            SessionState::Error | SessionState::Released => AudioRouteState::Dead,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

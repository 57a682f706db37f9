//! Per-session callback interface.
//!
//! Mirrors the host-side player callbacks one to one. The engine delivers
//! every call for a given session from a single dispatcher thread, in the
//! order the events were produced, and never while holding session locks,
//! so listeners may call back into the engine (for example `release` from
//! `on_ended`).

use crate::platform::PlatformSendSync;

/// Receives lifecycle events for one playback session.
///
/// All methods default to no-ops so hosts only implement what they use.
pub trait SessionListener: PlatformSendSync {
    fn on_prepared(&self, _has_audio: bool, _duration_ms: i64) {}

    /// First frame presented on a newly attached surface.
    fn on_surface_ready(&self) {}

    /// First frame of the session. Fires once.
    fn on_first_frame(&self) {}

    /// First frame presented after the most recent seek.
    fn on_first_frame_after_seek(&self) {}

    /// Coalesced playback position.
    fn on_position(&self, _position_ms: i64) {}

    fn on_ended(&self) {}

    fn on_error(&self, _message: &str) {}

    /// Informational audio device/route change (`"ready"`, `"playing"`,
    /// `"paused"`, `"stoppedBySystem"`, `"dead"`).
    fn on_audio_state_changed(&self, _state: &str) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {}

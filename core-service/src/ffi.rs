//! # Foreign Function Interface
//!
//! `uniffi` exports of the command surface and the stateless operations for
//! Kotlin and Swift hosts.
//!
//! Handles cross the boundary as `i64`; `0` and negative values never name
//! a session. Every function returns a sentinel instead of raising. The
//! engine is initialised lazily with the default configuration unless the
//! host called [`initialize_engine`] first.
//!
//! Sessions only hold weak surface references, so this layer keeps the
//! adapted surface of each handle alive until it is replaced, detached or
//! the session is released.

use crate::{EngineConfig, MediaEngine};
use bridge_traits::{BridgeError, PixelBuffer, RenderSurface, SessionListener};
use core_playback::Handle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::warn;

// ============================================================================
// Foreign Callbacks
// ============================================================================

/// Host-side player callbacks.
#[uniffi::export(with_foreign)]
pub trait PlayerListener: Send + Sync {
    fn on_prepared(&self, has_audio: bool, duration_ms: i64);
    fn on_surface_ready(&self);
    fn on_first_frame(&self);
    fn on_first_frame_after_seek(&self);
    fn on_position(&self, position_ms: i64);
    fn on_ended(&self);
    fn on_error(&self, message: String);
    fn on_audio_state_changed(&self, state: String);
}

/// Host render target receiving RGBA frames.
#[uniffi::export(with_foreign)]
pub trait VideoSurface: Send + Sync {
    /// Returns `false` when the frame could not be shown.
    fn present(&self, width: u32, height: u32, rgba: Vec<u8>) -> bool;

    /// Wanted frame width, `0` to derive it or keep the native size.
    fn preferred_width(&self) -> u32;

    /// Wanted frame height, `0` to derive it or keep the native size.
    fn preferred_height(&self) -> u32;
}

struct ListenerAdapter(Arc<dyn PlayerListener>);

impl SessionListener for ListenerAdapter {
    fn on_prepared(&self, has_audio: bool, duration_ms: i64) {
        self.0.on_prepared(has_audio, duration_ms);
    }

    fn on_surface_ready(&self) {
        self.0.on_surface_ready();
    }

    fn on_first_frame(&self) {
        self.0.on_first_frame();
    }

    fn on_first_frame_after_seek(&self) {
        self.0.on_first_frame_after_seek();
    }

    fn on_position(&self, position_ms: i64) {
        self.0.on_position(position_ms);
    }

    fn on_ended(&self) {
        self.0.on_ended();
    }

    fn on_error(&self, message: &str) {
        self.0.on_error(message.to_string());
    }

    fn on_audio_state_changed(&self, state: &str) {
        self.0.on_audio_state_changed(state.to_string());
    }
}

struct SurfaceAdapter(Arc<dyn VideoSurface>);

impl RenderSurface for SurfaceAdapter {
    fn present(&self, frame: &PixelBuffer) -> bridge_traits::error::Result<()> {
        if self
            .0
            .present(frame.width(), frame.height(), frame.as_bytes().to_vec())
        {
            Ok(())
        } else {
            Err(BridgeError::OperationFailed(
                "host surface rejected frame".to_string(),
            ))
        }
    }

    fn preferred_size(&self) -> Option<(u32, u32)> {
        match (self.0.preferred_width(), self.0.preferred_height()) {
            (0, 0) => None,
            size => Some(size),
        }
    }
}

// ============================================================================
// Engine Access
// ============================================================================

fn surfaces() -> &'static Mutex<HashMap<Handle, Arc<dyn RenderSurface>>> {
    static SURFACES: OnceLock<Mutex<HashMap<Handle, Arc<dyn RenderSurface>>>> = OnceLock::new();
    SURFACES.get_or_init(|| Mutex::new(HashMap::new()))
}

fn engine() -> Option<Arc<MediaEngine>> {
    if let Some(engine) = MediaEngine::global() {
        return Some(engine);
    }
    match MediaEngine::initialize(EngineConfig::default()) {
        Ok(engine) => Some(engine),
        Err(e) => {
            warn!(error = %e, "Media engine initialization failed");
            None
        }
    }
}

fn to_handle(handle: i64) -> Handle {
    Handle::try_from(handle).unwrap_or(0)
}

fn log_failure(command: &str, result: crate::Result<()>) {
    if let Err(e) = result {
        warn!(command, error = %e, "Command failed");
    }
}

// ============================================================================
// Exports
// ============================================================================

/// Initialise the engine with default settings and logging. Returns
/// whether an engine is available afterwards.
#[uniffi::export]
pub fn initialize_engine() -> bool {
    let config = EngineConfig {
        logging: Some(core_runtime::logging::LoggingConfig::default()),
        ..EngineConfig::default()
    };
    match MediaEngine::initialize(config) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Media engine initialization failed");
            false
        }
    }
}

#[uniffi::export]
pub fn prepare(path: String, listener: Arc<dyn PlayerListener>) -> i64 {
    let Some(engine) = engine() else {
        listener.on_error("Media engine unavailable".to_string());
        return 0;
    };
    let handle = engine.prepare(Path::new(&path), Arc::new(ListenerAdapter(listener)));
    i64::try_from(handle).unwrap_or(0)
}

/// The surface map stays locked from the liveness check to the insert, and
/// [`release`] clears its entry only after the session is gone, so a
/// released handle never keeps a surface alive.
#[uniffi::export]
pub fn set_surface(handle: i64, surface: Option<Arc<dyn VideoSurface>>) {
    let Some(engine) = engine() else { return };
    let handle = to_handle(handle);

    let mut held = surfaces().lock();
    if engine.state(handle).is_none() {
        return;
    }

    let adapted: Option<Arc<dyn RenderSurface>> =
        surface.map(|s| Arc::new(SurfaceAdapter(s)) as Arc<dyn RenderSurface>);
    log_failure("set_surface", engine.set_surface(handle, adapted.as_ref()));

    match adapted {
        Some(surface) => {
            held.insert(handle, surface);
        }
        None => {
            held.remove(&handle);
        }
    }
}

#[uniffi::export]
pub fn play(handle: i64) {
    if let Some(engine) = engine() {
        log_failure("play", engine.play(to_handle(handle)));
    }
}

#[uniffi::export]
pub fn pause(handle: i64) {
    if let Some(engine) = engine() {
        log_failure("pause", engine.pause(to_handle(handle)));
    }
}

#[uniffi::export]
pub fn seek(handle: i64, position_seconds: f64, exact: bool) {
    if let Some(engine) = engine() {
        log_failure(
            "seek",
            engine.seek(to_handle(handle), position_seconds, exact),
        );
    }
}

#[uniffi::export]
pub fn get_position(handle: i64) -> i64 {
    engine().map_or(0, |e| e.position_ms(to_handle(handle)))
}

#[uniffi::export]
pub fn get_duration(handle: i64) -> i64 {
    engine().map_or(0, |e| e.duration_ms(to_handle(handle)))
}

#[uniffi::export]
pub fn set_speed(handle: i64, speed: f32) {
    if let Some(engine) = engine() {
        log_failure(
            "set_speed",
            engine.set_speed(to_handle(handle), speed).map(|_| ()),
        );
    }
}

#[uniffi::export]
pub fn release(handle: i64) {
    let handle = to_handle(handle);
    if let Some(engine) = engine() {
        engine.release(handle);
    }
    // The worker may still be presenting on a host surface that calls
    // back into this module, so the map is only locked once it has stopped.
    let surface = surfaces().lock().remove(&handle);
    drop(surface);
}

#[uniffi::export]
pub fn extract_thumbnail(path: String, time_ms: i64, width: i32, height: i32) -> Option<Vec<u8>> {
    engine()?.extract_thumbnail(Path::new(&path), time_ms, width.into(), height.into())
}

#[uniffi::export]
pub fn get_video_duration(path: String) -> i64 {
    engine().map_or(-1, |e| e.video_duration(Path::new(&path)))
}

/// Metadata as a flat string map, `None` on failure.
#[uniffi::export]
pub fn get_video_metadata(path: String) -> Option<HashMap<String, String>> {
    let metadata = engine()?.video_metadata(Path::new(&path))?;
    let value = serde_json::to_value(&metadata).ok()?;
    let map = value
        .as_object()?
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                serde_json::Value::Null => return None,
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect();
    Some(map)
}

#[uniffi::export]
pub fn get_video_metadata_json(path: String) -> String {
    match engine() {
        Some(engine) => engine.video_metadata_json(Path::new(&path)),
        None => core_metadata::MetadataResult::Failure {
            message: "Media engine unavailable".to_string(),
        }
        .to_json(),
    }
}

#[uniffi::export]
pub fn get_engine_version() -> String {
    match engine() {
        Some(engine) => engine.version(),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_playback::testing::{ScriptedBackend, ScriptedMedia};

    struct SilentListener;

    impl PlayerListener for SilentListener {
        fn on_prepared(&self, _has_audio: bool, _duration_ms: i64) {}
        fn on_surface_ready(&self) {}
        fn on_first_frame(&self) {}
        fn on_first_frame_after_seek(&self) {}
        fn on_position(&self, _position_ms: i64) {}
        fn on_ended(&self) {}
        fn on_error(&self, _message: String) {}
        fn on_audio_state_changed(&self, _state: String) {}
    }

    struct Screen;

    impl VideoSurface for Screen {
        fn present(&self, _width: u32, _height: u32, _rgba: Vec<u8>) -> bool {
            true
        }

        fn preferred_width(&self) -> u32 {
            32
        }

        fn preferred_height(&self) -> u32 {
            0
        }
    }

    fn scripted_engine() {
        let config = EngineConfig::builder()
            .backend(Arc::new(ScriptedBackend::new(ScriptedMedia::video(
                5_000, 30, 64, 36,
            ))))
            .build()
            .unwrap();
        MediaEngine::initialize(config).unwrap();
    }

    fn is_held(handle: i64) -> bool {
        surfaces().lock().contains_key(&to_handle(handle))
    }

    #[test]
    fn test_released_handle_keeps_no_surface() {
        scripted_engine();
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let handle = prepare(path, Arc::new(SilentListener));
        assert!(handle > 0);

        let screen = Arc::new(Screen);
        set_surface(handle, Some(screen.clone() as Arc<dyn VideoSurface>));
        assert!(is_held(handle));

        release(handle);
        assert!(!is_held(handle));

        set_surface(handle, Some(screen.clone() as Arc<dyn VideoSurface>));
        assert!(!is_held(handle));
        assert_eq!(Arc::strong_count(&screen), 1);
    }

    #[test]
    fn test_detach_drops_held_surface() {
        scripted_engine();
        let file = tempfile::NamedTempFile::new().unwrap();
        let handle = prepare(
            file.path().to_string_lossy().into_owned(),
            Arc::new(SilentListener),
        );

        let screen = Arc::new(Screen);
        set_surface(handle, Some(screen.clone() as Arc<dyn VideoSurface>));
        set_surface(handle, None);
        assert!(!is_held(handle));

        release(handle);
        assert_eq!(Arc::strong_count(&screen), 1);
    }

    #[test]
    fn test_negative_handles_are_ignored() {
        scripted_engine();
        assert_eq!(to_handle(-5), 0);
        assert_eq!(get_position(-5), 0);
        set_surface(-5, Some(Arc::new(Screen)));
        assert!(!is_held(-5));
    }
}

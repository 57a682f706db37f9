//! # Media Engine
//!
//! The host-facing command surface: handle-scoped session commands plus the
//! stateless thumbnail and metadata operations.
//!
//! ## Handles
//!
//! `prepare` returns an opaque non-zero handle; `0` means "no session".
//! Commands on an unknown or released handle are logged and ignored so that
//! teardown races in the host never surface as errors. Position and
//! duration reads on such handles return `0`.
//!
//! ## Sentinels
//!
//! Stateless operations never fail across the boundary: thumbnails return
//! `None`, durations `-1`, metadata `None` or a JSON error envelope.

use crate::config::EngineConfig;
use crate::error::Result;
use bridge_traits::{AudioOutput, RenderSurface, SessionListener};
use core_metadata::{MetadataProber, MetadataResult, ThumbnailService, VideoMetadata};
use core_playback::{
    default_backend, DecodeLimits, Handle, PlaybackSession, Registry, SessionContext,
    SessionState,
};
use core_runtime::events::{CoreEvent, EngineEvent, EventBus, EventStream};
use core_runtime::logging::{init_logging, log_path};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static ENGINE: OnceLock<Arc<MediaEngine>> = OnceLock::new();

/// Owner of every live session and of the stateless pipelines.
pub struct MediaEngine {
    context: SessionContext,
    sessions: Registry<PlaybackSession>,
    prober: MetadataProber,
    thumbnails: ThumbnailService,
    bus: EventBus,
    backend_label: String,
}

impl MediaEngine {
    /// Create a standalone engine. Hosts normally go through
    /// [`initialize`](Self::initialize) instead.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let backend = match config.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };
        let backend_label = format!("{} {}", backend.name(), backend.version());

        let bus = EventBus::new(config.event_buffer_size);
        let limits = DecodeLimits::from(&config.session);
        let context = SessionContext::new(Arc::clone(&backend))
            .with_config(config.session)
            .with_clock(config.clock)
            .with_bus(bus.clone());

        debug!(backend = %backend_label, "Media engine created");

        Ok(Self {
            context,
            sessions: Registry::new(),
            prober: MetadataProber::new(Arc::clone(&backend)),
            thumbnails: ThumbnailService::new(backend).with_limits(limits),
            bus,
            backend_label,
        })
    }

    /// Process-wide initialisation. Idempotent: the first call wins and
    /// later calls return the same engine, ignoring their config.
    ///
    /// Logging is bootstrapped from `config.logging` on the first call. A
    /// subscriber installed elsewhere beforehand is not an error.
    pub fn initialize(config: EngineConfig) -> Result<Arc<MediaEngine>> {
        if let Some(engine) = ENGINE.get() {
            debug!("Media engine already initialized");
            return Ok(Arc::clone(engine));
        }

        if let Some(logging) = config.logging.clone() {
            match init_logging(logging) {
                Ok(()) => {}
                Err(e) if e.is_already_initialized() => {
                    debug!("Logging already initialized by host");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let candidate = Arc::new(Self::new(config)?);
        let engine = ENGINE.get_or_init(|| Arc::clone(&candidate));
        if Arc::ptr_eq(engine, &candidate) {
            let version = engine.version();
            info!(version = %version, "Media engine initialized");
            engine.publish(EngineEvent::Initialized { version });
        }
        Ok(Arc::clone(engine))
    }

    /// The process-wide engine, if [`initialize`](Self::initialize) ran.
    pub fn global() -> Option<Arc<MediaEngine>> {
        ENGINE.get().cloned()
    }

    /// `"<crate version> (<backend> <backend version>)"`.
    pub fn version(&self) -> String {
        format!("{} ({})", env!("CARGO_PKG_VERSION"), self.backend_label)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to every engine and session event.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.bus.subscribe())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn publish(&self, event: EngineEvent) {
        // no subscribers is fine
        let _ = self.bus.emit(CoreEvent::Engine(event));
    }

    // ========================================================================
    // Session Commands
    // ========================================================================

    /// Open `path` as a new session. Returns `0` on failure, after the
    /// listener has received `on_error`.
    pub fn prepare(&self, path: &Path, listener: Arc<dyn SessionListener>) -> Handle {
        match self.try_prepare(path, listener) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Prepare failed");
                0
            }
        }
    }

    /// [`prepare`](Self::prepare) with the failure reason.
    #[instrument(skip(self, path, listener), fields(path = %log_path(path)))]
    pub fn try_prepare(&self, path: &Path, listener: Arc<dyn SessionListener>) -> Result<Handle> {
        let (handle, _) = self
            .sessions
            .insert_with(|handle| PlaybackSession::prepare(handle, path, listener, &self.context))?;
        self.publish(EngineEvent::SessionCreated { handle });
        info!(handle, live = self.sessions.len(), "Session registered");
        Ok(handle)
    }

    fn with_session<R>(
        &self,
        handle: Handle,
        command: &'static str,
        run: impl FnOnce(&PlaybackSession) -> core_playback::Result<R>,
    ) -> Result<Option<R>> {
        match self.sessions.get(handle) {
            Some(session) => Ok(Some(run(&session)?)),
            None => {
                debug!(handle, command, "Ignoring command for unknown handle");
                Ok(None)
            }
        }
    }

    /// Attach (`Some`) or detach (`None`) the render target. The session
    /// keeps only a weak reference; the caller keeps the surface alive.
    pub fn set_surface(
        &self,
        handle: Handle,
        surface: Option<&Arc<dyn RenderSurface>>,
    ) -> Result<()> {
        self.with_session(handle, "set_surface", |s| s.set_surface(surface))?;
        Ok(())
    }

    pub fn set_audio_output(
        &self,
        handle: Handle,
        output: Option<Arc<dyn AudioOutput>>,
    ) -> Result<()> {
        self.with_session(handle, "set_audio_output", |s| s.set_audio_output(output))?;
        Ok(())
    }

    pub fn play(&self, handle: Handle) -> Result<()> {
        self.with_session(handle, "play", |s| s.play())?;
        Ok(())
    }

    pub fn pause(&self, handle: Handle) -> Result<()> {
        self.with_session(handle, "pause", |s| s.pause())?;
        Ok(())
    }

    /// Seek to `position_seconds`. Negative and non-finite positions seek to
    /// the start.
    pub fn seek(&self, handle: Handle, position_seconds: f64, exact: bool) -> Result<()> {
        let position = Duration::try_from_secs_f64(position_seconds).unwrap_or(Duration::ZERO);
        self.with_session(handle, "seek", |s| s.seek(position, exact))?;
        Ok(())
    }

    /// Change the playback rate. Returns the applied (clamped) speed, or
    /// `None` for an unknown handle.
    pub fn set_speed(&self, handle: Handle, speed: f32) -> Result<Option<f32>> {
        self.with_session(handle, "set_speed", |s| s.set_speed(speed))
    }

    /// Last known position in ms; `0` for unknown handles.
    pub fn position_ms(&self, handle: Handle) -> i64 {
        self.sessions
            .get(handle)
            .map(|s| s.position_ms())
            .unwrap_or(0)
    }

    /// Container duration in ms; `0` for unknown handles.
    pub fn duration_ms(&self, handle: Handle) -> i64 {
        self.sessions
            .get(handle)
            .map(|s| s.duration_ms())
            .unwrap_or(0)
    }

    pub fn state(&self, handle: Handle) -> Option<SessionState> {
        self.sessions.get(handle).map(|s| s.state())
    }

    /// Stop the session and free its decoder. Returns once the worker has
    /// exited. Unknown handles are ignored.
    #[instrument(skip(self))]
    pub fn release(&self, handle: Handle) {
        let Some(session) = self.sessions.remove(handle) else {
            debug!("Release of unknown handle ignored");
            return;
        };
        session.release();
        self.publish(EngineEvent::SessionReleased { handle });
    }

    /// Release every live session.
    pub fn shutdown(&self) {
        let drained = self.sessions.drain();
        if drained.is_empty() {
            return;
        }
        info!(sessions = drained.len(), "Releasing all sessions");
        for (handle, session) in drained {
            session.release();
            self.publish(EngineEvent::SessionReleased { handle });
        }
    }

    // ========================================================================
    // Stateless Operations
    // ========================================================================

    /// RGBA bytes of the frame nearest `time_ms`, exactly
    /// `width * height * 4` long, or `None` on any failure.
    ///
    /// One of `width`/`height` may be `0` to derive it from the aspect ratio.
    pub fn extract_thumbnail(
        &self,
        path: &Path,
        time_ms: i64,
        width: i64,
        height: i64,
    ) -> Option<Vec<u8>> {
        match self.thumbnails.extract(path, time_ms, width, height) {
            Ok(buffer) => {
                self.publish(EngineEvent::ThumbnailExtracted {
                    time_ms,
                    width: buffer.width(),
                    height: buffer.height(),
                });
                Some(buffer.into_bytes())
            }
            Err(e) => {
                warn!(path = %log_path(path), time_ms, error = %e, "Thumbnail extraction failed");
                self.publish(EngineEvent::ThumbnailFailed {
                    time_ms,
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Container duration in ms, `-1` when unknown or unreadable.
    pub fn video_duration(&self, path: &Path) -> i64 {
        self.prober.duration_ms(path)
    }

    fn probe(&self, path: &Path) -> MetadataResult {
        let result = self.prober.probe(path);
        self.publish(EngineEvent::ProbeCompleted {
            success: result.is_success(),
        });
        result
    }

    pub fn video_metadata(&self, path: &Path) -> Option<VideoMetadata> {
        self.probe(path).into_metadata()
    }

    /// Versioned success/error envelope. Always valid JSON.
    pub fn video_metadata_json(&self, path: &Path) -> String {
        self.probe(path).to_json()
    }
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MediaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngine")
            .field("backend", &self.backend_label)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::NoopListener;
    use core_playback::testing::{ScriptedBackend, ScriptedMedia};

    fn engine(media: ScriptedMedia) -> MediaEngine {
        let config = EngineConfig::builder()
            .backend(Arc::new(ScriptedBackend::new(media)))
            .build()
            .unwrap();
        MediaEngine::new(config).unwrap()
    }

    #[test]
    fn test_version_names_backend() {
        let engine = engine(ScriptedMedia::video(1_000, 30, 64, 36));
        let version = engine.version();
        assert!(version.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(version.ends_with("(scripted 1.0)"));
    }

    #[test]
    fn test_zero_handle_reads_are_zero() {
        let engine = engine(ScriptedMedia::video(1_000, 30, 64, 36));
        assert_eq!(engine.position_ms(0), 0);
        assert_eq!(engine.duration_ms(0), 0);
        assert_eq!(engine.state(0), None);
    }

    #[test]
    fn test_seek_with_negative_or_nan_position() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let engine = engine(ScriptedMedia::video(2_000, 30, 64, 36));
        let handle = engine.prepare(file.path(), Arc::new(NoopListener));
        assert_ne!(handle, 0);

        engine.seek(handle, -3.0, true).unwrap();
        assert_eq!(engine.position_ms(handle), 0);
        engine.seek(handle, f64::NAN, false).unwrap();
        assert_eq!(engine.position_ms(handle), 0);
        engine.seek(handle, 1.5, true).unwrap();
        assert_eq!(engine.position_ms(handle), 1_500);

        engine.release(handle);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = ScriptedBackend::new(ScriptedMedia::video(2_000, 30, 64, 36));
        let config = EngineConfig::builder()
            .backend(Arc::new(backend.clone()))
            .build()
            .unwrap();
        let engine = MediaEngine::new(config).unwrap();

        for _ in 0..3 {
            assert_ne!(engine.prepare(file.path(), Arc::new(NoopListener)), 0);
        }
        assert_eq!(engine.session_count(), 3);

        engine.shutdown();
        assert_eq!(engine.session_count(), 0);
        assert_eq!(backend.live_sources(), 0);
    }
}

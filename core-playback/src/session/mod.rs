//! # Playback Session
//!
//! A stateful, handle-identified playback instance.
//!
//! ## Overview
//!
//! Each session owns exactly one [`DecodeCore`], a [`PlaybackClock`], a weak
//! reference to the host render surface and the host's [`SessionListener`].
//! Three threads cooperate:
//!
//! - **Callers** issue commands from any thread. Commands take the session
//!   lock briefly, mutate [`Control`] and wake the worker.
//! - **Decode worker** owns the decode core. It handles seeks, paces frames
//!   against the clock, presents video and writes audio.
//! - **Dispatcher** drains the ordered event queue into the listener.
//!
//! `position_ms` and `state` are mirrored into atomics so reads never wait
//! on the worker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let session = PlaybackSession::prepare(handle, path, listener, &context)?;
//! session.set_surface(Some(&surface))?;
//! session.play()?;
//! session.seek(Duration::from_secs(9), true)?;
//! session.release();
//! ```

mod dispatch;
mod state;
mod worker;

pub use state::SessionState;

use crate::clock::PlaybackClock;
use crate::config::SessionConfig;
use crate::decoder::{DecodeCore, DecodeLimits};
use crate::error::{PlaybackError, Result};
use crate::traits::{MediaBackend, OpenOptions};
use bridge_traits::time::{Clock, SystemClock};
use bridge_traits::{AudioOutput, RenderSurface, SessionListener};
use core_runtime::events::{CoreEvent, EventBus, SessionEvent};
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Context
// ============================================================================

/// Everything a session borrows from the engine that creates it.
#[derive(Clone)]
pub struct SessionContext {
    pub backend: Arc<dyn MediaBackend>,
    pub config: SessionConfig,
    pub clock: Arc<dyn Clock>,
    /// Engine-wide bus that mirrors session events.
    pub bus: Option<EventBus>,
}

impl SessionContext {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            bus: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub(crate) struct SeekRequest {
    pub target: Duration,
    pub exact: bool,
    pub serial: u64,
    /// Host time the request arrived; the debounce window starts here.
    pub requested_at: Duration,
}

/// Mutable session state guarded by the session lock.
pub(crate) struct Control {
    pub state: SessionState,
    pub speed: f32,
    pub clock: PlaybackClock,
    surface: Option<Weak<dyn RenderSurface>>,
    /// Bumped on every attach so the worker can tell surfaces apart.
    pub surface_serial: u64,
    pub audio: Option<Arc<dyn AudioOutput>>,
    /// Latest unserviced seek. A newer request replaces it.
    pub seek: Option<SeekRequest>,
    /// Serial of the most recent seek request.
    pub seek_serial: u64,
}

impl Control {
    /// Attached surface, if the host still holds it.
    pub fn surface(&self) -> Option<Arc<dyn RenderSurface>> {
        self.surface.as_ref().and_then(Weak::upgrade)
    }
}

pub(crate) struct Shared {
    pub handle: u64,
    pub config: SessionConfig,
    pub duration_ms: i64,
    pub has_audio: bool,
    pub control: Mutex<Control>,
    pub wake: Condvar,
    position_ms: AtomicI64,
    state: AtomicU8,
    events: Mutex<Option<UnboundedSender<SessionEvent>>>,
}

impl Shared {
    pub fn emit(&self, event: SessionEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            let _ = sender.send(event);
        }
    }

    pub fn set_state(&self, control: &mut Control, state: SessionState) {
        if control.state != state {
            debug!(handle = self.handle, from = %control.state, to = %state, "Session state changed");
        }
        control.state = state;
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store_position(&self, position: Duration) {
        let mut ms = position.as_millis().min(i64::MAX as u128) as i64;
        if self.duration_ms >= 0 {
            ms = ms.min(self.duration_ms);
        }
        self.position_ms.store(ms, Ordering::Release);
    }

    pub fn position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Acquire)
    }

    fn close_events(&self) {
        self.events.lock().take();
    }
}

// ============================================================================
// PlaybackSession
// ============================================================================

/// One playback instance. Dropping the session releases it.
pub struct PlaybackSession {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    /// Open `path` and start the session's worker and dispatcher.
    ///
    /// Emits `onPrepared` on success. On failure the listener receives
    /// `onError` synchronously and no session exists.
    #[instrument(skip(path, listener, context), fields(path = %core_runtime::logging::log_path(path)))]
    pub fn prepare(
        handle: u64,
        path: &Path,
        listener: Arc<dyn SessionListener>,
        context: &SessionContext,
    ) -> Result<Self> {
        debug!(handle, "Preparing session");
        let core = match DecodeCore::open(
            context.backend.as_ref(),
            path,
            OpenOptions::default(),
            DecodeLimits::from(&context.config),
        ) {
            Ok(core) => core,
            Err(e) => {
                warn!(handle, error = %e, "Prepare failed");
                let message = e.to_string();
                listener.on_error(&message);
                if let Some(bus) = &context.bus {
                    let _ = bus.emit(CoreEvent::session(handle, SessionEvent::Error { message }));
                }
                return Err(e);
            }
        };

        let streams = core.streams().clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = dispatch::spawn(handle, listener, context.bus.clone(), receiver)?;

        let clock = PlaybackClock::new(Arc::clone(&context.clock));

        let shared = Arc::new(Shared {
            handle,
            config: context.config.clone(),
            duration_ms: streams.duration_ms(),
            has_audio: streams.has_audio(),
            control: Mutex::new(Control {
                state: SessionState::Preparing,
                speed: 1.0,
                clock,
                surface: None,
                surface_serial: 0,
                audio: None,
                seek: None,
                seek_serial: 0,
            }),
            wake: Condvar::new(),
            position_ms: AtomicI64::new(0),
            state: AtomicU8::new(SessionState::Preparing as u8),
            events: Mutex::new(Some(sender)),
        });

        shared.emit(SessionEvent::Prepared {
            has_audio: streams.has_audio(),
            duration_ms: streams.duration_ms(),
        });
        {
            let mut control = shared.control.lock();
            shared.set_state(&mut control, SessionState::Ready);
        }

        let cancel = CancellationToken::new();
        let worker = worker::Worker::new(Arc::clone(&shared), core, cancel.clone());
        let spawned = thread::Builder::new()
            .name(format!("media-decode-{:x}", handle))
            .spawn(move || worker.run());

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                error!(handle, error = %e, "Failed to spawn decode worker");
                shared.close_events();
                let _ = dispatcher.join();
                return Err(PlaybackError::Io(e));
            }
        };

        info!(
            handle,
            has_video = streams.has_video(),
            has_audio = streams.has_audio(),
            duration_ms = streams.duration_ms(),
            "Session prepared"
        );

        Ok(Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn handle(&self) -> u64 {
        self.shared.handle
    }

    /// Lock-free snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn has_audio(&self) -> bool {
        self.shared.has_audio
    }

    /// Best last-known position. Never blocks on the worker.
    pub fn position_ms(&self) -> i64 {
        self.shared.position_ms()
    }

    /// Container duration, `-1` when unknown.
    pub fn duration_ms(&self) -> i64 {
        self.shared.duration_ms
    }

    /// Current clamped speed.
    pub fn speed(&self) -> f32 {
        self.shared.control.lock().speed
    }

    fn lock_live(&self) -> Result<parking_lot::MutexGuard<'_, Control>> {
        let control = self.shared.control.lock();
        if control.state == SessionState::Released {
            return Err(PlaybackError::Released);
        }
        Ok(control)
    }

    /// Attach or detach the render target.
    ///
    /// Only a weak reference is kept; the host owns the surface.
    pub fn set_surface(&self, surface: Option<&Arc<dyn RenderSurface>>) -> Result<()> {
        let mut control = self.lock_live()?;
        match surface {
            Some(surface) => {
                control.surface = Some(Arc::downgrade(surface));
                control.surface_serial += 1;
                debug!(handle = self.handle(), serial = control.surface_serial, "Surface attached");
            }
            None => {
                control.surface = None;
                debug!(handle = self.handle(), "Surface detached");
            }
        }
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Attach or detach the host audio output.
    ///
    /// The output is configured after the session lock is released, so it
    /// may call back into the session.
    pub fn set_audio_output(&self, output: Option<Arc<dyn AudioOutput>>) -> Result<()> {
        let latency = match &output {
            Some(out) => self.shared.config.audio_latency + out.latency(),
            None => Duration::ZERO,
        };

        let (playing, speed) = {
            let mut control = self.lock_live()?;
            control.clock.set_latency(latency);
            control.audio = output.clone();
            self.shared.wake.notify_all();
            (control.state == SessionState::Playing, control.speed)
        };

        if let Some(out) = output {
            if playing {
                if let Err(e) = out.start() {
                    warn!(handle = self.handle(), error = %e, "Audio output failed to start");
                }
            }
            if let Err(e) = out.set_speed(speed) {
                warn!(handle = self.handle(), error = %e, "Audio output rejected speed");
            }
        }
        Ok(())
    }

    /// Start or resume playback. No-op when already playing.
    #[instrument(skip(self), fields(handle = self.handle()))]
    pub fn play(&self) -> Result<()> {
        let mut control = self.lock_live()?;
        match control.state {
            SessionState::Playing => return Ok(()),
            SessionState::Ready | SessionState::Paused => {}
            other => {
                return Err(PlaybackError::InvalidState(format!("cannot play while {}", other)));
            }
        }

        control.clock.resume();
        self.shared.set_state(&mut control, SessionState::Playing);
        self.shared.wake.notify_all();
        let output = control.audio.clone();
        drop(control);

        if let Some(out) = output {
            if let Err(e) = out.start() {
                warn!(error = %e, "Audio output failed to start");
            }
        }
        info!("Playback started");
        Ok(())
    }

    /// Pause playback, keeping the last presented frame. No-op unless
    /// playing.
    #[instrument(skip(self), fields(handle = self.handle()))]
    pub fn pause(&self) -> Result<()> {
        let mut control = self.lock_live()?;
        match control.state {
            SessionState::Playing => {}
            SessionState::Error => {
                return Err(PlaybackError::InvalidState("cannot pause while error".to_string()));
            }
            _ => return Ok(()),
        }

        control.clock.pause();
        self.shared.store_position(control.clock.get());
        self.shared.set_state(&mut control, SessionState::Paused);
        self.shared.wake.notify_all();
        let output = control.audio.clone();
        drop(control);

        if let Some(out) = output {
            if let Err(e) = out.pause() {
                warn!(error = %e, "Audio output failed to pause");
            }
        }
        info!(position_ms = self.position_ms(), "Playback paused");
        Ok(())
    }

    /// Request a jump to `position`. A newer request supersedes this one
    /// until the worker starts servicing it.
    ///
    /// Seeking an ended session pauses it at `position` right away, so
    /// `play` may follow immediately.
    #[instrument(skip(self), fields(handle = self.handle()))]
    pub fn seek(&self, position: Duration, exact: bool) -> Result<()> {
        let mut control = self.lock_live()?;
        if !control.state.is_live() {
            return Err(PlaybackError::InvalidState(format!(
                "cannot seek while {}",
                control.state
            )));
        }

        control.seek_serial += 1;
        let request = SeekRequest {
            target: position,
            exact,
            serial: control.seek_serial,
            requested_at: control.clock.host_now(),
        };
        if let Some(previous) = control.seek.replace(request) {
            debug!(superseded = previous.serial, "Seek superseded");
        }
        if control.state == SessionState::Ended {
            control.clock.set(position);
            self.shared.set_state(&mut control, SessionState::Paused);
        }
        self.shared.store_position(position);
        self.shared.wake.notify_all();
        debug!(serial = request.serial, "Seek requested");
        Ok(())
    }

    /// Change the playback rate. Returns the applied, clamped speed.
    ///
    /// # Errors
    ///
    /// `InvalidSpeed` for zero, negative or non-finite values; nothing is
    /// changed in that case.
    pub fn set_speed(&self, speed: f32) -> Result<f32> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlaybackError::InvalidSpeed(speed));
        }

        let mut control = self.lock_live()?;
        let applied = self.shared.config.clamp_speed(speed);
        if applied != speed {
            debug!(requested = speed, applied, "Speed clamped");
        }

        control.clock.set_speed(applied);
        control.speed = applied;
        self.shared.wake.notify_all();
        let output = control.audio.clone();
        drop(control);

        if let Some(out) = output {
            if let Err(e) = out.set_speed(applied) {
                warn!(error = %e, "Audio output rejected speed change");
            }
        }
        Ok(applied)
    }

    /// Stop the worker, free the decoder and drop the surface reference.
    ///
    /// Returns once the worker thread has exited. Safe to call repeatedly.
    pub fn release(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.state == SessionState::Released {
                return;
            }
            self.shared.set_state(&mut control, SessionState::Released);
            control.seek = None;
            control.surface = None;
        }
        self.cancel.cancel();
        self.shared.wake.notify_all();

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!(handle = self.handle(), "Decode worker panicked");
            }
        }

        let output = self.shared.control.lock().audio.take();
        drop(output);

        self.shared.close_events();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            // A listener releasing its own session must not join itself.
            if dispatcher.thread().id() != thread::current().id() {
                let _ = dispatcher.join();
            }
        }
        info!(handle = self.handle(), "Session released");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("handle", &self.handle())
            .field("state", &self.state())
            .field("position_ms", &self.position_ms())
            .finish()
    }
}

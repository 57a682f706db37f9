//! Decode worker.
//!
//! Owns the session's [`DecodeCore`] on a dedicated thread. Every
//! iteration of the loop takes the session lock once, decides what to do
//! next and releases the lock before any decode, conversion or host call:
//!
//! 1. Service the latest seek request once its debounce window is quiet.
//! 2. While playing, decode one frame ahead and hold it until the clock
//!    reaches its presentation time.
//! 3. Otherwise preroll the first frame and keep a newly attached surface
//!    populated with the last picture.
//!
//! The worker parks on the session condvar between iterations, so commands
//! cut any wait short.

use super::{Control, SeekRequest, SessionState, Shared};
use crate::converter;
use crate::decoder::DecodeCore;
use crate::error::PlaybackError;
use crate::traits::{AudioFrame, Frame, StreamKind, VideoFrame};
use bridge_traits::{AudioChunk, AudioOutput, AudioRouteState};
use core_runtime::events::SessionEvent;
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Park time when there is nothing to do.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Longest single wait for a frame's presentation time. Speed changes are
/// picked up at this granularity even without a wake-up.
const MAX_WAIT: Duration = Duration::from_millis(50);

/// Audio is written this far ahead of the clock to keep the output fed.
const AUDIO_LEAD: Duration = Duration::from_millis(200);

pub(crate) struct Worker {
    shared: Arc<Shared>,
    core: DecodeCore,
    cancel: CancellationToken,
    primary: StreamKind,

    /// At most one decoded frame waiting for its presentation time.
    pending: Option<Frame>,
    /// Last video frame handed to the presentation path, re-used for a
    /// newly attached surface.
    last_video: Option<VideoFrame>,
    /// Surface serial of the last successful present.
    presented_on: Option<u64>,
    /// Surface serial of the last present attempt.
    offered_on: Option<u64>,
    first_frame_sent: bool,
    /// Seek whose first frame has not been presented yet.
    after_seek: Option<u64>,
    prerolled: bool,

    consecutive_errors: usize,
    last_position_at: Option<Duration>,
    stalled: bool,

    audio_reported: Option<AudioRouteState>,
    /// Output identity and format the host output was configured for.
    audio_format: Option<(usize, u32, u16)>,
}

impl Worker {
    pub fn new(shared: Arc<Shared>, core: DecodeCore, cancel: CancellationToken) -> Self {
        let primary = core.primary();
        Self {
            shared,
            core,
            cancel,
            primary,
            pending: None,
            last_video: None,
            presented_on: None,
            offered_on: None,
            first_frame_sent: false,
            after_seek: None,
            prerolled: false,
            consecutive_errors: 0,
            last_position_at: None,
            stalled: false,
            audio_reported: None,
            audio_format: None,
        }
    }

    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.shared.state() == SessionState::Released
    }

    pub fn run(mut self) {
        let handle = self.shared.handle;
        debug!(handle, primary = ?self.primary, "Decode worker started");

        while !self.stopped() {
            self.step();
        }

        self.pending = None;
        self.core.close();
        debug!(handle, "Decode worker stopped");
    }

    fn step(&mut self) {
        let shared = Arc::clone(&self.shared);
        if shared.has_audio {
            let (output, route) = {
                let control = shared.control.lock();
                (control.audio.clone(), control.state.audio_route())
            };
            self.poll_audio_state(output, route);
        }

        let mut control = shared.control.lock();
        if control.state == SessionState::Released {
            return;
        }

        if let Some(request) = control.seek {
            let quiet = control.clock.host_now().saturating_sub(request.requested_at);
            let debounce = shared.config.seek_debounce;
            if quiet < debounce {
                shared.wake.wait_for(&mut control, debounce - quiet);
                return;
            }

            control.seek = None;
            let output = control.audio.clone();
            drop(control);
            if let Some(output) = output {
                if let Err(e) = output.flush() {
                    warn!(handle = shared.handle, error = %e, "Audio output failed to flush");
                }
            }
            self.service_seek(request);
            return;
        }

        match control.state {
            SessionState::Playing => self.play_step(control),
            SessionState::Ready | SessionState::Paused | SessionState::Ended => {
                self.idle_step(control)
            }
            _ => {
                shared.wake.wait_for(&mut control, IDLE_POLL);
            }
        }
    }

    // ========================================================================
    // Seeking
    // ========================================================================

    fn service_seek(&mut self, request: SeekRequest) {
        let handle = self.shared.handle;
        debug!(handle, serial = request.serial, target = ?request.target, exact = request.exact, "Servicing seek");

        self.pending = None;
        self.consecutive_errors = 0;
        let result = self.core.decode_at(request.target, request.exact);

        let shared = Arc::clone(&self.shared);
        let mut control = shared.control.lock();
        if control.state == SessionState::Released {
            return;
        }
        if control.seek_serial != request.serial {
            debug!(handle, serial = request.serial, "Discarding superseded seek result");
            return;
        }

        match result {
            Ok(Some(frame)) => {
                let pts = frame.pts();
                control.clock.set(pts);
                shared.store_position(pts);
                if control.state == SessionState::Ended {
                    shared.set_state(&mut control, SessionState::Paused);
                }
                debug!(handle, pts = ?pts, "Seek landed");

                self.after_seek = Some(request.serial);
                self.prerolled = true;
                self.stalled = false;
                self.last_position_at = None;
                if self.primary == StreamKind::Audio {
                    self.mark_first_frame(&control, pts);
                }
                self.pending = Some(frame);
            }
            Ok(None) => {
                debug!(handle, target = ?request.target, "Seek target is past the end");
                self.finish(control);
            }
            Err(e) => self.fault(control, e),
        }
    }

    // ========================================================================
    // Playing
    // ========================================================================

    fn play_step(&mut self, mut control: MutexGuard<'_, Control>) {
        let Some(frame) = self.pending.as_ref() else {
            drop(control);
            self.decode_ahead();
            return;
        };

        let due = match frame {
            Frame::Video(v) => v.pts,
            Frame::Audio(a) => a.pts.saturating_sub(AUDIO_LEAD),
        };
        match control.clock.delay_until(due) {
            Some(delay) if delay.is_zero() => {}
            Some(delay) => {
                self.update_position(&control);
                self.shared.wake.wait_for(&mut control, delay.min(MAX_WAIT));
                return;
            }
            None => {
                self.shared.wake.wait_for(&mut control, MAX_WAIT);
                return;
            }
        }

        let lateness = control.clock.get().saturating_sub(due);
        self.watch_stall(lateness);
        self.update_position(&control);
        let output = control.audio.clone();
        drop(control);

        if let Some(frame) = self.pending.take() {
            self.deliver(frame, output);
        }
    }

    /// Decode one frame into the pending slot.
    fn decode_ahead(&mut self) {
        let handle = self.shared.handle;
        match self.core.decode_next() {
            Ok(Some(frame)) => {
                self.consecutive_errors = 0;
                if self.primary == StreamKind::Audio && !self.first_frame_sent {
                    let shared = Arc::clone(&self.shared);
                    let control = shared.control.lock();
                    self.mark_first_frame(&control, frame.pts());
                }
                self.pending = Some(frame);
            }
            Ok(None) => {
                let shared = Arc::clone(&self.shared);
                let control = shared.control.lock();
                if control.state == SessionState::Playing && control.seek.is_none() {
                    self.finish(control);
                }
            }
            Err(PlaybackError::Released) => {}
            Err(e) => {
                self.consecutive_errors += 1;
                if self.consecutive_errors < self.shared.config.max_consecutive_errors {
                    debug!(handle, error = %e, errors = self.consecutive_errors, "Skipping undecodable frame");
                    return;
                }

                error!(handle, errors = self.consecutive_errors, "Too many consecutive decode errors");
                let shared = Arc::clone(&self.shared);
                let control = shared.control.lock();
                if control.state.is_live() {
                    self.fault(control, e);
                }
            }
        }
    }

    fn deliver(&mut self, frame: Frame, output: Option<Arc<dyn AudioOutput>>) {
        match frame {
            Frame::Video(video) => {
                if !self.present(&video) {
                    trace!(handle = self.shared.handle, pts = ?video.pts, "Video frame dropped");
                }
                self.last_video = Some(video);
            }
            Frame::Audio(audio) => {
                if let Some(output) = output {
                    self.write_audio(audio, output.as_ref(), Arc::as_ptr(&output) as *const () as usize);
                }
            }
        }
    }

    fn write_audio(&mut self, frame: AudioFrame, output: &dyn AudioOutput, identity: usize) {
        let format = (identity, frame.sample_rate, frame.channels);
        if self.audio_format != Some(format) {
            if let Err(e) = output.configure(frame.sample_rate, frame.channels) {
                warn!(handle = self.shared.handle, error = %e, "Audio output rejected format");
                return;
            }
            self.audio_format = Some(format);
        }

        let chunk = AudioChunk {
            samples: frame.samples,
            channels: frame.channels,
            sample_rate: frame.sample_rate,
            pts: frame.pts,
        };
        if let Err(e) = output.write(&chunk) {
            warn!(handle = self.shared.handle, error = %e, "Audio output rejected chunk");
        }
    }

    fn update_position(&mut self, control: &Control) {
        self.shared.store_position(control.clock.get());

        let now = control.clock.host_now();
        let due = match self.last_position_at {
            Some(at) => now.saturating_sub(at) >= self.shared.config.position_interval,
            None => true,
        };
        if due {
            self.last_position_at = Some(now);
            self.shared.emit(SessionEvent::Position {
                position_ms: self.shared.position_ms(),
            });
        }
    }

    fn watch_stall(&mut self, lateness: Duration) {
        if lateness >= self.shared.config.stall_timeout {
            if !self.stalled {
                warn!(
                    handle = self.shared.handle,
                    lateness_ms = lateness.as_millis() as u64,
                    "Playback stalled behind the clock"
                );
                self.stalled = true;
            }
        } else if self.stalled {
            debug!(handle = self.shared.handle, "Playback caught up");
            self.stalled = false;
        }
    }

    // ========================================================================
    // Ready / Paused / Ended
    // ========================================================================

    fn idle_step(&mut self, mut control: MutexGuard<'_, Control>) {
        if !self.prerolled && self.pending.is_none() {
            self.prerolled = true;
            drop(control);
            self.decode_ahead();
            return;
        }

        if control.surface().is_some() {
            if matches!(self.pending, Some(Frame::Video(_))) {
                drop(control);
                if let Some(Frame::Video(video)) = self.pending.take() {
                    self.present(&video);
                    self.last_video = Some(video);
                }
                return;
            }

            if self.last_video.is_some() && self.offered_on != Some(control.surface_serial) {
                drop(control);
                if let Some(video) = self.last_video.clone() {
                    self.present(&video);
                }
                return;
            }
        }

        self.shared.wake.wait_for(&mut control, IDLE_POLL);
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    /// Convert `frame` and hand it to the attached surface.
    ///
    /// Returns `false` when there is no surface or it rejected the frame.
    fn present(&mut self, frame: &VideoFrame) -> bool {
        let handle = self.shared.handle;
        let (surface, serial) = {
            let control = self.shared.control.lock();
            match control.surface() {
                Some(surface) => (surface, control.surface_serial),
                None => return false,
            }
        };
        self.offered_on = Some(serial);

        let converted = match surface.preferred_size() {
            Some((width, height)) => converter::convert(frame, width as i64, height as i64),
            None => converter::convert_native(frame),
        };
        let buffer = match converted {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(handle, error = %e, "Frame conversion failed");
                return false;
            }
        };
        if let Err(e) = surface.present(&buffer) {
            warn!(handle, error = %e, "Surface rejected frame");
            return false;
        }
        drop(surface);

        let shared = Arc::clone(&self.shared);
        let control = shared.control.lock();
        if control.state == SessionState::Released {
            return true;
        }
        if self.presented_on != Some(serial) {
            self.presented_on = Some(serial);
            shared.emit(SessionEvent::SurfaceReady);
        }
        self.mark_first_frame(&control, frame.pts);
        true
    }

    /// Emit `FirstFrameAfterSeek` for the latest seek, or `FirstFrame` once
    /// per session.
    fn mark_first_frame(&mut self, control: &Control, pts: Duration) {
        match self.after_seek.take() {
            Some(serial) if serial == control.seek_serial && control.seek.is_none() => {
                self.first_frame_sent = true;
                self.shared.emit(SessionEvent::FirstFrameAfterSeek {
                    position_ms: pts.as_millis().min(i64::MAX as u128) as i64,
                });
            }
            Some(_) => {}
            None if !self.first_frame_sent => {
                self.first_frame_sent = true;
                self.shared.emit(SessionEvent::FirstFrame);
            }
            None => {}
        }
    }

    // ========================================================================
    // Terminal transitions
    // ========================================================================

    /// Host outputs are paused after the session lock is released.
    fn finish(&mut self, mut control: MutexGuard<'_, Control>) {
        let end = if self.shared.duration_ms >= 0 {
            Duration::from_millis(self.shared.duration_ms as u64)
        } else {
            control.clock.get()
        };
        control.clock.pause();
        control.clock.set(end);
        self.shared.store_position(end);
        self.shared.set_state(&mut control, SessionState::Ended);
        pause_output(control);

        self.shared.emit(SessionEvent::Position {
            position_ms: self.shared.position_ms(),
        });
        self.shared.emit(SessionEvent::Ended);
        info!(handle = self.shared.handle, position_ms = self.shared.position_ms(), "Playback ended");
    }

    fn fault(&mut self, mut control: MutexGuard<'_, Control>, e: PlaybackError) {
        error!(handle = self.shared.handle, error = %e, "Playback failed");
        self.pending = None;

        control.clock.pause();
        self.shared.store_position(control.clock.get());
        self.shared.set_state(&mut control, SessionState::Error);
        pause_output(control);

        self.shared.emit(SessionEvent::Error {
            message: e.to_string(),
        });
    }

    /// `fallback` is reported while no host output is attached.
    fn poll_audio_state(&mut self, output: Option<Arc<dyn AudioOutput>>, fallback: AudioRouteState) {
        let route = match output {
            Some(output) => output.state(),
            None => fallback,
        };
        if self.audio_reported != Some(route) {
            debug!(handle = self.shared.handle, state = %route, "Audio state changed");
            self.audio_reported = Some(route);
            self.shared.emit(SessionEvent::AudioStateChanged {
                state: route.as_str().to_string(),
            });
        }
    }
}

fn pause_output(control: MutexGuard<'_, Control>) {
    let output = control.audio.clone();
    drop(control);
    if let Some(output) = output {
        if let Err(e) = output.pause() {
            warn!(error = %e, "Audio output failed to pause");
        }
    }
}

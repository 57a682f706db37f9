//! # Scripted Media Backend
//!
//! Deterministic [`MediaBackend`] for tests. Fabricates a timeline of video
//! and audio frames from a [`ScriptedMedia`] description instead of
//! decoding real files.
//!
//! Video frames are `Gray8`. The first four bytes of the plane hold the
//! frame index (little-endian `u32`) so tests can tell exactly which frame
//! a seek landed on; every other pixel is `16 + index % 200`.
//!
//! [`RecordingListener`], [`RecordingSurface`] and [`RecordingOutput`]
//! stand in for the host side of a session.
//!
//! ```ignore
//! use core_playback::testing::{ScriptedBackend, ScriptedMedia};
//!
//! let backend = ScriptedBackend::new(ScriptedMedia::video(10_000, 30, 640, 360).with_audio());
//! ```

use crate::error::{PlaybackError, Result};
use crate::traits::{
    AudioFrame, ContainerInfo, Frame, FrameRate, MediaBackend, MediaSource, PixelFormat, Plane,
    StreamInfo, StreamKind, VideoFrame,
};
use bridge_traits::{
    AudioChunk, AudioOutput, AudioRouteState, PixelBuffer, RenderSurface, SessionListener,
};
use core_runtime::events::SessionEvent;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Audio chunk length of scripted sources.
pub const AUDIO_CHUNK: Duration = Duration::from_millis(20);
const AUDIO_RATE: u32 = 48_000;
const AUDIO_CHANNELS: u16 = 2;

/// Description of a fabricated media file.
#[derive(Debug, Clone)]
pub struct ScriptedMedia {
    pub duration_ms: u64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// Frames per GOP; every `gop`-th frame is a keyframe.
    pub gop: usize,
    pub has_video: bool,
    pub has_audio: bool,
    pub subtitles: usize,
    pub rotation: i32,
    pub bitrate: Option<u64>,
    /// Video frame indices whose decode fails.
    pub corrupt: Vec<Range<usize>>,
    /// Open fails with `UnsupportedFormat`.
    pub unsupported: bool,
    /// Sleep before every decoded frame.
    pub decode_delay: Duration,
}

impl ScriptedMedia {
    /// Video-only source.
    pub fn video(duration_ms: u64, fps: u32, width: u32, height: u32) -> Self {
        Self {
            duration_ms,
            fps,
            width,
            height,
            gop: 30,
            has_video: true,
            has_audio: false,
            subtitles: 0,
            rotation: 0,
            bitrate: Some(1_200_000),
            corrupt: Vec::new(),
            unsupported: false,
            decode_delay: Duration::ZERO,
        }
    }

    /// Audio-only source.
    pub fn audio_only(duration_ms: u64) -> Self {
        Self {
            has_video: false,
            has_audio: true,
            bitrate: Some(128_000),
            ..Self::video(duration_ms, 0, 0, 0)
        }
    }

    /// Container no demuxer accepts.
    pub fn unsupported() -> Self {
        Self {
            unsupported: true,
            ..Self::video(0, 0, 0, 0)
        }
    }

    pub fn with_audio(mut self) -> Self {
        self.has_audio = true;
        self
    }

    pub fn with_gop(mut self, gop: usize) -> Self {
        self.gop = gop.max(1);
        self
    }

    pub fn with_subtitles(mut self, count: usize) -> Self {
        self.subtitles = count;
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    pub fn without_bitrate(mut self) -> Self {
        self.bitrate = None;
        self
    }

    pub fn with_corrupt(mut self, frames: Range<usize>) -> Self {
        self.corrupt.push(frames);
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    pub fn video_frame_count(&self) -> usize {
        if !self.has_video {
            return 0;
        }
        (self.duration_ms * self.fps as u64 / 1000) as usize
    }

    pub fn audio_chunk_count(&self) -> usize {
        if !self.has_audio {
            return 0;
        }
        (self.duration_ms / AUDIO_CHUNK.as_millis() as u64) as usize
    }

    /// Presentation time of video frame `index`.
    pub fn video_pts(&self, index: usize) -> Duration {
        if self.fps == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(index as u64 * 1_000_000_000 / self.fps as u64)
    }

    /// Frame index encoded in a scripted video frame.
    pub fn frame_index(frame: &Frame) -> Option<usize> {
        match frame {
            Frame::Video(v) => Self::video_frame_index(v),
            Frame::Audio(_) => None,
        }
    }

    pub fn video_frame_index(frame: &VideoFrame) -> Option<usize> {
        let bytes = frame.planes.first()?.data.get(0..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
    }

    /// Gray level of every pixel but the index header.
    pub fn fill_value(index: usize) -> u8 {
        16 + (index % 200) as u8
    }

    fn container_info(&self) -> ContainerInfo {
        let mut streams = Vec::new();
        if self.has_video {
            streams.push(
                StreamInfo::new(streams.len(), StreamKind::Video)
                    .with_codec("h264")
                    .with_dimensions(self.width, self.height)
                    .with_frame_rate(FrameRate::new(self.fps, 1))
                    .with_rotation(self.rotation),
            );
        }
        if self.has_audio {
            streams.push(
                StreamInfo::new(streams.len(), StreamKind::Audio)
                    .with_codec("aac")
                    .with_audio_format(AUDIO_RATE, AUDIO_CHANNELS),
            );
        }
        for _ in 0..self.subtitles {
            streams.push(StreamInfo::new(streams.len(), StreamKind::Subtitle).with_codec("subrip"));
        }

        ContainerInfo {
            format_name: Some("scripted".to_string()),
            duration: Some(Duration::from_millis(self.duration_ms)),
            bitrate: self.bitrate,
            streams,
        }
    }

    fn is_corrupt(&self, index: usize) -> bool {
        self.corrupt.iter().any(|r| r.contains(&index))
    }

    fn make_video(&self, index: usize) -> VideoFrame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = vec![Self::fill_value(index); w * h];
        let header = (index as u32).to_le_bytes();
        let n = data.len().min(4);
        data[..n].copy_from_slice(&header[..n]);

        VideoFrame {
            pts: self.video_pts(index),
            width: self.width,
            height: self.height,
            format: PixelFormat::Gray8,
            planes: vec![Plane::new(data, w)],
            keyframe: index % self.gop == 0,
        }
    }

    fn make_audio(&self, index: usize) -> AudioFrame {
        let frames = (AUDIO_RATE as u128 * AUDIO_CHUNK.as_millis() / 1000) as usize;
        AudioFrame {
            pts: AUDIO_CHUNK * index as u32,
            samples: vec![0.0; frames * AUDIO_CHANNELS as usize],
            channels: AUDIO_CHANNELS,
            sample_rate: AUDIO_RATE,
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Backend serving [`ScriptedMedia`] for any path, with per-path overrides.
#[derive(Clone)]
pub struct ScriptedBackend {
    default: ScriptedMedia,
    files: Arc<Mutex<HashMap<PathBuf, ScriptedMedia>>>,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(default: ScriptedMedia) -> Self {
        Self {
            default,
            files: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Serve `media` for `path` instead of the default.
    pub fn with_file(self, path: impl Into<PathBuf>, media: ScriptedMedia) -> Self {
        self.files.lock().insert(path.into(), media);
        self
    }

    /// Sources opened so far.
    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Sources closed so far.
    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    /// Sources opened and not yet closed.
    pub fn live_sources(&self) -> usize {
        self.open_count().saturating_sub(self.close_count())
    }
}

impl MediaBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn version(&self) -> String {
        "1.0".to_string()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>> {
        let media = self
            .files
            .lock()
            .get(path)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        if media.unsupported {
            return Err(PlaybackError::UnsupportedFormat(
                "no demuxer accepts scripted garbage".to_string(),
            ));
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            info: media.container_info(),
            media,
            video: false,
            audio: false,
            next_video: 0,
            next_audio: 0,
            counters: Arc::clone(&self.counters),
            closed: false,
        }))
    }
}

struct ScriptedSource {
    media: ScriptedMedia,
    info: ContainerInfo,
    video: bool,
    audio: bool,
    next_video: usize,
    next_audio: usize,
    counters: Arc<Counters>,
    closed: bool,
}

impl MediaSource for ScriptedSource {
    fn streams(&self) -> &ContainerInfo {
        &self.info
    }

    fn select(&mut self, video: Option<usize>, audio: Option<usize>) -> Result<()> {
        let kind_of = |index: usize| self.info.streams.get(index).and_then(|s| s.kind);
        if let Some(index) = video {
            if kind_of(index) != Some(StreamKind::Video) {
                return Err(PlaybackError::Internal(format!("stream {} is not video", index)));
            }
        }
        if let Some(index) = audio {
            if kind_of(index) != Some(StreamKind::Audio) {
                return Err(PlaybackError::Internal(format!("stream {} is not audio", index)));
            }
        }
        self.video = video.is_some();
        self.audio = audio.is_some();
        Ok(())
    }

    fn seek_keyframe(&mut self, ts: Duration) -> Result<()> {
        let chunk_nanos = AUDIO_CHUNK.as_nanos();
        if self.video {
            let total = self.media.video_frame_count();
            let wanted = (ts.as_nanos() * self.media.fps as u128 / 1_000_000_000) as usize;
            let wanted = wanted.min(total.saturating_sub(1));
            let keyframe = wanted - wanted % self.media.gop;
            self.next_video = keyframe;
            let kf_pts = self.media.video_pts(keyframe);
            self.next_audio = (kf_pts.as_nanos() / chunk_nanos) as usize;
        } else {
            let total = self.media.audio_chunk_count();
            let wanted = (ts.as_nanos() / chunk_nanos) as usize;
            self.next_audio = wanted.min(total.saturating_sub(1));
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Err(PlaybackError::Released);
        }
        if !self.media.decode_delay.is_zero() {
            std::thread::sleep(self.media.decode_delay);
        }

        let video_left = self.video && self.next_video < self.media.video_frame_count();
        let audio_left = self.audio && self.next_audio < self.media.audio_chunk_count();

        let take_video = match (video_left, audio_left) {
            (false, false) => return Ok(None),
            (true, false) => true,
            (false, true) => false,
            (true, true) => {
                self.media.video_pts(self.next_video) <= AUDIO_CHUNK * self.next_audio as u32
            }
        };

        if take_video {
            let index = self.next_video;
            self.next_video += 1;
            if self.media.is_corrupt(index) {
                return Err(PlaybackError::DecodeFailure(format!(
                    "corrupt frame {}",
                    index
                )));
            }
            Ok(Some(Frame::Video(self.media.make_video(index))))
        } else {
            let index = self.next_audio;
            self.next_audio += 1;
            Ok(Some(Frame::Audio(self.media.make_audio(index))))
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Host Doubles
// ============================================================================

/// Session listener that records every callback as a [`SessionEvent`].
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SessionEvent>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: SessionEvent) {
        self.events.lock().push(event);
        self.changed.notify_all();
    }

    /// Snapshot of everything received so far.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&SessionEvent) -> bool) -> usize {
        self.events().iter().filter(|e| matches(e)).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Block until an event satisfies `matches` or `timeout` passes.
    pub fn wait_for(
        &self,
        matches: impl Fn(&SessionEvent) -> bool,
        timeout: Duration,
    ) -> Option<SessionEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if let Some(found) = events.iter().find(|e| matches(e)) {
                return Some(found.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.changed.wait_for(&mut events, deadline - now);
        }
    }
}

impl SessionListener for RecordingListener {
    fn on_prepared(&self, has_audio: bool, duration_ms: i64) {
        self.push(SessionEvent::Prepared {
            has_audio,
            duration_ms,
        });
    }

    fn on_surface_ready(&self) {
        self.push(SessionEvent::SurfaceReady);
    }

    fn on_first_frame(&self) {
        self.push(SessionEvent::FirstFrame);
    }

    // The host callback carries no position; the recorded value is unused.
    fn on_first_frame_after_seek(&self) {
        self.push(SessionEvent::FirstFrameAfterSeek { position_ms: -1 });
    }

    fn on_position(&self, position_ms: i64) {
        self.push(SessionEvent::Position { position_ms });
    }

    fn on_ended(&self) {
        self.push(SessionEvent::Ended);
    }

    fn on_error(&self, message: &str) {
        self.push(SessionEvent::Error {
            message: message.to_string(),
        });
    }

    fn on_audio_state_changed(&self, state: &str) {
        self.push(SessionEvent::AudioStateChanged {
            state: state.to_string(),
        });
    }
}

/// Render surface that keeps every presented buffer.
#[derive(Default)]
pub struct RecordingSurface {
    frames: Mutex<Vec<PixelBuffer>>,
    size: Option<(u32, u32)>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface that asks for frames scaled to `width` x `height`.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            size: Some((width, height)),
        }
    }

    pub fn presented(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn last(&self) -> Option<PixelBuffer> {
        self.frames.lock().last().cloned()
    }
}

impl RenderSurface for RecordingSurface {
    fn present(&self, frame: &PixelBuffer) -> bridge_traits::error::Result<()> {
        self.frames.lock().push(frame.clone());
        Ok(())
    }

    fn preferred_size(&self) -> Option<(u32, u32)> {
        self.size
    }
}

/// Audio output that counts the frames written to it.
pub struct RecordingOutput {
    frames: AtomicUsize,
    state: Mutex<AudioRouteState>,
}

impl Default for RecordingOutput {
    fn default() -> Self {
        Self {
            frames: AtomicUsize::new(0),
            state: Mutex::new(AudioRouteState::Ready),
        }
    }
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// Simulate a system-initiated route change.
    pub fn set_state(&self, state: AudioRouteState) {
        *self.state.lock() = state;
    }
}

impl AudioOutput for RecordingOutput {
    fn configure(&self, _sample_rate: u32, _channels: u16) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    fn write(&self, chunk: &AudioChunk) -> bridge_traits::error::Result<usize> {
        self.frames.fetch_add(chunk.frames(), Ordering::SeqCst);
        Ok(chunk.frames())
    }

    fn start(&self) -> bridge_traits::error::Result<()> {
        self.set_state(AudioRouteState::Playing);
        Ok(())
    }

    fn pause(&self) -> bridge_traits::error::Result<()> {
        self.set_state(AudioRouteState::Paused);
        Ok(())
    }

    fn flush(&self) -> bridge_traits::error::Result<()> {
        Ok(())
    }

    fn state(&self) -> AudioRouteState {
        *self.state.lock()
    }
}

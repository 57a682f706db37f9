//! # Decode Data Model & Backend Traits
//!
//! Types shared by every decode backend and the seam through which the
//! engine consumes an external decode library.
//!
//! ## Architecture
//!
//! ```text
//! MediaBackend::open(path) → MediaSource ─┬─ streams()      container + stream headers
//!                                         ├─ select(v, a)   enable decoders
//!                                         ├─ seek_keyframe  demuxer-level seek
//!                                         └─ next_frame     decoded Frame | EOF
//! ```
//!
//! A backend only has to demux, decode and seek to keyframes. Stream
//! selection policy, exact-seek logic and decode-ahead bounds live in
//! [`DecodeCore`](crate::decoder::DecodeCore) so every backend behaves the
//! same way.
//!
//! ## Threading Model
//!
//! `MediaSource` is `Send` but not `Sync`: a source is owned by exactly one
//! decode core, which is owned by exactly one thread at a time.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Stream Description
// ============================================================================

/// Kind of elementary stream inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    /// Attachments, timed metadata and anything else the engine ignores.
    Data,
}

/// Rational frame rate as reported by the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Frames per second, `None` for a degenerate rate.
    pub fn as_f64(&self) -> Option<f64> {
        if self.num == 0 || self.den == 0 {
            return None;
        }
        Some(self.num as f64 / self.den as f64)
    }

    /// Duration of a single frame.
    pub fn frame_duration(&self) -> Option<Duration> {
        self.as_f64().map(|fps| Duration::from_secs_f64(1.0 / fps))
    }
}

impl fmt::Display for FrameRate {
    /// Integral rates print as `30`, others with two decimals (`29.97`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_f64() {
            Some(fps) if (fps - fps.round()).abs() < 0.005 => write!(f, "{}", fps.round() as u64),
            Some(fps) => write!(f, "{:.2}", fps),
            None => write!(f, "{}/{}", self.num, self.den),
        }
    }
}

/// Header-level description of one stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Position of the stream in container order.
    pub index: usize,
    pub kind: Option<StreamKind>,
    /// Short codec name (`h264`, `aac`, `flac`).
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<FrameRate>,
    /// Display rotation in degrees, normalised to `0..360`.
    pub rotation: i32,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Bits per second.
    pub bitrate: Option<u64>,
    pub duration: Option<Duration>,
}

impl StreamInfo {
    pub fn new(index: usize, kind: StreamKind) -> Self {
        Self {
            index,
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == Some(StreamKind::Video)
    }

    pub fn is_audio(&self) -> bool {
        self.kind == Some(StreamKind::Audio)
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_frame_rate(mut self, rate: FrameRate) -> Self {
        self.frame_rate = Some(rate);
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees.rem_euclid(360);
        self
    }

    pub fn with_audio_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = Some(sample_rate);
        self.channels = Some(channels);
        self
    }

    pub fn with_bitrate(mut self, bitrate: u64) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Container-level description returned by [`MediaSource::streams`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Demuxer name (`mov,mp4,m4a,3gp,3g2,mj2`, `matroska,webm`, `wav`).
    pub format_name: Option<String>,
    pub duration: Option<Duration>,
    /// Overall bitrate in bits per second.
    pub bitrate: Option<u64>,
    /// Every stream, in container order.
    pub streams: Vec<StreamInfo>,
}

impl ContainerInfo {
    /// First stream of `kind` in container order.
    pub fn first_of(&self, kind: StreamKind) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.kind == Some(kind))
            .min_by_key(|s| s.index)
    }

    pub fn count_of(&self, kind: StreamKind) -> usize {
        self.streams.iter().filter(|s| s.kind == Some(kind)).count()
    }
}

/// Streams selected by a decode core on open.
///
/// Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSet {
    pub video: Option<StreamInfo>,
    pub audio: Option<StreamInfo>,
    pub duration: Option<Duration>,
    /// Bits per second, `0` when unknown.
    pub bitrate: u64,
    /// Rotation of the selected video stream.
    pub rotation: i32,
    pub container: Option<String>,
    pub stream_count: usize,
    pub has_subtitles: bool,
}

impl StreamSet {
    pub(crate) fn from_container(
        info: &ContainerInfo,
        video: Option<StreamInfo>,
        audio: Option<StreamInfo>,
    ) -> Self {
        let bitrate = info
            .bitrate
            .or_else(|| {
                let sum: u64 = info.streams.iter().filter_map(|s| s.bitrate).sum();
                (sum > 0).then_some(sum)
            })
            .unwrap_or(0);
        let duration = info.duration.or_else(|| {
            info.streams
                .iter()
                .filter_map(|s| s.duration)
                .max()
        });

        Self {
            rotation: video.as_ref().map(|v| v.rotation).unwrap_or(0),
            video,
            audio,
            duration,
            bitrate,
            container: info.format_name.clone(),
            stream_count: info.streams.len(),
            has_subtitles: info.count_of(StreamKind::Subtitle) > 0,
        }
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Duration in milliseconds, `-1` when the container does not know it.
    pub fn duration_ms(&self) -> i64 {
        self.duration
            .map(|d| d.as_millis().min(i64::MAX as u128) as i64)
            .unwrap_or(-1)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// Native pixel layout of a decoded video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling.
    Yuv420p,
    /// Planar Y, U, V with horizontal chroma subsampling.
    Yuv422p,
    /// Planar Y, U, V without subsampling.
    Yuv444p,
    /// Y plane followed by interleaved UV at 2x2 subsampling.
    Nv12,
    Rgb24,
    Rgba,
    Bgra,
    Gray8,
}

impl PixelFormat {
    /// Number of planes a frame of this format carries.
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 3,
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgb24 | PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Gray8 => 1,
        }
    }
}

/// One image plane with its row stride in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Bytes,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, stride: usize) -> Self {
        Self {
            data: data.into(),
            stride,
        }
    }
}

/// Decoded picture in its native pixel format.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub pts: Duration,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
    pub keyframe: bool,
}

/// Decoded audio as interleaved `f32` PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub pts: Duration,
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// A decoded unit, exclusively owned by whichever stage is processing it.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    /// Presentation timestamp relative to stream start.
    pub fn pts(&self) -> Duration {
        match self {
            Frame::Video(v) => v.pts,
            Frame::Audio(a) => a.pts,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            Frame::Video(_) => StreamKind::Video,
            Frame::Audio(_) => StreamKind::Audio,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Frame::Video(_))
    }

    pub fn into_video(self) -> Option<VideoFrame> {
        match self {
            Frame::Video(v) => Some(v),
            Frame::Audio(_) => None,
        }
    }
}

// ============================================================================
// Backend Traits
// ============================================================================

/// Which stream kinds a decode core should decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub video: bool,
    pub audio: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

impl OpenOptions {
    /// Video only, for thumbnails.
    pub fn video_only() -> Self {
        Self {
            video: true,
            audio: false,
        }
    }
}

/// Factory for media sources: the external decode library.
#[cfg_attr(test, mockall::automock)]
pub trait MediaBackend: Send + Sync {
    /// Short backend name (`symphonia`, `ffmpeg`).
    fn name(&self) -> &'static str;

    /// Version of the underlying library.
    fn version(&self) -> String;

    /// Open and demux the container at `path`.
    ///
    /// Implementations map "no demuxer accepts this" to
    /// [`PlaybackError::UnsupportedFormat`](crate::PlaybackError::UnsupportedFormat).
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>>;
}

/// An opened container.
#[cfg_attr(test, mockall::automock)]
pub trait MediaSource: Send {
    /// Container and stream headers. Available without decoding.
    fn streams(&self) -> &ContainerInfo;

    /// Enable decoders for the given stream indices. Frames of other
    /// streams are never returned.
    fn select(&mut self, video: Option<usize>, audio: Option<usize>) -> Result<()>;

    /// Seek to the nearest keyframe at or before `ts` and flush decoders.
    fn seek_keyframe(&mut self, ts: Duration) -> Result<()>;

    /// Next decoded frame of a selected stream, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release demuxer and decoder state. Called at most once.
    fn close(&mut self);
}

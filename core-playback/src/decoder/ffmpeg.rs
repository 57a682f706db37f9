//! # FFmpeg Backend
//!
//! Video and audio decoding through `ffmpeg-next`. Enabled with the
//! `ffmpeg` feature; links against the system FFmpeg libraries.
//!
//! Frames keep the decoder's native planar layout when the converter
//! understands it. Anything else is converted to RGBA with `swscale`
//! before it leaves the backend.

use crate::error::{PlaybackError, Result};
use crate::traits::{
    AudioFrame, ContainerInfo, Frame, FrameRate, MediaBackend, MediaSource, PixelFormat, Plane,
    StreamInfo, StreamKind, VideoFrame,
};
use ffmpeg::format::{sample, Pixel, Sample};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::Rational;
use ffmpeg_next as ffmpeg;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

fn init() -> Result<()> {
    INIT.get_or_init(|| ffmpeg::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| PlaybackError::Internal(format!("ffmpeg init: {}", e)))
}

/// [`MediaBackend`] backed by libavformat / libavcodec.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        init()?;
        Ok(Self)
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn version(&self) -> String {
        let v = ffmpeg::util::version();
        format!("avutil {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
    }

    #[instrument(skip(self, path), fields(path = %core_runtime::logging::log_path(path)))]
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>> {
        init()?;
        let input = ffmpeg::format::input(&path).map_err(|e| match e {
            ffmpeg::Error::InvalidData => PlaybackError::UnsupportedFormat(e.to_string()),
            ffmpeg::Error::Other { .. } => PlaybackError::SourceUnavailable(e.to_string()),
            other => PlaybackError::UnsupportedFormat(other.to_string()),
        })?;

        let info = container_info(&input);
        info!(
            format = info.format_name.as_deref().unwrap_or("unknown"),
            streams = info.streams.len(),
            "FFmpeg source opened"
        );

        Ok(Box::new(FfmpegSource {
            input: Some(input),
            info,
            video: None,
            audio: None,
            ready: VecDeque::new(),
            drained: false,
        }))
    }
}

fn to_duration(ts: i64, time_base: Rational) -> Duration {
    let (num, den) = (time_base.numerator() as i128, time_base.denominator() as i128);
    if ts <= 0 || num <= 0 || den <= 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((ts as i128 * num * 1_000_000_000 / den) as u64)
}

/// Clockwise display rotation from the `rotate` tag or the display matrix.
fn display_rotation(stream: &ffmpeg::Stream) -> i32 {
    if let Some(tag) = stream.metadata().get("rotate") {
        if let Ok(degrees) = tag.trim().parse::<i32>() {
            return degrees;
        }
    }

    // SAFETY: codecpar is owned by the stream and outlives this call; the
    // side-data entry is bounds-checked before the matrix is read.
    unsafe {
        let params = (*stream.as_ptr()).codecpar;
        if params.is_null() {
            return 0;
        }
        let side_data = ffmpeg::ffi::av_packet_side_data_get(
            (*params).coded_side_data,
            (*params).nb_coded_side_data,
            ffmpeg::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX,
        );
        if side_data.is_null() || (*side_data).size < 9 * 4 {
            return 0;
        }
        let angle = ffmpeg::ffi::av_display_rotation_get((*side_data).data as *const i32);
        if angle.is_nan() {
            0
        } else {
            // the matrix angle is counter-clockwise
            (-angle).round() as i32
        }
    }
}

fn container_info(input: &ffmpeg::format::context::Input) -> ContainerInfo {
    let streams = input
        .streams()
        .map(|stream| {
            let params = stream.parameters();
            let kind = match params.medium() {
                Type::Video => StreamKind::Video,
                Type::Audio => StreamKind::Audio,
                Type::Subtitle => StreamKind::Subtitle,
                _ => StreamKind::Data,
            };

            let mut info = StreamInfo::new(stream.index(), kind);
            info.codec = Some(params.id().name().to_string());

            // SAFETY: reading plain fields of the stream's codec parameters.
            let (width, height, sample_rate, channels, bit_rate) = unsafe {
                let raw = &*params.as_ptr();
                (raw.width, raw.height, raw.sample_rate, raw.ch_layout.nb_channels, raw.bit_rate)
            };

            match kind {
                StreamKind::Video => {
                    info = info
                        .with_dimensions(width.max(0) as u32, height.max(0) as u32)
                        .with_rotation(display_rotation(&stream));
                    let rate = stream.avg_frame_rate();
                    if rate.numerator() > 0 && rate.denominator() > 0 {
                        info = info.with_frame_rate(FrameRate::new(
                            rate.numerator() as u32,
                            rate.denominator() as u32,
                        ));
                    }
                }
                StreamKind::Audio => {
                    info = info.with_audio_format(sample_rate.max(0) as u32, channels.max(0) as u16);
                }
                _ => {}
            }

            if bit_rate > 0 {
                info = info.with_bitrate(bit_rate as u64);
            }
            if stream.duration() > 0 {
                info = info.with_duration(to_duration(stream.duration(), stream.time_base()));
            }
            info
        })
        .collect();

    let duration = (input.duration() > 0)
        .then(|| to_duration(input.duration(), Rational::new(1, ffmpeg::ffi::AV_TIME_BASE)));
    let bitrate = (input.bit_rate() > 0).then(|| input.bit_rate() as u64);

    ContainerInfo {
        format_name: Some(input.format().name().to_string()),
        duration,
        bitrate,
        streams,
    }
}

struct VideoTrack {
    index: usize,
    decoder: ffmpeg::decoder::Video,
    time_base: Rational,
}

struct AudioTrack {
    index: usize,
    decoder: ffmpeg::decoder::Audio,
    time_base: Rational,
}

/// One opened container.
pub struct FfmpegSource {
    input: Option<ffmpeg::format::context::Input>,
    info: ContainerInfo,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    /// Frames received from the decoders but not handed out yet.
    ready: VecDeque<Frame>,
    /// Demuxer exhausted and decoders flushed.
    drained: bool,
}

// SAFETY: the demuxer and decoder contexts are only touched through
// `&mut self`, so they are never used from two threads at once.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    fn receive_video(&mut self) -> Result<()> {
        let Some(track) = self.video.as_mut() else {
            return Ok(());
        };
        let mut decoded = ffmpeg::frame::Video::empty();
        while track.decoder.receive_frame(&mut decoded).is_ok() {
            let ts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            let frame = video_frame(&decoded, to_duration(ts, track.time_base))?;
            self.ready.push_back(Frame::Video(frame));
        }
        Ok(())
    }

    fn receive_audio(&mut self) -> Result<()> {
        let Some(track) = self.audio.as_mut() else {
            return Ok(());
        };
        let mut decoded = ffmpeg::frame::Audio::empty();
        while track.decoder.receive_frame(&mut decoded).is_ok() {
            let ts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
            match audio_frame(&decoded, to_duration(ts, track.time_base)) {
                Some(frame) => self.ready.push_back(Frame::Audio(frame)),
                None => warn!(format = ?decoded.format(), "Dropping audio in unsupported sample format"),
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if let Some(track) = self.video.as_mut() {
            let _ = track.decoder.send_eof();
        }
        if let Some(track) = self.audio.as_mut() {
            let _ = track.decoder.send_eof();
        }
        self.receive_video()?;
        self.receive_audio()?;
        self.drained = true;
        Ok(())
    }
}

impl MediaSource for FfmpegSource {
    fn streams(&self) -> &ContainerInfo {
        &self.info
    }

    fn select(&mut self, video: Option<usize>, audio: Option<usize>) -> Result<()> {
        let input = self.input.as_ref().ok_or(PlaybackError::Released)?;
        let open_context = |index: usize| {
            let stream = input
                .stream(index)
                .ok_or_else(|| PlaybackError::Internal(format!("no stream at index {}", index)))?;
            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| PlaybackError::DecodeFailure(format!("codec parameters: {}", e)))?;
            Ok::<_, PlaybackError>((context, stream.time_base()))
        };

        self.video = match video {
            Some(index) => {
                let (context, time_base) = open_context(index)?;
                let decoder = context
                    .decoder()
                    .video()
                    .map_err(|e| PlaybackError::DecodeFailure(format!("video decoder: {}", e)))?;
                Some(VideoTrack {
                    index,
                    decoder,
                    time_base,
                })
            }
            None => None,
        };

        self.audio = match audio {
            Some(index) => {
                let (context, time_base) = open_context(index)?;
                let decoder = context
                    .decoder()
                    .audio()
                    .map_err(|e| PlaybackError::DecodeFailure(format!("audio decoder: {}", e)))?;
                Some(AudioTrack {
                    index,
                    decoder,
                    time_base,
                })
            }
            None => None,
        };
        Ok(())
    }

    fn seek_keyframe(&mut self, ts: Duration) -> Result<()> {
        let input = self.input.as_mut().ok_or(PlaybackError::Released)?;
        let target = ts.as_micros().min(i64::MAX as u128) as i64;
        input
            .seek(target, ..target)
            .map_err(|e| PlaybackError::DecodeFailure(format!("seek failed: {}", e)))?;

        if let Some(track) = self.video.as_mut() {
            track.decoder.flush();
        }
        if let Some(track) = self.audio.as_mut() {
            track.decoder.flush();
        }
        self.ready.clear();
        self.drained = false;
        debug!(?ts, "Seeked to keyframe");
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.input.is_none() {
                return Err(PlaybackError::Released);
            }
            if self.drained {
                return Ok(None);
            }

            let input = self.input.as_mut().ok_or(PlaybackError::Released)?;
            let next = input.packets().next().map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                self.drain()?;
                continue;
            };

            if let Some(track) = self.video.as_mut().filter(|t| t.index == index) {
                track
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| PlaybackError::DecodeFailure(format!("video packet: {}", e)))?;
                self.receive_video()?;
            } else if let Some(track) = self.audio.as_mut().filter(|t| t.index == index) {
                track
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| PlaybackError::DecodeFailure(format!("audio packet: {}", e)))?;
                self.receive_audio()?;
            }
        }
    }

    fn close(&mut self) {
        self.ready.clear();
        self.video = None;
        self.audio = None;
        if self.input.take().is_some() {
            debug!("FFmpeg source closed");
        }
    }
}

fn native_format(format: Pixel) -> Option<PixelFormat> {
    match format {
        Pixel::YUV420P | Pixel::YUVJ420P => Some(PixelFormat::Yuv420p),
        Pixel::YUV422P | Pixel::YUVJ422P => Some(PixelFormat::Yuv422p),
        Pixel::YUV444P | Pixel::YUVJ444P => Some(PixelFormat::Yuv444p),
        Pixel::NV12 => Some(PixelFormat::Nv12),
        Pixel::RGB24 => Some(PixelFormat::Rgb24),
        Pixel::RGBA => Some(PixelFormat::Rgba),
        Pixel::BGRA => Some(PixelFormat::Bgra),
        Pixel::GRAY8 => Some(PixelFormat::Gray8),
        _ => None,
    }
}

fn copy_planes(frame: &ffmpeg::frame::Video, count: usize) -> Vec<Plane> {
    (0..count)
        .map(|i| Plane::new(frame.data(i).to_vec(), frame.stride(i)))
        .collect()
}

fn video_frame(decoded: &ffmpeg::frame::Video, pts: Duration) -> Result<VideoFrame> {
    let (width, height) = (decoded.width(), decoded.height());

    let (format, planes) = match native_format(decoded.format()) {
        Some(format) => (format, copy_planes(decoded, format.plane_count())),
        None => {
            let mut scaler =
                Scaler::get(decoded.format(), width, height, Pixel::RGBA, width, height, Flags::BILINEAR)
                    .map_err(|e| PlaybackError::DecodeFailure(format!("swscale: {}", e)))?;
            let mut rgba = ffmpeg::frame::Video::empty();
            scaler
                .run(decoded, &mut rgba)
                .map_err(|e| PlaybackError::DecodeFailure(format!("swscale: {}", e)))?;
            (PixelFormat::Rgba, copy_planes(&rgba, 1))
        }
    };

    Ok(VideoFrame {
        pts,
        width,
        height,
        format,
        planes,
        keyframe: decoded.is_key(),
    })
}

/// Interleaved `f32` samples, or `None` for sample formats not handled here.
fn audio_frame(decoded: &ffmpeg::frame::Audio, pts: Duration) -> Option<AudioFrame> {
    // SAFETY: plain field read on a frame we hold a reference to.
    let channels = unsafe { (*decoded.as_ptr()).ch_layout.nb_channels }.max(0) as usize;
    let samples = decoded.samples();

    let (width, planar, decode): (usize, bool, fn(&[u8]) -> f32) = match decoded.format() {
        Sample::F32(kind) => (4, kind == sample::Type::Planar, |b| {
            f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
        }),
        Sample::F64(kind) => (8, kind == sample::Type::Planar, |b| {
            f64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
        }),
        Sample::I16(kind) => (2, kind == sample::Type::Planar, |b| {
            i16::from_ne_bytes([b[0], b[1]]) as f32 / 32_768.0
        }),
        Sample::I32(kind) => (4, kind == sample::Type::Planar, |b| {
            i32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as f32 / 2_147_483_648.0
        }),
        Sample::U8(kind) => (1, kind == sample::Type::Planar, |b| (b[0] as f32 - 128.0) / 128.0),
        _ => return None,
    };

    let mut interleaved = Vec::with_capacity(samples * channels);
    for i in 0..samples {
        for c in 0..channels {
            let (plane, offset) = if planar {
                (c, i * width)
            } else {
                (0, (i * channels + c) * width)
            };
            let value = decoded
                .data(plane)
                .get(offset..offset + width)
                .map(decode)
                .unwrap_or(0.0);
            interleaved.push(value);
        }
    }

    Some(AudioFrame {
        pts,
        samples: interleaved,
        channels: channels as u16,
        sample_rate: decoded.rate(),
    })
}

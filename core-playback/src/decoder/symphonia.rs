//! # Symphonia Backend
//!
//! Pure-Rust demuxing and audio decoding through Symphonia.
//!
//! Symphonia has no video codecs: every track it reports is audio, or data
//! when no codec is registered for it. Sources with only audio play as
//! audio-driven sessions; video sources need the `ffmpeg` backend.

use crate::decoder::format_detector::FormatDetector;
use crate::decoder::sample_converter::SampleConverter;
use crate::error::{PlaybackError, Result};
use crate::traits::{ContainerInfo, Frame, MediaBackend, MediaSource, StreamInfo, StreamKind};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, error, info, instrument, warn};

/// Packets that may fail in a row before decoding gives up.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// [`MediaBackend`] backed by Symphonia's default registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaBackend;

impl SymphoniaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for SymphoniaBackend {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn version(&self) -> String {
        "0.5".to_string()
    }

    #[instrument(skip(self, path), fields(path = %core_runtime::logging::log_path(path)))]
    fn open(&self, path: &Path) -> Result<Box<dyn MediaSource>> {
        let file = File::open(path)
            .map_err(|e| PlaybackError::SourceUnavailable(format!("failed to open file: {}", e)))?;
        let file_size = file.metadata().map(|m| m.len()).ok();

        let hint = FormatDetector::hint_from_path(path);
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                debug!(error = %e, "Format probe failed");
                PlaybackError::UnsupportedFormat(e.to_string())
            })?;

        let reader = probed.format;
        let info = container_info(reader.tracks(), path, file_size);
        info!(
            streams = info.streams.len(),
            duration = ?info.duration,
            "Symphonia source opened"
        );

        Ok(Box::new(SymphoniaSource {
            reader: Some(reader),
            info,
            audio: None,
            eof: false,
        }))
    }
}

fn track_duration(track: &Track) -> Option<Duration> {
    let params = &track.codec_params;
    let frames = params.n_frames?;
    match params.time_base {
        Some(tb) => Some(time_to_duration(tb.calc_time(frames))),
        None => {
            let rate = params.sample_rate.filter(|r| *r > 0)?;
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
    }
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac)
}

fn container_info(tracks: &[Track], path: &Path, file_size: Option<u64>) -> ContainerInfo {
    let streams: Vec<StreamInfo> = tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let params = &track.codec_params;
            let kind = if params.codec == CODEC_TYPE_NULL {
                StreamKind::Data
            } else {
                StreamKind::Audio
            };

            let mut stream = StreamInfo::new(index, kind);
            stream.codec = FormatDetector::codec_name(params.codec);
            stream.sample_rate = params.sample_rate;
            stream.channels = params.channels.map(|c| c.count() as u16);
            stream.duration = track_duration(track);
            stream
        })
        .collect();

    let duration = streams.iter().filter_map(|s| s.duration).max();
    let bitrate = match (file_size, duration) {
        (Some(size), Some(d)) if !d.is_zero() => Some((size as f64 * 8.0 / d.as_secs_f64()) as u64),
        _ => None,
    };

    ContainerInfo {
        format_name: FormatDetector::container_name(path),
        duration,
        bitrate,
        streams,
    }
}

struct SelectedAudio {
    track_id: u32,
    decoder: Box<dyn Decoder>,
    time_base: Option<TimeBase>,
    sample_rate: Option<u32>,
}

/// One opened file. Stream index `i` is the reader's `i`-th track.
pub struct SymphoniaSource {
    reader: Option<Box<dyn FormatReader>>,
    info: ContainerInfo,
    audio: Option<SelectedAudio>,
    eof: bool,
}

impl SymphoniaSource {
    fn reader_mut(&mut self) -> Result<&mut Box<dyn FormatReader>> {
        self.reader.as_mut().ok_or(PlaybackError::Released)
    }

    fn packet_pts(audio: &SelectedAudio, ts: u64) -> Duration {
        match (audio.time_base, audio.sample_rate) {
            (Some(tb), _) => time_to_duration(tb.calc_time(ts)),
            (None, Some(rate)) if rate > 0 => Duration::from_secs_f64(ts as f64 / rate as f64),
            _ => Duration::ZERO,
        }
    }
}

impl MediaSource for SymphoniaSource {
    fn streams(&self) -> &ContainerInfo {
        &self.info
    }

    fn select(&mut self, video: Option<usize>, audio: Option<usize>) -> Result<()> {
        if let Some(index) = video {
            return Err(PlaybackError::Internal(format!(
                "stream {} cannot be decoded as video",
                index
            )));
        }

        let Some(index) = audio else {
            self.audio = None;
            return Ok(());
        };

        let reader = self.reader.as_ref().ok_or(PlaybackError::Released)?;
        let track = reader
            .tracks()
            .get(index)
            .ok_or_else(|| PlaybackError::Internal(format!("no track at index {}", index)))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                error!(error = %e, "Failed to create codec decoder");
                PlaybackError::DecodeFailure(format!("failed to create codec decoder: {}", e))
            })?;

        self.audio = Some(SelectedAudio {
            track_id: track.id,
            time_base: track.codec_params.time_base,
            sample_rate: track.codec_params.sample_rate,
            decoder,
        });
        Ok(())
    }

    fn seek_keyframe(&mut self, ts: Duration) -> Result<()> {
        let track_id = self.audio.as_ref().map(|a| a.track_id);
        let reader = self.reader_mut()?;

        let result = reader.seek(
            SeekMode::Coarse,
            SeekTo::Time {
                time: Time::from(ts.as_secs_f64()),
                track_id,
            },
        );

        match result {
            Ok(seeked) => {
                debug!(required_ts = seeked.required_ts, actual_ts = seeked.actual_ts, "Seeked");
                self.eof = false;
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                debug!(?ts, "Seek beyond end of stream");
                self.eof = true;
            }
            Err(e) => {
                return Err(PlaybackError::DecodeFailure(format!("seek failed: {}", e)));
            }
        }

        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.reset();
        }
        Ok(())
    }

    #[instrument(skip(self), level = "trace")]
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.reader.is_none() {
            return Err(PlaybackError::Released);
        }
        if self.eof {
            return Ok(None);
        }

        let mut consecutive_errors = 0;

        loop {
            let reader = self.reader.as_mut().ok_or(PlaybackError::Released)?;
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Track list changed mid-stream");
                    return Err(PlaybackError::DecodeFailure(
                        "track list changed, reset required".to_string(),
                    ));
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of stream");
                    self.eof = true;
                    return Ok(None);
                }
                Err(SymphoniaError::IoError(e)) => {
                    consecutive_errors += 1;
                    warn!(
                        attempt = consecutive_errors,
                        max = MAX_CONSECUTIVE_ERRORS,
                        error = %e,
                        "I/O error reading packet"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(PlaybackError::SourceUnavailable(format!(
                            "stream I/O failure after {} attempts: {}",
                            MAX_CONSECUTIVE_ERRORS, e
                        )));
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Fatal format reader error");
                    return Err(PlaybackError::DecodeFailure(format!(
                        "failed to read packet: {}",
                        e
                    )));
                }
            };

            while !reader.metadata().is_latest() {
                reader.metadata().pop();
            }

            let Some(audio) = self.audio.as_mut() else {
                continue;
            };
            if packet.track_id() != audio.track_id {
                continue;
            }

            let pts = Self::packet_pts(audio, packet.ts());
            match audio.decoder.decode(&packet) {
                Ok(decoded) => {
                    let frame = SampleConverter::to_audio_frame(&decoded, pts);
                    return Ok(Some(Frame::Audio(frame)));
                }
                Err(SymphoniaError::IoError(e))
                    if consecutive_errors + 1 < MAX_CONSECUTIVE_ERRORS =>
                {
                    consecutive_errors += 1;
                    warn!(attempt = consecutive_errors, error = %e, "Skipping corrupt packet");
                    continue;
                }
                Err(SymphoniaError::DecodeError(e))
                    if consecutive_errors + 1 < MAX_CONSECUTIVE_ERRORS =>
                {
                    consecutive_errors += 1;
                    warn!(attempt = consecutive_errors, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Decoder failure");
                    return Err(PlaybackError::DecodeFailure(format!(
                        "failed to decode packet: {}",
                        e
                    )));
                }
            }
        }
    }

    fn close(&mut self) {
        self.audio = None;
        if self.reader.take().is_some() {
            debug!("Symphonia source closed");
        }
    }
}

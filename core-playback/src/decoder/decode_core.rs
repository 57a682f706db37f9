//! # Decode Core
//!
//! Backend-independent decode contract: path validation, stream selection,
//! keyframe and exact seeks with bounded decode-ahead, continuous decode and
//! idempotent close.

use crate::config::SessionConfig;
use crate::error::{PlaybackError, Result};
use crate::traits::{
    ContainerInfo, Frame, MediaBackend, MediaSource, OpenOptions, StreamKind, StreamSet,
};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Decode-ahead bounds applied by [`DecodeCore::decode_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Primary-stream frames an exact seek may decode past the keyframe.
    pub max_exact_seek_frames: usize,
    /// Frames a seek may consume in a row without a primary-stream frame.
    pub max_fast_seek_frames: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for DecodeLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_exact_seek_frames: config.max_exact_seek_frames,
            max_fast_seek_frames: config.max_fast_seek_frames,
        }
    }
}

/// One opened source with its selected streams.
///
/// Owns exactly one [`MediaSource`]. Not `Sync`; a playback session moves
/// its core into the decode worker.
pub struct DecodeCore {
    source: Option<Box<dyn MediaSource>>,
    streams: StreamSet,
    primary: StreamKind,
    limits: DecodeLimits,
    /// Frames decoded past an exact-seek result, replayed by `decode_next`.
    pending: VecDeque<Frame>,
}

impl DecodeCore {
    /// Open `path` and select the first video and first audio stream.
    ///
    /// # Errors
    ///
    /// - `SourceUnavailable` if the path is missing or unreadable
    /// - `UnsupportedFormat` if the backend rejects the container
    /// - `NoDecodableStreams` if no stream allowed by `options` exists
    #[instrument(skip(backend, path, limits), fields(path = %core_runtime::logging::log_path(path), backend = backend.name()))]
    pub fn open(
        backend: &dyn MediaBackend,
        path: &Path,
        options: OpenOptions,
        limits: DecodeLimits,
    ) -> Result<Self> {
        validate_path(path)?;
        let mut source = backend.open(path)?;
        let info = source.streams().clone();

        let video = if options.video {
            info.first_of(StreamKind::Video).cloned()
        } else {
            None
        };
        let audio = if options.audio {
            info.first_of(StreamKind::Audio).cloned()
        } else {
            None
        };

        if video.is_none() && audio.is_none() {
            source.close();
            let message = if options.video && !options.audio && info.count_of(StreamKind::Audio) > 0 {
                "source has audio only".to_string()
            } else {
                format!("{} streams, none decodable", info.streams.len())
            };
            return Err(PlaybackError::NoDecodableStreams(message));
        }

        if let Err(e) = source.select(video.as_ref().map(|s| s.index), audio.as_ref().map(|s| s.index)) {
            source.close();
            return Err(e);
        }

        let streams = StreamSet::from_container(&info, video, audio);
        let primary = if streams.has_video() {
            StreamKind::Video
        } else {
            StreamKind::Audio
        };

        info!(
            has_video = streams.has_video(),
            has_audio = streams.has_audio(),
            duration_ms = streams.duration_ms(),
            "Decode core opened"
        );

        Ok(Self {
            source: Some(source),
            streams,
            primary,
            limits,
            pending: VecDeque::new(),
        })
    }

    /// Read container headers without selecting or decoding anything.
    #[instrument(skip(backend, path), fields(path = %core_runtime::logging::log_path(path)))]
    pub fn probe(backend: &dyn MediaBackend, path: &Path) -> Result<ContainerInfo> {
        validate_path(path)?;
        let mut source = backend.open(path)?;
        let info = source.streams().clone();
        source.close();
        debug!(streams = info.streams.len(), "Probed container headers");
        Ok(info)
    }

    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    /// Kind of the stream that drives seeking and pacing.
    pub fn primary(&self) -> StreamKind {
        self.primary
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    fn source_mut(&mut self) -> Result<&mut Box<dyn MediaSource>> {
        self.source.as_mut().ok_or(PlaybackError::Released)
    }

    /// Seek to `ts` and return the frame to present.
    ///
    /// With `exact == false` this is the first primary-stream frame after
    /// the keyframe. With `exact == true` decoding continues until the
    /// primary frame closest to `ts`. `Ok(None)` means the source ended
    /// before any primary frame was decoded.
    #[instrument(skip(self), level = "debug")]
    pub fn decode_at(&mut self, ts: Duration, exact: bool) -> Result<Option<Frame>> {
        let primary = self.primary;
        let limits = self.limits;
        self.pending.clear();

        let source = self.source.as_mut().ok_or(PlaybackError::Released)?;
        source.seek_keyframe(ts)?;

        let target_ms = ts.as_millis() as i64;
        let mut prev: Option<Frame> = None;
        let mut decoded = 0usize;
        let mut foreign_streak = 0usize;
        let mut held_back: Vec<Frame> = Vec::new();

        loop {
            let Some(frame) = source.next_frame()? else {
                debug!(decoded, "Source ended during seek");
                return Ok(prev);
            };

            if frame.kind() != primary {
                foreign_streak += 1;
                if foreign_streak > limits.max_fast_seek_frames {
                    warn!(foreign_streak, "No primary frame after seek");
                    return Err(PlaybackError::SeekTimeout {
                        target_ms,
                        frames: foreign_streak,
                    });
                }
                if exact && frame.pts() >= ts {
                    held_back.push(frame);
                }
                continue;
            }
            foreign_streak = 0;

            if !exact {
                trace!(pts = ?frame.pts(), "Keyframe seek landed");
                return Ok(Some(frame));
            }

            decoded += 1;
            if frame.pts() >= ts {
                let choice = match prev {
                    Some(p) if ts - p.pts() < frame.pts() - ts => {
                        self.pending.push_back(frame);
                        p
                    }
                    _ => frame,
                };
                self.pending.extend(held_back);
                trace!(pts = ?choice.pts(), decoded, "Exact seek landed");
                return Ok(Some(choice));
            }

            if decoded >= limits.max_exact_seek_frames {
                warn!(decoded, target_ms, "Exact seek exceeded decode-ahead limit");
                return Err(PlaybackError::SeekTimeout {
                    target_ms,
                    frames: decoded,
                });
            }
            prev = Some(frame);
        }
    }

    /// Next frame in presentation order, `Ok(None)` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        self.source_mut()?.next_frame()
    }

    /// Release the source. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.pending.clear();
        if let Some(mut source) = self.source.take() {
            source.close();
            debug!("Decode core closed");
        }
    }
}

impl Drop for DecodeCore {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DecodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeCore")
            .field("streams", &self.streams)
            .field("primary", &self.primary)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Fail with `SourceUnavailable` unless `path` is a readable regular file.
pub fn validate_path(path: &Path) -> Result<()> {
    let unavailable = |reason: String| {
        PlaybackError::SourceUnavailable(format!(
            "{}: {}",
            core_runtime::logging::log_path(path),
            reason
        ))
    };

    if path.as_os_str().is_empty() {
        return Err(PlaybackError::SourceUnavailable("empty path".to_string()));
    }
    let metadata = std::fs::metadata(path).map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(unavailable("not a regular file".to_string()));
    }
    File::open(path).map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedBackend, ScriptedMedia};
    use crate::traits::{MockMediaBackend, MockMediaSource, StreamInfo};
    use std::io::Write;

    fn media_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"scripted").unwrap();
        file
    }

    fn open(media: ScriptedMedia, options: OpenOptions) -> (tempfile::NamedTempFile, Result<DecodeCore>) {
        let file = media_file();
        let backend = ScriptedBackend::new(media);
        let core = DecodeCore::open(&backend, file.path(), options, DecodeLimits::default());
        (file, core)
    }

    #[test]
    fn test_missing_path_is_source_unavailable() {
        let backend = ScriptedBackend::new(ScriptedMedia::video(10_000, 30, 640, 360));
        let result = DecodeCore::open(
            &backend,
            Path::new("/definitely/not/here.mp4"),
            OpenOptions::default(),
            DecodeLimits::default(),
        );
        assert!(matches!(result, Err(PlaybackError::SourceUnavailable(_))));
    }

    #[test]
    fn test_directory_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_path(dir.path()),
            Err(PlaybackError::SourceUnavailable(_))
        ));
    }

    #[test]
    fn test_selects_first_streams() {
        let (_file, core) = open(
            ScriptedMedia::video(10_000, 30, 640, 360).with_audio(),
            OpenOptions::default(),
        );
        let core = core.unwrap();
        assert!(core.streams().has_video());
        assert!(core.streams().has_audio());
        assert_eq!(core.streams().duration_ms(), 10_000);
        assert_eq!(core.primary(), StreamKind::Video);
    }

    #[test]
    fn test_audio_only_source_for_video_only_open() {
        let (_file, core) = open(ScriptedMedia::audio_only(5_000), OpenOptions::video_only());
        assert!(matches!(core, Err(PlaybackError::NoDecodableStreams(_))));
    }

    #[test]
    fn test_fast_seek_lands_on_keyframe() {
        let (_file, core) = open(
            ScriptedMedia::video(10_000, 30, 64, 36).with_gop(30),
            OpenOptions::default(),
        );
        let mut core = core.unwrap();

        let frame = core.decode_at(Duration::from_millis(5_500), false).unwrap().unwrap();
        // GOP of 30 at 30 fps: keyframe at 5 s
        assert_eq!(frame.pts(), Duration::from_secs(5));
    }

    #[test]
    fn test_exact_seek_picks_closest_frame() {
        let (_file, core) = open(
            ScriptedMedia::video(10_000, 30, 64, 36).with_gop(30),
            OpenOptions::default(),
        );
        let mut core = core.unwrap();

        // frames at 5.000, 5.033, 5.066 ...: 5040 ms is closest to 5033
        let frame = core.decode_at(Duration::from_millis(5_040), true).unwrap().unwrap();
        assert_eq!(ScriptedMedia::frame_index(&frame), Some(151));

        // the frame after the chosen one is replayed first
        let next = core.decode_next().unwrap().unwrap();
        assert_eq!(ScriptedMedia::frame_index(&next), Some(152));
    }

    #[test]
    fn test_exact_seek_timeout() {
        let file = media_file();
        let backend = ScriptedBackend::new(ScriptedMedia::video(60_000, 30, 64, 36).with_gop(900));
        let limits = DecodeLimits {
            max_exact_seek_frames: 100,
            max_fast_seek_frames: 100,
        };
        let mut core =
            DecodeCore::open(&backend, file.path(), OpenOptions::default(), limits).unwrap();

        let result = core.decode_at(Duration::from_secs(20), true);
        assert!(matches!(
            result,
            Err(PlaybackError::SeekTimeout { frames: 100, .. })
        ));
    }

    #[test]
    fn test_seek_past_end_returns_last_frame() {
        let (_file, core) = open(ScriptedMedia::video(1_000, 10, 16, 16), OpenOptions::default());
        let mut core = core.unwrap();

        let frame = core.decode_at(Duration::from_secs(5), true).unwrap().unwrap();
        assert_eq!(ScriptedMedia::frame_index(&frame), Some(9));
        assert!(core.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_file, core) = open(ScriptedMedia::video(1_000, 10, 16, 16), OpenOptions::default());
        let mut core = core.unwrap();

        core.close();
        core.close();
        assert!(core.is_closed());
        assert!(matches!(core.decode_next(), Err(PlaybackError::Released)));
    }

    #[test]
    fn test_select_failure_closes_source() {
        let file = media_file();
        let mut backend = MockMediaBackend::new();
        backend.expect_name().return_const("mock");
        backend.expect_open().returning(|_| {
            let mut source = MockMediaSource::new();
            source.expect_streams().return_const(ContainerInfo {
                streams: vec![StreamInfo::new(0, StreamKind::Video).with_dimensions(2, 2)],
                ..Default::default()
            });
            source
                .expect_select()
                .returning(|_, _| Err(PlaybackError::DecodeFailure("no decoder".into())));
            source.expect_close().times(1).return_const(());
            Ok(Box::new(source) as Box<dyn MediaSource>)
        });

        let result = DecodeCore::open(
            &backend,
            file.path(),
            OpenOptions::default(),
            DecodeLimits::default(),
        );
        assert!(matches!(result, Err(PlaybackError::DecodeFailure(_))));
    }
}

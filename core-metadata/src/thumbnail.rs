//! Single-frame thumbnail extraction.
//!
//! Every call opens its own video-only [`DecodeCore`], performs an exact
//! seek, converts the landed frame and closes the core again. Nothing is
//! cached between calls, so concurrent extractions, including ones on the
//! same path, never share state.

use crate::error::{guard, Result};
use bridge_traits::PixelBuffer;
use core_playback::{
    converter, DecodeCore, DecodeLimits, Frame, MediaBackend, OpenOptions, PlaybackError,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct ThumbnailService {
    backend: Arc<dyn MediaBackend>,
    limits: DecodeLimits,
}

impl ThumbnailService {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            limits: DecodeLimits::default(),
        }
    }

    /// Override the exact-seek decode-ahead bound.
    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// RGBA frame closest to `time_ms`, scaled per the converter rules.
    ///
    /// Negative times are treated as zero.
    ///
    /// # Errors
    ///
    /// - `InvalidDimensions` for a rejected target size, before any I/O
    /// - `NoVideoStream` if the source has no video
    /// - `SeekTimeout` / `DecodeFailure` from the decode core
    #[instrument(skip(self, path), fields(path = %core_runtime::logging::log_path(path)))]
    pub fn extract(&self, path: &Path, time_ms: i64, width: i64, height: i64) -> Result<PixelBuffer> {
        guard(|| self.extract_inner(path, time_ms, width, height))
    }

    fn extract_inner(&self, path: &Path, time_ms: i64, width: i64, height: i64) -> Result<PixelBuffer> {
        if width < 0 || height < 0 || (width == 0 && height == 0) {
            return Err(PlaybackError::InvalidDimensions { width, height }.into());
        }

        let mut core = DecodeCore::open(
            self.backend.as_ref(),
            path,
            OpenOptions::video_only(),
            self.limits,
        )
        .map_err(|e| match e {
            PlaybackError::NoDecodableStreams(_) => PlaybackError::NoVideoStream,
            other => other,
        })?;

        let target = Duration::from_millis(time_ms.max(0) as u64);
        let frame = match core.decode_at(target, true)? {
            Some(Frame::Video(frame)) => frame,
            Some(Frame::Audio(_)) => return Err(PlaybackError::NoVideoStream.into()),
            None => {
                return Err(PlaybackError::DecodeFailure(format!(
                    "no frame decodable at {} ms",
                    time_ms
                ))
                .into())
            }
        };
        core.close();

        let buffer = converter::convert(&frame, width, height)?;
        debug!(
            pts = ?frame.pts,
            width = buffer.width(),
            height = buffer.height(),
            "Thumbnail extracted"
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use core_playback::testing::{ScriptedBackend, ScriptedMedia};

    fn service(media: ScriptedMedia) -> (tempfile::NamedTempFile, ThumbnailService) {
        let file = tempfile::NamedTempFile::new().unwrap();
        (file, ThumbnailService::new(Arc::new(ScriptedBackend::new(media))))
    }

    #[test]
    fn test_dimensions_checked_before_open() {
        let backend = ScriptedBackend::new(ScriptedMedia::video(1_000, 30, 64, 36));
        let service = ThumbnailService::new(Arc::new(backend.clone()));
        let file = tempfile::NamedTempFile::new().unwrap();

        let err = service.extract(file.path(), 0, 0, 0).unwrap_err();
        assert!(matches!(
            err.as_playback(),
            Some(PlaybackError::InvalidDimensions { .. })
        ));
        assert!(service.extract(file.path(), 0, -4, 10).is_err());
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_negative_time_is_clamped() {
        let (file, service) = service(ScriptedMedia::video(1_000, 30, 64, 36));
        let buffer = service.extract(file.path(), -500, 64, 36).unwrap();
        let fill = ScriptedMedia::fill_value(0);
        assert_eq!(buffer.pixel(8, 8), Some([fill, fill, fill, 255]));
    }

    #[test]
    fn test_long_gop_times_out() {
        let (file, service) = service(ScriptedMedia::video(10_000, 30, 32, 18).with_gop(300));
        let service = service.with_limits(DecodeLimits {
            max_exact_seek_frames: 20,
            max_fast_seek_frames: 20,
        });

        let err = service.extract(file.path(), 5_000, 32, 18).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Playback(PlaybackError::SeekTimeout { .. })
        ));
    }
}

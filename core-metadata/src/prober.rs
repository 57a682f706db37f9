//! Container and Stream Metadata Probing
//!
//! Builds a [`VideoMetadata`] record from container headers without
//! decoding any frame payload.
//!
//! ## Overview
//!
//! - Reads stream headers through [`DecodeCore::probe`]
//! - Requires a video stream (width and height are mandatory)
//! - Falls back to `lofty` file properties for bitrate and container name
//!   when the backend does not report them
//! - Never fails across its boundary: every error and panic becomes a
//!   [`MetadataResult::Failure`]
//!
//! ## JSON Schema
//!
//! ```json
//! {"version":1,"success":true,"data":{"width":640,"height":360,"duration":10000,...}}
//! {"version":1,"success":false,"error":"Source unavailable: ..."}
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::prober::MetadataProber;
//!
//! let prober = MetadataProber::new(core_playback::default_backend()?);
//! let json = prober.probe(Path::new("clip.mp4")).to_json();
//! ```

use crate::error::{guard, MetadataError, Result};
use core_playback::{
    validate_path, ContainerInfo, DecodeCore, MediaBackend, PlaybackError, StreamKind,
};
use lofty::config::ParseOptions;
use lofty::file::{AudioFile, FileType, TaggedFileExt};
use lofty::probe::Probe;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Version of the JSON envelope produced by [`MetadataResult::to_json`].
pub const SCHEMA_VERSION: u32 = 1;

/// Emitted if the envelope itself cannot be serialized.
const FALLBACK_JSON: &str =
    r#"{"version":1,"success":false,"error":"metadata serialization failed"}"#;

/// Probed description of a video file.
///
/// Serializes to the `data` object of the JSON envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Container duration, `-1` when unknown.
    #[serde(rename = "duration")]
    pub duration_ms: i64,
    /// Video codec short name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Bits per second, `0` when unknown.
    pub bitrate: i64,
    /// Frames per second as a number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    /// Frames per second as text (`"30"`, `"29.97"`).
    #[serde(skip)]
    pub frame_rate: Option<String>,
    /// Display rotation in degrees.
    pub rotation: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub stream_count: usize,
    pub has_audio: bool,
    pub has_subtitles: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
}

/// Outcome of a probe. Never an unhandled fault.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataResult {
    Success(VideoMetadata),
    Failure { message: String },
}

/// Wire form of [`MetadataResult`].
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<VideoMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl MetadataResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MetadataResult::Success(_))
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        match self {
            MetadataResult::Success(metadata) => Some(metadata),
            MetadataResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            MetadataResult::Success(_) => None,
            MetadataResult::Failure { message } => Some(message),
        }
    }

    pub fn into_metadata(self) -> Option<VideoMetadata> {
        match self {
            MetadataResult::Success(metadata) => Some(metadata),
            MetadataResult::Failure { .. } => None,
        }
    }

    /// Versioned JSON envelope. Always valid JSON.
    pub fn to_json(&self) -> String {
        let envelope = match self {
            MetadataResult::Success(metadata) => Envelope {
                version: SCHEMA_VERSION,
                success: true,
                data: Some(metadata.clone()),
                error: None,
            },
            MetadataResult::Failure { message } => Envelope {
                version: SCHEMA_VERSION,
                success: false,
                data: None,
                error: Some(message.clone()),
            },
        };

        serde_json::to_string(&envelope).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize metadata envelope");
            FALLBACK_JSON.to_string()
        })
    }

    /// Parse an envelope produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)?;
        if envelope.version != SCHEMA_VERSION {
            return Err(MetadataError::InvalidMetadata(format!(
                "unsupported schema version {}",
                envelope.version
            )));
        }

        match (envelope.success, envelope.data, envelope.error) {
            (true, Some(metadata), _) => Ok(MetadataResult::Success(metadata)),
            (false, _, Some(message)) => Ok(MetadataResult::Failure { message }),
            _ => Err(MetadataError::InvalidMetadata(
                "envelope carries neither data nor error".to_string(),
            )),
        }
    }
}

impl From<Result<VideoMetadata>> for MetadataResult {
    fn from(result: Result<VideoMetadata>) -> Self {
        match result {
            Ok(metadata) => MetadataResult::Success(metadata),
            Err(e) => {
                let mut message = e.to_string();
                if message.is_empty() {
                    message = "metadata probe failed".to_string();
                }
                MetadataResult::Failure { message }
            }
        }
    }
}

// ============================================================================
// Prober
// ============================================================================

/// Header-only metadata reader.
#[derive(Clone)]
pub struct MetadataProber {
    backend: Arc<dyn MediaBackend>,
    parse_options: ParseOptions,
}

impl MetadataProber {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            parse_options: ParseOptions::new(),
        }
    }

    /// Probe `path`. Failures are returned as values.
    #[instrument(skip(self, path), fields(path = %core_runtime::logging::log_path(path)))]
    pub fn probe(&self, path: &Path) -> MetadataResult {
        let result = MetadataResult::from(guard(|| self.try_probe(path)));
        match &result {
            MetadataResult::Success(m) => {
                debug!(width = m.width, height = m.height, duration_ms = m.duration_ms, "Probe succeeded")
            }
            MetadataResult::Failure { message } => debug!(error = %message, "Probe failed"),
        }
        result
    }

    /// Probe `path`, propagating the error.
    pub fn try_probe(&self, path: &Path) -> Result<VideoMetadata> {
        let info = DecodeCore::probe(self.backend.as_ref(), path)?;
        self.build(path, &info)
    }

    /// Container duration in milliseconds, `-1` when unknown or on failure.
    ///
    /// Works for audio-only files too.
    pub fn duration_ms(&self, path: &Path) -> i64 {
        let probed = guard(|| Ok(DecodeCore::probe(self.backend.as_ref(), path)?));
        match probed {
            Ok(info) => container_duration_ms(&info),
            Err(e) => {
                debug!(error = %e, "Duration probe failed");
                -1
            }
        }
    }

    fn build(&self, path: &Path, info: &ContainerInfo) -> Result<VideoMetadata> {
        let video = info
            .first_of(StreamKind::Video)
            .ok_or(PlaybackError::NoVideoStream)?;
        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(MetadataError::InvalidMetadata(
                    "video stream has no dimensions".to_string(),
                ))
            }
        };
        let audio = info.first_of(StreamKind::Audio);

        let mut bitrate = video.bitrate.or(info.bitrate).unwrap_or(0);
        let mut container = info.format_name.clone();
        if bitrate == 0 || container.is_none() {
            if let Some(fallback) = self.file_properties(path) {
                if bitrate == 0 {
                    bitrate = fallback.bitrate.unwrap_or(0);
                }
                container = container.or(fallback.container);
            }
        }

        Ok(VideoMetadata {
            width,
            height,
            duration_ms: container_duration_ms(info),
            codec: video.codec.clone(),
            bitrate: bitrate.min(i64::MAX as u64) as i64,
            fps: video.frame_rate.and_then(|r| r.as_f64()),
            frame_rate: video.frame_rate.map(|r| r.to_string()),
            rotation: video.rotation,
            container,
            stream_count: info.streams.len(),
            has_audio: audio.is_some(),
            has_subtitles: info.count_of(StreamKind::Subtitle) > 0,
            audio_codec: audio.and_then(|a| a.codec.clone()),
            sample_rate: audio.and_then(|a| a.sample_rate),
            channels: audio.and_then(|a| a.channels),
        })
    }

    /// Bitrate and container name from `lofty`, when it can read the file.
    fn file_properties(&self, path: &Path) -> Option<FileProperties> {
        validate_path(path).ok()?;
        let tagged = Probe::open(path)
            .ok()?
            .options(self.parse_options)
            .guess_file_type()
            .ok()?
            .read()
            .ok()?;

        let properties = tagged.properties();
        let bitrate = properties
            .overall_bitrate()
            .or_else(|| properties.audio_bitrate())
            .map(|kbps| kbps as u64 * 1000);

        Some(FileProperties {
            bitrate,
            container: container_name(tagged.file_type()).map(str::to_string),
        })
    }
}

struct FileProperties {
    bitrate: Option<u64>,
    container: Option<String>,
}

fn container_duration_ms(info: &ContainerInfo) -> i64 {
    info.duration
        .or_else(|| info.streams.iter().filter_map(|s| s.duration).max())
        .map(|d| d.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(-1)
}

/// Container name for a `lofty` file type.
fn container_name(file_type: FileType) -> Option<&'static str> {
    let name = match file_type {
        FileType::Aac => "aac",
        FileType::Aiff => "aiff",
        FileType::Ape => "ape",
        FileType::Flac => "flac",
        FileType::Mpeg => "mp3",
        FileType::Mp4 => "mov,mp4,m4a,3gp,3g2,mj2",
        FileType::Mpc => "mpc",
        FileType::Opus | FileType::Vorbis | FileType::Speex => "ogg",
        FileType::Wav => "wav",
        FileType::WavPack => "wv",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VideoMetadata {
        VideoMetadata {
            width: 1920,
            height: 1080,
            duration_ms: 120_000,
            codec: Some("h264".to_string()),
            bitrate: 5_000_000,
            fps: Some(29.97),
            frame_rate: Some("29.97".to_string()),
            rotation: 90,
            container: Some("mov,mp4,m4a,3gp,3g2,mj2".to_string()),
            stream_count: 2,
            has_audio: true,
            has_subtitles: false,
            audio_codec: Some("aac".to_string()),
            sample_rate: Some(48_000),
            channels: Some(2),
        }
    }

    #[test]
    fn test_success_envelope_keys() {
        let json = MetadataResult::Success(sample()).to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["success"], true);
        let data = &value["data"];
        for key in [
            "width",
            "height",
            "duration",
            "codec",
            "bitrate",
            "fps",
            "rotation",
            "container",
            "streamCount",
            "hasAudio",
            "hasSubtitles",
            "audioCodec",
            "sampleRate",
            "channels",
        ] {
            assert!(data.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(data["duration"], 120_000);
        assert!(data.get("frameRate").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_audio_keys_absent_without_audio() {
        let metadata = VideoMetadata {
            has_audio: false,
            audio_codec: None,
            sample_rate: None,
            channels: None,
            ..sample()
        };
        let value: serde_json::Value =
            serde_json::from_str(&MetadataResult::Success(metadata).to_json()).unwrap();
        assert!(value["data"].get("audioCodec").is_none());
        assert_eq!(value["data"]["hasAudio"], false);
    }

    #[test]
    fn test_failure_envelope() {
        let result = MetadataResult::Failure {
            message: "Invalid file".to_string(),
        };
        assert_eq!(
            result.to_json(),
            r#"{"version":1,"success":false,"error":"Invalid file"}"#
        );
    }

    #[test]
    fn test_json_round_trip_drops_text_frame_rate() {
        let json = MetadataResult::Success(sample()).to_json();
        let parsed = MetadataResult::from_json(&json).unwrap();
        let metadata = parsed.metadata().unwrap();
        assert_eq!(metadata.fps, Some(29.97));
        assert_eq!(metadata.frame_rate, None);
        assert_eq!(metadata.stream_count, 2);
    }

    #[test]
    fn test_from_json_rejects_unknown_version() {
        let json = r#"{"version":2,"success":false,"error":"x"}"#;
        assert!(MetadataResult::from_json(json).is_err());
    }

    #[test]
    fn test_empty_error_message_is_replaced() {
        let result = MetadataResult::from(Err::<VideoMetadata, _>(MetadataError::InvalidMetadata(
            String::new(),
        )));
        assert!(!result.error().unwrap().is_empty());
    }

    #[test]
    fn test_container_names() {
        assert_eq!(container_name(FileType::Flac), Some("flac"));
        assert_eq!(container_name(FileType::Opus), Some("ogg"));
        assert_eq!(container_name(FileType::Mp4), Some("mov,mp4,m4a,3gp,3g2,mj2"));
    }
}

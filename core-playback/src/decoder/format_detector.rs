//! # Format Detection
//!
//! Probe hints and human-readable names for containers and codecs.

use std::path::Path;
use symphonia::core::codecs::{CodecType, CODEC_TYPE_NULL};
use symphonia::core::probe::Hint;
use tracing::debug;

/// Helpers around Symphonia's probe system.
pub struct FormatDetector;

impl FormatDetector {
    /// Create a probe hint from the file extension.
    ///
    /// ```rust,ignore
    /// let hint = FormatDetector::hint_from_path(Path::new("/media/clip.m4a"));
    /// ```
    pub fn hint_from_path(path: &Path) -> Hint {
        let mut hint = Hint::new();

        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            debug!(extension, "Setting probe hint extension");
            hint.with_extension(extension);
        } else {
            debug!("No file extension found, probe will auto-detect");
        }

        hint
    }

    /// Short codec name, e.g. `"aac"` or `"flac"`.
    pub fn codec_name(codec_type: CodecType) -> Option<String> {
        if codec_type == CODEC_TYPE_NULL {
            return None;
        }
        symphonia::default::get_codecs()
            .get_codec(codec_type)
            .map(|descriptor| descriptor.short_name.to_string())
    }

    /// Container name derived from the file extension.
    ///
    /// Names follow the demuxer names media tooling commonly reports so
    /// metadata looks the same whichever backend produced it.
    pub fn container_name(path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        let name = match extension.as_str() {
            "mp4" | "m4a" | "m4v" | "mov" | "3gp" | "3g2" => "mov,mp4,m4a,3gp,3g2,mj2",
            "mkv" | "mka" | "webm" => "matroska,webm",
            "mp3" => "mp3",
            "ogg" | "oga" | "opus" => "ogg",
            "flac" => "flac",
            "wav" | "wave" => "wav",
            "aac" => "aac",
            "aif" | "aiff" | "aifc" => "aiff",
            "caf" => "caf",
            _ => return None,
        };
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::CODEC_TYPE_FLAC;

    #[test]
    fn test_container_name_from_extension() {
        assert_eq!(
            FormatDetector::container_name(Path::new("/media/clip.MP4")).as_deref(),
            Some("mov,mp4,m4a,3gp,3g2,mj2")
        );
        assert_eq!(
            FormatDetector::container_name(Path::new("a.webm")).as_deref(),
            Some("matroska,webm")
        );
        assert_eq!(FormatDetector::container_name(Path::new("noext")), None);
        assert_eq!(FormatDetector::container_name(Path::new("x.xyz")), None);
    }

    #[test]
    fn test_codec_name() {
        assert_eq!(FormatDetector::codec_name(CODEC_TYPE_NULL), None);
        assert_eq!(
            FormatDetector::codec_name(CODEC_TYPE_FLAC).as_deref(),
            Some("flac")
        );
    }

    #[test]
    fn test_hint_from_path_without_extension() {
        // Hint is opaque; building it must not panic
        let _ = FormatDetector::hint_from_path(Path::new("/media/clip"));
    }
}

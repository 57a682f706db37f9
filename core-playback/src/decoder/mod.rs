//! # Decode Module
//!
//! The decode contract ([`DecodeCore`]) and the backends that feed it.
//!
//! ## Backends
//!
//! | Backend | Feature | Streams | Notes |
//! |---------|---------|---------|-------|
//! | [`SymphoniaBackend`] | `core-decoder` (default) | audio | pure Rust, no system libraries |
//! | `FfmpegBackend` | `ffmpeg` | video, audio, subtitle | links system FFmpeg |
//!
//! ## Architecture
//!
//! ```text
//! path → MediaBackend::open → MediaSource → DecodeCore → Frame
//!                                               ↓
//!                                   converter::convert → PixelBuffer
//! ```
//!
//! ## Threading Model
//!
//! Sources are `Send` but not `Sync`. A playback session moves its
//! `DecodeCore` into the session's decode worker; thumbnail and metadata
//! calls open their own short-lived core on the calling thread.

mod decode_core;

pub use self::decode_core::{validate_path, DecodeCore, DecodeLimits};

#[cfg(feature = "core-decoder")]
mod format_detector;

#[cfg(feature = "core-decoder")]
mod sample_converter;

#[cfg(feature = "core-decoder")]
mod symphonia;

#[cfg(feature = "core-decoder")]
pub use self::symphonia::{SymphoniaBackend, SymphoniaSource};

#[cfg(feature = "core-decoder")]
pub use format_detector::FormatDetector;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegBackend, FfmpegSource};

use crate::error::Result;
use crate::traits::MediaBackend;
use std::sync::Arc;

/// The most capable backend compiled in: FFmpeg when enabled, otherwise
/// Symphonia.
pub fn default_backend() -> Result<Arc<dyn MediaBackend>> {
    #[cfg(feature = "ffmpeg")]
    {
        Ok(Arc::new(FfmpegBackend::new()?))
    }

    #[cfg(all(feature = "core-decoder", not(feature = "ffmpeg")))]
    {
        Ok(Arc::new(SymphoniaBackend::new()))
    }
}

#[cfg(not(any(feature = "core-decoder", feature = "ffmpeg")))]
compile_error!("No decode backend enabled. Enable 'core-decoder' or 'ffmpeg'");

//! # Playback Engine Core
//!
//! Decoding, frame conversion and stateful playback sessions.
//!
//! ## Overview
//!
//! This crate handles:
//! - The decode contract over a pluggable [`MediaBackend`] (Symphonia by
//!   default, FFmpeg behind the `ffmpeg` feature)
//! - Conversion of native video frames into RGBA [`PixelBuffer`]s
//! - [`PlaybackSession`]: the per-handle state machine, its decode worker
//!   and the ordered event channel to the host
//! - [`Registry`]: generational handles for live sessions
//!
//! ## Features
//!
//! | Feature | Effect |
//! |---------|--------|
//! | `core-decoder` (default) | Symphonia audio backend |
//! | `ffmpeg` | FFmpeg backend for video containers |
//! | `test-support` | [`testing`] doubles for downstream tests |
//!
//! [`PixelBuffer`]: bridge_traits::PixelBuffer

pub mod clock;
pub mod config;
pub mod converter;
pub mod decoder;
pub mod error;
pub mod registry;
pub mod session;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use clock::PlaybackClock;
pub use config::SessionConfig;
pub use decoder::{default_backend, validate_path, DecodeCore, DecodeLimits};
pub use error::{PlaybackError, Result};
pub use registry::{Handle, Registry};
pub use session::{PlaybackSession, SessionContext, SessionState};
pub use traits::{
    AudioFrame, ContainerInfo, Frame, FrameRate, MediaBackend, MediaSource, OpenOptions,
    PixelFormat, Plane, StreamInfo, StreamKind, StreamSet, VideoFrame,
};
